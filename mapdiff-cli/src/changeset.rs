//! `open-changeset` and `close-changeset` commands.

use std::io::Write;

use camino::Utf8PathBuf;
use clap::Parser;
use mapdiff_core::Tags;
use mapdiff_data::{close_changeset, exec::sqlite::SqliteExecutor, open_changeset};
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};

use crate::{
    ARG_CHANGESET, ARG_DATABASE, ARG_TAG, ARG_USER, CliError, DEFAULT_DATABASE,
    ENV_CLOSE_CHANGESET, ENV_CLOSE_USER, ENV_OPEN_USER, block_on, fs::require_existing,
    write_json,
};

/// CLI arguments for the `open-changeset` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(about = "Open a changeset and print its id")]
#[ortho_config(prefix = "MAPDIFF")]
pub(crate) struct OpenChangesetArgs {
    /// Path to an initialised SQLite database.
    #[arg(long = ARG_DATABASE, value_name = "path")]
    #[serde(default)]
    pub(crate) database: Option<Utf8PathBuf>,
    /// Id of the user opening the changeset.
    #[arg(long = ARG_USER, value_name = "id")]
    #[serde(default)]
    pub(crate) user: Option<i64>,
    /// Changeset tag written as key=value; repeat for several tags.
    #[arg(long = ARG_TAG, value_name = "key=value")]
    #[serde(default)]
    pub(crate) tag: Vec<String>,
}

/// Resolved `open-changeset` configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OpenChangesetConfig {
    pub(crate) database: Utf8PathBuf,
    pub(crate) user_id: i64,
    pub(crate) tags: Tags,
}

impl TryFrom<OpenChangesetArgs> for OpenChangesetConfig {
    type Error = CliError;

    fn try_from(args: OpenChangesetArgs) -> Result<Self, Self::Error> {
        let user_id = args.user.ok_or(CliError::MissingArgument {
            field: ARG_USER,
            env: ENV_OPEN_USER,
        })?;
        let tags = args
            .tag
            .iter()
            .map(|tag| parse_tag(tag))
            .collect::<Result<Tags, _>>()?;
        Ok(Self {
            database: args
                .database
                .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_DATABASE)),
            user_id,
            tags,
        })
    }
}

/// Split `key=value`; the key must be non-empty, the value may be.
pub(crate) fn parse_tag(tag: &str) -> Result<(String, String), CliError> {
    match tag.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_owned(), value.to_owned())),
        _ => Err(CliError::InvalidTag {
            tag: tag.to_owned(),
        }),
    }
}

/// CLI arguments for the `close-changeset` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(about = "Close an open changeset")]
#[ortho_config(prefix = "MAPDIFF")]
pub(crate) struct CloseChangesetArgs {
    /// Path to an initialised SQLite database.
    #[arg(long = ARG_DATABASE, value_name = "path")]
    #[serde(default)]
    pub(crate) database: Option<Utf8PathBuf>,
    /// Id of the user owning the changeset.
    #[arg(long = ARG_USER, value_name = "id")]
    #[serde(default)]
    pub(crate) user: Option<i64>,
    /// Changeset to close.
    #[arg(long = ARG_CHANGESET, value_name = "id")]
    #[serde(default)]
    pub(crate) changeset: Option<i64>,
}

/// Resolved `close-changeset` configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CloseChangesetConfig {
    pub(crate) database: Utf8PathBuf,
    pub(crate) user_id: i64,
    pub(crate) changeset_id: i64,
}

impl TryFrom<CloseChangesetArgs> for CloseChangesetConfig {
    type Error = CliError;

    fn try_from(args: CloseChangesetArgs) -> Result<Self, Self::Error> {
        let user_id = args.user.ok_or(CliError::MissingArgument {
            field: ARG_USER,
            env: ENV_CLOSE_USER,
        })?;
        let changeset_id = args.changeset.ok_or(CliError::MissingArgument {
            field: ARG_CHANGESET,
            env: ENV_CLOSE_CHANGESET,
        })?;
        Ok(Self {
            database: args
                .database
                .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_DATABASE)),
            user_id,
            changeset_id,
        })
    }
}

#[derive(Debug, Serialize)]
struct ChangesetReport {
    changeset_id: i64,
    open: bool,
}

pub(crate) fn run_open_changeset(
    args: OpenChangesetArgs,
    writer: &mut dyn Write,
) -> Result<(), CliError> {
    let merged = args.load_and_merge().map_err(CliError::Configuration)?;
    let config = OpenChangesetConfig::try_from(merged)?;
    require_existing(&config.database, ARG_DATABASE)?;
    let executor = SqliteExecutor::open(config.database.clone());
    let changeset_id = block_on(open_changeset(&executor, config.user_id, &config.tags))??;
    write_json(
        writer,
        &ChangesetReport {
            changeset_id,
            open: true,
        },
    )
}

pub(crate) fn run_close_changeset(
    args: CloseChangesetArgs,
    writer: &mut dyn Write,
) -> Result<(), CliError> {
    let merged = args.load_and_merge().map_err(CliError::Configuration)?;
    let config = CloseChangesetConfig::try_from(merged)?;
    require_existing(&config.database, ARG_DATABASE)?;
    let executor = SqliteExecutor::open(config.database.clone());
    block_on(close_changeset(
        &executor,
        config.changeset_id,
        config.user_id,
    ))??;
    write_json(
        writer,
        &ChangesetReport {
            changeset_id: config.changeset_id,
            open: false,
        },
    )
}
