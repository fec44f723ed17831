//! `upload` command: apply a JSON change batch to a changeset.

use std::io::{BufReader, Write};

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use mapdiff_core::{ChangeResult, RawChangeBatch};
use mapdiff_data::{ChangesetEngine, EngineConfig, exec::sqlite::SqliteExecutor};
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};

use crate::{
    ARG_CHANGESET, ARG_DATABASE, ARG_DIFF, ARG_MAX_CHANGES, ARG_USER, CliError, DEFAULT_DATABASE,
    ENV_UPLOAD_CHANGESET, ENV_UPLOAD_DIFF, ENV_UPLOAD_USER, block_on,
    fs::{open_utf8_file, require_existing},
    write_json,
};

/// CLI arguments for the `upload` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    long_about = "Apply a change batch to an open changeset. The batch is a \
                 JSON array of action blocks, each holding groups of node, \
                 way or relation elements. Either every change is applied \
                 or none is; the per-element results are printed as JSON.",
    about = "Apply a change batch"
)]
#[ortho_config(prefix = "MAPDIFF")]
pub(crate) struct UploadArgs {
    /// Path to the JSON change batch.
    #[arg(value_name = "diff.json")]
    #[serde(default)]
    pub(crate) diff: Option<Utf8PathBuf>,
    /// Path to an initialised SQLite database.
    #[arg(long = ARG_DATABASE, value_name = "path")]
    #[serde(default)]
    pub(crate) database: Option<Utf8PathBuf>,
    /// Id of the user uploading the batch.
    #[arg(long = ARG_USER, value_name = "id")]
    #[serde(default)]
    pub(crate) user: Option<i64>,
    /// Changeset receiving the batch.
    #[arg(long = ARG_CHANGESET, value_name = "id")]
    #[serde(default)]
    pub(crate) changeset: Option<i64>,
    /// Override the per-changeset change limit.
    #[arg(long = ARG_MAX_CHANGES, value_name = "count")]
    #[serde(default)]
    pub(crate) max_changes: Option<i64>,
}

/// Resolved `upload` configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UploadConfig {
    pub(crate) diff: Utf8PathBuf,
    pub(crate) database: Utf8PathBuf,
    pub(crate) user_id: i64,
    pub(crate) changeset_id: i64,
    pub(crate) engine: EngineConfig,
}

impl UploadConfig {
    pub(crate) fn validate_sources(&self) -> Result<(), CliError> {
        require_existing(&self.diff, ARG_DIFF)?;
        require_existing(&self.database, ARG_DATABASE)?;
        Ok(())
    }
}

impl TryFrom<UploadArgs> for UploadConfig {
    type Error = CliError;

    fn try_from(args: UploadArgs) -> Result<Self, Self::Error> {
        let diff = args.diff.ok_or(CliError::MissingArgument {
            field: ARG_DIFF,
            env: ENV_UPLOAD_DIFF,
        })?;
        let user_id = args.user.ok_or(CliError::MissingArgument {
            field: ARG_USER,
            env: ENV_UPLOAD_USER,
        })?;
        let changeset_id = args.changeset.ok_or(CliError::MissingArgument {
            field: ARG_CHANGESET,
            env: ENV_UPLOAD_CHANGESET,
        })?;
        let engine = args
            .max_changes
            .map_or_else(EngineConfig::default, |limit| {
                EngineConfig::default().with_max_changeset_changes(limit)
            });
        Ok(Self {
            diff,
            database: args
                .database
                .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_DATABASE)),
            user_id,
            changeset_id,
            engine,
        })
    }
}

pub(crate) fn run_upload(args: UploadArgs, writer: &mut dyn Write) -> Result<(), CliError> {
    let merged = args.load_and_merge().map_err(CliError::Configuration)?;
    let config = UploadConfig::try_from(merged)?;
    let results = execute_upload(&config)?;
    write_json(writer, &results)
}

pub(crate) fn execute_upload(config: &UploadConfig) -> Result<Vec<ChangeResult>, CliError> {
    config.validate_sources()?;
    let batch = load_diff(&config.diff)?;
    let engine = ChangesetEngine::with_config(
        SqliteExecutor::open(config.database.clone()),
        config.engine,
    );
    let results = block_on(engine.apply(config.changeset_id, config.user_id, &batch))??;
    Ok(results)
}

/// Loads a JSON-encoded [`RawChangeBatch`] from disk.
pub(crate) fn load_diff(path: &Utf8Path) -> Result<RawChangeBatch, CliError> {
    let file = open_utf8_file(path).map_err(|source| CliError::OpenDiff {
        path: path.to_path_buf(),
        source,
    })?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader).map_err(|source| CliError::ParseDiff {
        path: path.to_path_buf(),
        source,
    })
}
