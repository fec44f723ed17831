//! `init` command: install the store schema.

use std::io::Write;

use camino::Utf8PathBuf;
use clap::Parser;
use mapdiff_data::{SCHEMA_VERSION, initialise_schema};
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::{ARG_DATABASE, CliError, DEFAULT_DATABASE, write_json};

/// CLI arguments for the `init` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    long_about = "Create the changeset, element and history tables in a \
                 SQLite database. Running it again on an initialised \
                 database is a no-op.",
    about = "Create the store schema"
)]
#[ortho_config(prefix = "MAPDIFF")]
pub(crate) struct InitArgs {
    /// Path to the SQLite database; created when missing.
    #[arg(long = ARG_DATABASE, value_name = "path")]
    #[serde(default)]
    pub(crate) database: Option<Utf8PathBuf>,
}

/// Resolved `init` configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct InitConfig {
    pub(crate) database: Utf8PathBuf,
}

impl From<InitArgs> for InitConfig {
    fn from(args: InitArgs) -> Self {
        Self {
            database: args
                .database
                .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_DATABASE)),
        }
    }
}

#[derive(Debug, Serialize)]
struct InitReport<'a> {
    database: &'a str,
    schema_version: i64,
}

pub(crate) fn run_init(args: InitArgs, writer: &mut dyn Write) -> Result<(), CliError> {
    let merged = args.load_and_merge().map_err(CliError::Configuration)?;
    let config = InitConfig::from(merged);
    initialise(&config)?;
    write_json(
        writer,
        &InitReport {
            database: config.database.as_str(),
            schema_version: SCHEMA_VERSION,
        },
    )
}

pub(crate) fn initialise(config: &InitConfig) -> Result<(), CliError> {
    let mut connection =
        Connection::open(config.database.as_std_path()).map_err(|source| {
            CliError::OpenDatabase {
                path: config.database.clone(),
                source,
            }
        })?;
    initialise_schema(&mut connection).map_err(|source| CliError::InitialiseSchema {
        path: config.database.clone(),
        source,
    })
}
