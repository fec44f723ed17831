//! Command-line interface for operating a mapdiff store.
#![forbid(unsafe_code)]

use std::{future::Future, io::Write};

use clap::{Parser, Subcommand};
use serde::Serialize;

mod changeset;
mod error;
mod fs;
mod init;
mod upload;

pub use error::CliError;

use changeset::{CloseChangesetArgs, OpenChangesetArgs, run_close_changeset, run_open_changeset};
use init::{InitArgs, run_init};
use upload::{UploadArgs, run_upload};

pub(crate) const ARG_DATABASE: &str = "database";
pub(crate) const ARG_USER: &str = "user";
pub(crate) const ARG_CHANGESET: &str = "changeset";
pub(crate) const ARG_DIFF: &str = "diff";
pub(crate) const ARG_MAX_CHANGES: &str = "max-changes";
pub(crate) const ARG_TAG: &str = "tag";
pub(crate) const ENV_OPEN_USER: &str = "MAPDIFF_CMDS_OPEN_CHANGESET_USER";
pub(crate) const ENV_CLOSE_USER: &str = "MAPDIFF_CMDS_CLOSE_CHANGESET_USER";
pub(crate) const ENV_CLOSE_CHANGESET: &str = "MAPDIFF_CMDS_CLOSE_CHANGESET_CHANGESET";
pub(crate) const ENV_UPLOAD_USER: &str = "MAPDIFF_CMDS_UPLOAD_USER";
pub(crate) const ENV_UPLOAD_CHANGESET: &str = "MAPDIFF_CMDS_UPLOAD_CHANGESET";
pub(crate) const ENV_UPLOAD_DIFF: &str = "MAPDIFF_CMDS_UPLOAD_DIFF";

/// Database file used when no path is configured.
pub const DEFAULT_DATABASE: &str = "mapdiff.db";

/// Run the mapdiff CLI with the current process arguments and environment.
///
/// # Errors
/// Returns a [`CliError`] describing the first failure.
pub fn run() -> Result<(), CliError> {
    let cli = Cli::try_parse().map_err(CliError::ArgumentParsing)?;
    let mut stdout = std::io::stdout().lock();
    dispatch(cli.command, &mut stdout)
}

fn dispatch(command: Command, writer: &mut dyn Write) -> Result<(), CliError> {
    match command {
        Command::Init(args) => run_init(args, writer),
        Command::OpenChangeset(args) => run_open_changeset(args, writer),
        Command::CloseChangeset(args) => run_close_changeset(args, writer),
        Command::Upload(args) => run_upload(args, writer),
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "mapdiff",
    about = "Apply OSM-style change batches to a versioned map store",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the store schema in a SQLite database.
    Init(InitArgs),
    /// Open a changeset for a user.
    OpenChangeset(OpenChangesetArgs),
    /// Close an open changeset.
    CloseChangeset(CloseChangesetArgs),
    /// Apply a JSON change batch to an open changeset.
    Upload(UploadArgs),
}

/// Drive `future` on a runtime owned by the current command.
pub(crate) fn block_on<F: Future>(future: F) -> Result<F::Output, CliError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;
    Ok(runtime.block_on(future))
}

/// Write `value` as pretty JSON followed by a newline.
pub(crate) fn write_json<T: Serialize>(writer: &mut dyn Write, value: &T) -> Result<(), CliError> {
    let payload = serde_json::to_string_pretty(value).map_err(CliError::SerialiseOutput)?;
    writer
        .write_all(payload.as_bytes())
        .map_err(CliError::WriteOutput)?;
    writer.write_all(b"\n").map_err(CliError::WriteOutput)?;
    Ok(())
}

#[cfg(test)]
mod tests;
