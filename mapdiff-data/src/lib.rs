//! Persistence and transactional apply logic for mapdiff.
//!
//! Responsibilities:
//! - Apply change batches to changesets atomically.
//! - Maintain current state and append-only history for every element.
//! - Manage changeset lifecycle and accounting.
//! - Provide the execution interface and its SQLite backend.
//!
//! Boundaries:
//! - Do not parse or schedule batches (live in `mapdiff-core`).
//! - Keep blocking I/O off async executors; SQLite runs on the blocking pool.
//!
//! Invariants:
//! - A batch either commits in full or leaves no trace.
//! - Every statement of one batch runs on one session.
//! - No global mutable state.

mod changeset;
mod engine;
mod error;
pub mod exec;
mod history;
#[cfg(feature = "store-sqlite")]
mod schema;
mod transaction;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use changeset::{
    Changeset, close_changeset, ensure_capacity, ensure_writable, load_changeset, open_changeset,
};
pub use engine::{ChangesetEngine, DEFAULT_MAX_CHANGESET_CHANGES, EngineConfig};
pub use error::{ChangeError, ChangesetRejection, ErrorCategory};
pub use history::{AppliedChange, BatchContext, write_record};
#[cfg(feature = "store-sqlite")]
pub use schema::{SCHEMA_VERSION, SEQUENCES, SchemaError, initialise_schema};
