//! Facade crate for the mapdiff changeset engine.
//!
//! This crate re-exports the batch model and planner from `mapdiff-core`
//! and the transactional apply engine from `mapdiff-data`. The SQLite
//! backend sits behind the `store-sqlite` feature.

#![forbid(unsafe_code)]

pub use mapdiff_core::{
    Action, ChangeRecord, ChangeResult, DiffError, ElementBody, ElementKind, ElementRef,
    MalformedReason, Member, RawChangeBatch, RawElement, RawMember, RawTag, Tags, Tier,
    plan_batch,
};

pub use mapdiff_data::{
    ChangeError, ChangesetEngine, ChangesetRejection, EngineConfig, ErrorCategory,
    close_changeset, load_changeset, open_changeset,
};

pub use mapdiff_data::exec::{ExecError, Executor, Session, Value};

#[cfg(feature = "store-sqlite")]
pub use mapdiff_data::{exec::sqlite::SqliteExecutor, initialise_schema};
