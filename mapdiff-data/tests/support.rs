//! Shared fixtures for apply-engine behaviour tests.

use std::cell::{Cell, RefCell};

use camino::Utf8PathBuf;
use mapdiff_core::{ChangeResult, RawChangeBatch, Tags};
use mapdiff_data::{
    ChangeError, ChangesetEngine, EngineConfig, close_changeset,
    exec::{Value, sqlite::SqliteExecutor},
    initialise_schema, open_changeset,
    test_support::{FaultyExecutor, block_on},
};
use rusqlite::Connection;
use tempfile::TempDir;

/// User that uploads in every scenario.
pub const UPLOADER: i64 = 7;

/// Outcome of the last upload.
pub type Outcome = Option<Result<Vec<ChangeResult>, ChangeError>>;

/// A scratch database plus the state a scenario accumulates.
pub struct World {
    _dir: TempDir,
    path: Utf8PathBuf,
    /// Changeset targeted by uploads.
    pub changeset_id: Cell<i64>,
    /// Change limit used by the engine.
    pub limit: Cell<i64>,
    /// Statement to fail during the next upload, with a bound parameter.
    pub fault: RefCell<Option<(&'static str, Value)>>,
    /// Result of the last upload.
    pub outcome: RefCell<Outcome>,
    /// Statements run by the last upload.
    pub statements: RefCell<Vec<String>>,
    /// Node history rows present before the last upload.
    pub history_before: Cell<i64>,
}

impl World {
    /// Fresh database with the schema installed.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let path = Utf8PathBuf::from_path_buf(dir.path().join("mapdiff.db")).expect("utf-8 path");
        let mut connection = Connection::open(path.as_std_path()).expect("open database");
        initialise_schema(&mut connection).expect("install schema");
        Self {
            _dir: dir,
            path,
            changeset_id: Cell::new(0),
            limit: Cell::new(EngineConfig::default().max_changeset_changes),
            fault: RefCell::new(None),
            outcome: RefCell::new(None),
            statements: RefCell::new(Vec::new()),
            history_before: Cell::new(0),
        }
    }

    fn executor(&self) -> SqliteExecutor {
        SqliteExecutor::open(self.path.clone())
    }

    /// Open a changeset for `owner` and target it.
    pub fn open_changeset_for(&self, owner: i64) {
        let id = block_on(open_changeset(&self.executor(), owner, &Tags::new()))
            .expect("open changeset");
        self.changeset_id.set(id);
    }

    /// Close the targeted changeset.
    pub fn close_changeset(&self) {
        block_on(close_changeset(
            &self.executor(),
            self.changeset_id.get(),
            UPLOADER,
        ))
        .expect("close changeset");
    }

    /// Apply `batch` without faults and return its results.
    pub fn seed(&self, batch: &RawChangeBatch) -> Vec<ChangeResult> {
        let engine = ChangesetEngine::new(self.executor());
        block_on(engine.apply(self.changeset_id.get(), UPLOADER, batch)).expect("seed batch")
    }

    /// Apply `batch` through a recording executor and keep the outcome.
    pub fn upload(&self, batch: &RawChangeBatch) {
        let executor = match self.fault.borrow().clone() {
            Some((needle, param)) => {
                FaultyExecutor::new(self.executor()).failing_on_param(needle, param)
            }
            None => FaultyExecutor::new(self.executor()),
        };
        let config = EngineConfig::default().with_max_changeset_changes(self.limit.get());
        let engine = ChangesetEngine::with_config(executor, config);
        self.history_before
            .set(self.scalar("SELECT COUNT(*) FROM nodes"));
        let result = block_on(engine.apply(self.changeset_id.get(), UPLOADER, batch));
        *self.statements.borrow_mut() = engine.executor().statements();
        *self.outcome.borrow_mut() = Some(result);
    }

    /// Results of a successful upload.
    pub fn results(&self) -> Vec<ChangeResult> {
        self.outcome
            .borrow()
            .as_ref()
            .expect("an upload was attempted")
            .as_ref()
            .map(Clone::clone)
            .unwrap_or_else(|err| panic!("expected the upload to succeed: {err}"))
    }

    /// Check the error of a failed upload.
    pub fn assert_failed(&self, check: impl FnOnce(&ChangeError) -> bool) {
        let guard = self.outcome.borrow();
        match guard.as_ref().expect("an upload was attempted") {
            Ok(results) => panic!("expected the upload to fail, got {results:?}"),
            Err(err) => assert!(check(err), "unexpected error: {err:?}"),
        }
    }

    /// Run a single-integer query against the database.
    pub fn scalar(&self, sql: &str) -> i64 {
        let connection = Connection::open(self.path.as_std_path()).expect("open database");
        connection
            .query_row(sql, [], |row| row.get(0))
            .unwrap_or_else(|err| panic!("query {sql} failed: {err}"))
    }

    /// Run a query returning one integer per row.
    pub fn column(&self, sql: &str) -> Vec<i64> {
        let connection = Connection::open(self.path.as_std_path()).expect("open database");
        let mut statement = connection.prepare(sql).expect("prepare query");
        statement
            .query_map([], |row| row.get(0))
            .expect("run query")
            .collect::<Result<Vec<i64>, _>>()
            .expect("read rows")
    }

    /// Run a query returning two text columns per row.
    pub fn pairs(&self, sql: &str) -> Vec<(String, String)> {
        let connection = Connection::open(self.path.as_std_path()).expect("open database");
        let mut statement = connection.prepare(sql).expect("prepare query");
        statement
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .expect("run query")
            .collect::<Result<Vec<_>, _>>()
            .expect("read rows")
    }
}
