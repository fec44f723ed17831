//! SQLite implementation of the execution interface.
//!
//! Every session owns one connection. Statements run on Tokio's blocking
//! pool so callers on an async executor never block on disk I/O.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use log::debug;
use rusqlite::{
    Connection, ErrorCode, ToSql,
    types::{ToSqlOutput, ValueRef},
};

use super::{ExecError, Executor, Row, Session, Value};

/// Default time a statement waits for a competing writer.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for [`SqliteExecutor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteExecutorConfig {
    /// Database file.
    pub path: Utf8PathBuf,
    /// How long a statement waits on a locked database before failing.
    pub busy_timeout: Duration,
}

impl SqliteExecutorConfig {
    /// Configuration for the database at `path` with default settings.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    /// Set the busy timeout.
    #[must_use]
    pub const fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }
}

/// Hands out one fresh SQLite connection per session.
///
/// # Examples
/// ```no_run
/// use mapdiff_data::exec::{Executor, Session, sqlite::SqliteExecutor};
///
/// # async fn demo() -> Result<(), mapdiff_data::exec::ExecError> {
/// let executor = SqliteExecutor::open("mapdiff.db");
/// let session = executor.acquire().await?;
/// let rows = session.query("SELECT COUNT(*) AS total FROM changesets", &[]).await?;
/// println!("{}", rows[0].get_i64("total")?);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SqliteExecutor {
    config: SqliteExecutorConfig,
}

impl SqliteExecutor {
    /// Executor for the database at `path` with default settings.
    #[must_use]
    pub fn open(path: impl Into<Utf8PathBuf>) -> Self {
        Self::with_config(SqliteExecutorConfig::new(path))
    }

    /// Executor with explicit configuration.
    #[must_use]
    pub const fn with_config(config: SqliteExecutorConfig) -> Self {
        Self { config }
    }

    /// Database file backing this executor.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.config.path
    }
}

#[async_trait(?Send)]
impl Executor for SqliteExecutor {
    type Session = SqliteSession;

    async fn acquire(&self) -> Result<Self::Session, ExecError> {
        let config = self.config.clone();
        let connection = tokio::task::spawn_blocking(move || open_connection(&config))
            .await
            .map_err(|err| ExecError::Connection {
                message: "connection task did not complete".to_owned(),
                source: Some(Box::new(err)),
            })??;
        Ok(SqliteSession {
            connection: Arc::new(Mutex::new(connection)),
        })
    }
}

fn open_connection(config: &SqliteExecutorConfig) -> Result<Connection, ExecError> {
    let connect_error = |source: rusqlite::Error| ExecError::Connection {
        message: format!("failed to open {}", config.path),
        source: Some(Box::new(source)),
    };
    let connection = Connection::open(config.path.as_std_path()).map_err(connect_error)?;
    connection
        .busy_timeout(config.busy_timeout)
        .map_err(connect_error)?;
    connection
        .pragma_update(None, "foreign_keys", true)
        .map_err(connect_error)?;
    debug!("Opened SQLite session on {}", config.path);
    Ok(connection)
}

/// A session bound to one SQLite connection.
#[derive(Debug, Clone)]
pub struct SqliteSession {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteSession {
    async fn run<T, F>(&self, sql: &str, work: F) -> Result<T, ExecError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let connection = Arc::clone(&self.connection);
        let outcome = tokio::task::spawn_blocking(move || {
            let guard = connection.lock().map_err(|_| None::<rusqlite::Error>)?;
            work(&guard).map_err(Some)
        })
        .await
        .map_err(|err| ExecError::Connection {
            message: "statement task did not complete".to_owned(),
            source: Some(Box::new(err)),
        })?;
        outcome.map_err(|failure| match failure {
            None => ExecError::Connection {
                message: "session connection lock was poisoned".to_owned(),
                source: None,
            },
            Some(source) => statement_error(sql, source),
        })
    }
}

fn statement_error(sql: &str, source: rusqlite::Error) -> ExecError {
    let busy = matches!(
        source.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    );
    if busy {
        ExecError::Timeout {
            sql: sql.to_owned(),
        }
    } else {
        ExecError::Statement {
            sql: sql.to_owned(),
            source: Box::new(source),
        }
    }
}

#[async_trait(?Send)]
impl Session for SqliteSession {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, ExecError> {
        let statement = sql.to_owned();
        let bound = params.to_vec();
        let affected = self
            .run(sql, move |connection| {
                let mut prepared = connection.prepare_cached(&statement)?;
                prepared.execute(rusqlite::params_from_iter(bound.iter()))
            })
            .await?;
        Ok(u64::try_from(affected).unwrap_or(u64::MAX))
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, ExecError> {
        let statement = sql.to_owned();
        let bound = params.to_vec();
        self.run(sql, move |connection| {
            let mut prepared = connection.prepare_cached(&statement)?;
            let columns: Arc<[String]> = prepared
                .column_names()
                .into_iter()
                .map(str::to_owned)
                .collect();
            let mut rows = prepared.query(rusqlite::params_from_iter(bound.iter()))?;
            let mut collected = Vec::new();
            while let Some(row) = rows.next()? {
                let values = (0..columns.len())
                    .map(|position| row.get_ref(position).map(value_from_ref))
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                collected.push(Row::new(Arc::clone(&columns), values));
            }
            Ok(collected)
        })
        .await
    }

    async fn begin(&self) -> Result<(), ExecError> {
        const SQL: &str = "BEGIN IMMEDIATE";
        self.run(SQL, |connection| connection.execute_batch(SQL))
            .await
    }

    async fn commit(&self) -> Result<(), ExecError> {
        const SQL: &str = "COMMIT";
        self.run(SQL, |connection| connection.execute_batch(SQL))
            .await
    }

    async fn rollback(&self) -> Result<(), ExecError> {
        const SQL: &str = "ROLLBACK";
        self.run(SQL, |connection| connection.execute_batch(SQL))
            .await
    }

    async fn now(&self) -> Result<String, ExecError> {
        const SQL: &str = "SELECT strftime('%Y-%m-%dT%H:%M:%SZ', 'now')";
        self.run(SQL, |connection| {
            connection.query_row(SQL, [], |row| row.get::<_, String>(0))
        })
        .await
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Self::Integer(value) => ToSqlOutput::Borrowed(ValueRef::Integer(*value)),
            Self::Real(value) => ToSqlOutput::Borrowed(ValueRef::Real(*value)),
            Self::Text(value) => ToSqlOutput::Borrowed(ValueRef::Text(value.as_bytes())),
        })
    }
}

fn value_from_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(integer) => Value::Integer(integer),
        ValueRef::Real(real) => Value::Real(real),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}
