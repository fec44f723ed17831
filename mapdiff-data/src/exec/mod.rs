//! SQL execution interface used by the apply engine.
//!
//! The engine only ever talks to the store through [`Session`], so any
//! backend able to run parameterised statements inside a transaction can
//! host it. Statements issued on one session observe each other's
//! uncommitted effects.

use std::{error::Error as StdError, fmt, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;

#[cfg(feature = "store-sqlite")]
pub mod sqlite;

/// A bound parameter or a column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL `NULL`.
    Null,
    /// 64-bit signed integer.
    Integer(i64),
    /// Double-precision float.
    Real(f64),
    /// UTF-8 text.
    Text(String),
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Real(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "{value:?}"),
        }
    }
}

/// One result row with named columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    /// Build a row from shared column names and its values.
    #[must_use]
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Raw value of a column.
    ///
    /// # Errors
    /// Returns [`ExecError::Column`] when the row has no such column.
    pub fn get(&self, column: &str) -> Result<&Value, ExecError> {
        self.columns
            .iter()
            .position(|name| name == column)
            .and_then(|position| self.values.get(position))
            .ok_or_else(|| ExecError::Column {
                column: column.to_owned(),
                expected: "a present column",
            })
    }

    /// Integer column value.
    ///
    /// # Errors
    /// Returns [`ExecError::Column`] for a missing, null or non-integer
    /// column.
    pub fn get_i64(&self, column: &str) -> Result<i64, ExecError> {
        self.get_opt_i64(column)?.ok_or_else(|| ExecError::Column {
            column: column.to_owned(),
            expected: "a non-null integer",
        })
    }

    /// Nullable integer column value.
    ///
    /// # Errors
    /// Returns [`ExecError::Column`] for a missing or non-integer column.
    pub fn get_opt_i64(&self, column: &str) -> Result<Option<i64>, ExecError> {
        match self.get(column)? {
            Value::Null => Ok(None),
            Value::Integer(value) => Ok(Some(*value)),
            Value::Real(_) | Value::Text(_) => Err(ExecError::Column {
                column: column.to_owned(),
                expected: "an integer",
            }),
        }
    }

    /// Boolean stored as an integer flag.
    ///
    /// # Errors
    /// As [`Row::get_i64`].
    pub fn get_bool(&self, column: &str) -> Result<bool, ExecError> {
        self.get_i64(column).map(|flag| flag != 0)
    }

    /// Text column value.
    ///
    /// # Errors
    /// Returns [`ExecError::Column`] for a missing, null or non-text column.
    pub fn get_str(&self, column: &str) -> Result<&str, ExecError> {
        self.get_opt_str(column)?.ok_or_else(|| ExecError::Column {
            column: column.to_owned(),
            expected: "non-null text",
        })
    }

    /// Nullable text column value.
    ///
    /// # Errors
    /// Returns [`ExecError::Column`] for a missing or non-text column.
    pub fn get_opt_str(&self, column: &str) -> Result<Option<&str>, ExecError> {
        match self.get(column)? {
            Value::Null => Ok(None),
            Value::Text(value) => Ok(Some(value.as_str())),
            Value::Integer(_) | Value::Real(_) => Err(ExecError::Column {
                column: column.to_owned(),
                expected: "text",
            }),
        }
    }
}

/// Errors raised by an execution backend.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExecError {
    /// A statement failed to prepare or run.
    #[error("statement failed: {sql}")]
    Statement {
        /// The statement text.
        sql: String,
        /// Backend error.
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
    /// A connection could not be opened or has become unusable.
    #[error("connection failed: {message}")]
    Connection {
        /// What was being attempted.
        message: String,
        /// Backend error, when one is available.
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },
    /// The store stayed locked beyond the configured busy timeout.
    #[error("timed out waiting for the store lock: {sql}")]
    Timeout {
        /// The statement that could not acquire the lock.
        sql: String,
    },
    /// A statement expected to return a row returned none.
    #[error("statement returned no rows: {sql}")]
    NoRows {
        /// The statement text.
        sql: String,
    },
    /// A column was missing or held an unexpected type.
    #[error("column {column:?} did not hold {expected}")]
    Column {
        /// Column name.
        column: String,
        /// Description of the expected value.
        expected: &'static str,
    },
}

/// A dedicated connection able to run statements inside one transaction.
///
/// Methods take `&self` so that several statements may be in flight on the
/// same session; implementations serialise them internally.
#[async_trait(?Send)]
pub trait Session {
    /// Run a statement and return the number of affected rows.
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, ExecError>;

    /// Run a statement and collect its rows.
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, ExecError>;

    /// Start a write transaction.
    async fn begin(&self) -> Result<(), ExecError>;

    /// Commit the open transaction.
    async fn commit(&self) -> Result<(), ExecError>;

    /// Discard the open transaction.
    async fn rollback(&self) -> Result<(), ExecError>;

    /// Current UTC time as the store formats it, `YYYY-MM-DDTHH:MM:SSZ`.
    async fn now(&self) -> Result<String, ExecError>;

    /// Run a statement and return its first row, if any.
    async fn query_opt(&self, sql: &str, params: &[Value]) -> Result<Option<Row>, ExecError> {
        Ok(self.query(sql, params).await?.into_iter().next())
    }

    /// Run a statement that must return at least one row.
    async fn query_one(&self, sql: &str, params: &[Value]) -> Result<Row, ExecError> {
        self.query_opt(sql, params)
            .await?
            .ok_or_else(|| ExecError::NoRows {
                sql: sql.to_owned(),
            })
    }
}

/// Source of dedicated sessions.
#[async_trait(?Send)]
pub trait Executor {
    /// Session type handed out by this executor.
    type Session: Session;

    /// Acquire a session for exclusive use by one caller.
    async fn acquire(&self) -> Result<Self::Session, ExecError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn row() -> Row {
        let columns: Arc<[String]> = vec!["id".to_owned(), "name".to_owned(), "closed".to_owned()]
            .into();
        Row::new(
            columns,
            vec![Value::Integer(4), Value::from("cafe"), Value::Null],
        )
    }

    #[rstest]
    fn reads_typed_columns(row: Row) {
        assert_eq!(row.get_i64("id").expect("id"), 4);
        assert_eq!(row.get_str("name").expect("name"), "cafe");
        assert_eq!(row.get_opt_str("closed").expect("closed"), None);
        assert!(row.get_bool("id").expect("flag"));
    }

    #[rstest]
    #[case("missing")]
    #[case("closed")]
    #[case("name")]
    fn rejects_unusable_integer_columns(row: Row, #[case] column: &str) {
        let err = row.get_i64(column).expect_err("not an integer");
        assert!(matches!(err, ExecError::Column { .. }));
    }

    #[rstest]
    fn optional_values_convert_to_null() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some(3_i64)), Value::Integer(3));
        assert_eq!(Value::from(true), Value::Integer(1));
    }
}
