//! Test doubles for the execution interface.
//!
//! [`FaultyExecutor`] wraps any [`Executor`], records every statement its
//! sessions run and can fail chosen statements on demand.

use std::{cell::RefCell, future::Future, io, rc::Rc};

use async_trait::async_trait;

use crate::exec::{ExecError, Executor, Row, Session, Value};

/// Statement that should fail when it is run.
#[derive(Debug, Clone, PartialEq)]
struct Fault {
    needle: String,
    param: Option<Value>,
}

impl Fault {
    fn matches(&self, sql: &str, params: &[Value]) -> bool {
        sql.contains(&self.needle)
            && self
                .param
                .as_ref()
                .is_none_or(|wanted| params.contains(wanted))
    }
}

/// Executor wrapper that logs statements and injects failures.
///
/// # Examples
/// ```
/// use mapdiff_data::{
///     exec::{Executor, Session},
///     test_support::{FaultyExecutor, block_on},
/// };
/// # use mapdiff_data::exec::{ExecError, Row, Value};
/// # struct Nothing;
/// # #[async_trait::async_trait(?Send)]
/// # impl Session for Nothing {
/// #     async fn execute(&self, _: &str, _: &[Value]) -> Result<u64, ExecError> { Ok(0) }
/// #     async fn query(&self, _: &str, _: &[Value]) -> Result<Vec<Row>, ExecError> { Ok(Vec::new()) }
/// #     async fn begin(&self) -> Result<(), ExecError> { Ok(()) }
/// #     async fn commit(&self) -> Result<(), ExecError> { Ok(()) }
/// #     async fn rollback(&self) -> Result<(), ExecError> { Ok(()) }
/// #     async fn now(&self) -> Result<String, ExecError> { Ok(String::new()) }
/// # }
/// # struct NothingExecutor;
/// # #[async_trait::async_trait(?Send)]
/// # impl Executor for NothingExecutor {
/// #     type Session = Nothing;
/// #     async fn acquire(&self) -> Result<Nothing, ExecError> { Ok(Nothing) }
/// # }
///
/// let executor = FaultyExecutor::new(NothingExecutor).failing_on("DELETE");
/// let session = block_on(executor.acquire()).expect("session");
/// assert!(block_on(session.execute("DELETE FROM t", &[])).is_err());
/// assert_eq!(executor.statements(), vec!["DELETE FROM t".to_owned()]);
/// ```
#[derive(Debug, Clone)]
pub struct FaultyExecutor<E> {
    inner: E,
    log: Rc<RefCell<Vec<String>>>,
    fault: Option<Fault>,
}

impl<E> FaultyExecutor<E> {
    /// Wrap `inner` without injecting any failure.
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            log: Rc::default(),
            fault: None,
        }
    }

    /// Fail every statement whose text contains `needle`.
    #[must_use]
    pub fn failing_on(mut self, needle: &str) -> Self {
        self.fault = Some(Fault {
            needle: needle.to_owned(),
            param: None,
        });
        self
    }

    /// Fail statements containing `needle` that also bind `param`.
    #[must_use]
    pub fn failing_on_param(mut self, needle: &str, param: impl Into<Value>) -> Self {
        self.fault = Some(Fault {
            needle: needle.to_owned(),
            param: Some(param.into()),
        });
        self
    }

    /// Every statement run so far, in order, including transaction control.
    pub fn statements(&self) -> Vec<String> {
        self.log.borrow().clone()
    }

    /// Forget the recorded statements.
    pub fn clear(&self) {
        self.log.borrow_mut().clear();
    }

    /// The wrapped executor.
    pub const fn inner(&self) -> &E {
        &self.inner
    }
}

#[async_trait(?Send)]
impl<E: Executor> Executor for FaultyExecutor<E> {
    type Session = FaultySession<E::Session>;

    async fn acquire(&self) -> Result<Self::Session, ExecError> {
        Ok(FaultySession {
            inner: self.inner.acquire().await?,
            log: Rc::clone(&self.log),
            fault: self.fault.clone(),
        })
    }
}

/// Session handed out by [`FaultyExecutor`].
#[derive(Debug)]
pub struct FaultySession<S> {
    inner: S,
    log: Rc<RefCell<Vec<String>>>,
    fault: Option<Fault>,
}

impl<S> FaultySession<S> {
    fn record(&self, sql: &str, params: &[Value]) -> Result<(), ExecError> {
        self.log.borrow_mut().push(sql.to_owned());
        match &self.fault {
            Some(fault) if fault.matches(sql, params) => Err(ExecError::Statement {
                sql: sql.to_owned(),
                source: Box::new(io::Error::other("injected fault")),
            }),
            _ => Ok(()),
        }
    }
}

#[async_trait(?Send)]
impl<S: Session> Session for FaultySession<S> {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, ExecError> {
        self.record(sql, params)?;
        self.inner.execute(sql, params).await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, ExecError> {
        self.record(sql, params)?;
        self.inner.query(sql, params).await
    }

    async fn begin(&self) -> Result<(), ExecError> {
        self.record("BEGIN", &[])?;
        self.inner.begin().await
    }

    async fn commit(&self) -> Result<(), ExecError> {
        self.record("COMMIT", &[])?;
        self.inner.commit().await
    }

    async fn rollback(&self) -> Result<(), ExecError> {
        self.record("ROLLBACK", &[])?;
        self.inner.rollback().await
    }

    async fn now(&self) -> Result<String, ExecError> {
        self.record("NOW", &[])?;
        self.inner.now().await
    }
}

/// Drive `future` to completion on a fresh current-thread runtime.
///
/// # Panics
/// Panics when the runtime cannot be built.
pub fn block_on<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("test runtime should build")
        .block_on(future)
}
