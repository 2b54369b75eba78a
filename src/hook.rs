//! The two-phase hook contract invoked around every database operation.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use opentelemetry::Context;
use thiserror::Error;

use crate::arg::Arg;

/// Error type for execution failures handed to the after phase.
pub type OperationError = dyn StdError + Send + Sync + 'static;

/// Errors a hook may return to stop or fail an operation.
#[derive(Debug, Error)]
pub enum HookError {
    /// The hook refused to let the operation run.
    #[error("operation rejected by hook: {0}")]
    Rejected(String),

    #[error(transparent)]
    Other(#[from] Box<dyn StdError + Send + Sync>),
}

/// State of one database operation, threaded through both hook phases.
pub struct ContextHook<'a> {
    /// Execution context. Spans opened in the before phase are bound here.
    pub cx: Context,
    pub sql: &'a str,
    pub args: &'a [Arg],
    /// Error returned by the operation. Only set in the after phase.
    pub err: Option<&'a OperationError>,
    /// Time spent executing. Only set in the after phase.
    pub execute_time: Duration,
    start: Instant,
}

impl<'a> ContextHook<'a> {
    pub fn new(cx: Context, sql: &'a str, args: &'a [Arg]) -> Self {
        Self {
            cx,
            sql,
            args,
            err: None,
            execute_time: Duration::ZERO,
            start: Instant::now(),
        }
    }

    /// Close the execution window and attach the operation's error, if any.
    pub fn finish<'b>(self, err: Option<&'b OperationError>) -> ContextHook<'b>
    where
        'a: 'b,
    {
        ContextHook {
            cx: self.cx,
            sql: self.sql,
            args: self.args,
            err,
            execute_time: self.start.elapsed(),
            start: self.start,
        }
    }
}

impl fmt::Debug for ContextHook<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextHook")
            .field("sql", &self.sql)
            .field("args", &self.args)
            .field("err", &self.err.map(ToString::to_string))
            .field("execute_time", &self.execute_time)
            .finish_non_exhaustive()
    }
}

/// Interception points around a database operation.
///
/// `before_process` runs before the operation and returns the context the
/// operation continues with. `after_process` runs exactly once afterwards with
/// that context and the outcome.
pub trait Hook: Send + Sync {
    fn before_process(&self, c: &ContextHook<'_>) -> Result<Context, HookError>;

    fn after_process(&self, c: &ContextHook<'_>) -> Result<(), HookError>;
}

/// Hooks registered on a connection, run in registration order.
#[derive(Clone, Default)]
pub struct Hooks {
    hooks: Vec<Arc<dyn Hook>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_hook(&mut self, hook: impl Hook + 'static) {
        self.hooks.push(Arc::new(hook));
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Thread the context through every hook. Stops at the first error.
    ///
    /// When a hook rejects the operation, the hooks before it have already
    /// run their before phase; their after phase runs with the rejection as
    /// the error so anything they opened gets closed.
    pub fn before_process(&self, c: &ContextHook<'_>) -> Result<Context, HookError> {
        let mut step = ContextHook {
            cx: c.cx.clone(),
            sql: c.sql,
            args: c.args,
            err: c.err,
            execute_time: c.execute_time,
            start: c.start,
        };
        for (i, hook) in self.hooks.iter().enumerate() {
            match hook.before_process(&step) {
                Ok(cx) => step.cx = cx,
                Err(e) => {
                    unwind(&self.hooks[..i], step, &e);
                    return Err(e);
                }
            }
        }
        Ok(step.cx)
    }

    /// Run every hook, returning the first error any of them produced.
    pub fn after_process(&self, c: &ContextHook<'_>) -> Result<(), HookError> {
        let mut first_err = None;
        for hook in &self.hooks {
            if let Err(e) = hook.after_process(c) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

fn unwind(started: &[Arc<dyn Hook>], step: ContextHook<'_>, rejection: &HookError) {
    let c = step.finish(Some(rejection as &OperationError));
    for hook in started {
        if let Err(e) = hook.after_process(&c) {
            tracing::debug!(error = %e, "hook failed while unwinding a rejected operation");
        }
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks").field("len", &self.hooks.len()).finish()
    }
}
