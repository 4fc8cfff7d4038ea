//! Execution-time guard for engine and executor calls.
//!
//! Synchronous engines run on the blocking pool; async work runs inline or
//! as a spawned task.
//! Both are bounded by an [`ExecutionBudget`], and a stalled or panicking
//! call comes back as a [`GuardError`] instead of hanging the caller.
//!
//! ```rust,ignore
//! let budget = ExecutionBudget::new().timeout_ms(2_000);
//! let decomposition = run_blocking(&budget, move || decomposer.decompose(&q, &ctx)).await?;
//! ```

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Wall-clock budget for one guarded call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionBudget {
    /// Maximum wall-clock time in milliseconds (0 = unlimited).
    pub timeout_ms: u64,
}

impl ExecutionBudget {
    /// Unlimited budget.
    pub fn new() -> Self {
        Self { timeout_ms: 0 }
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }

    /// The timeout as a Duration, or None if unlimited.
    pub fn timeout_duration(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

impl Default for ExecutionBudget {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    #[error("timed out after {timeout_ms}ms")]
    TimedOut { timeout_ms: u64 },

    #[error("engine panicked: {message}")]
    Panicked { message: String },
}

/// Run a synchronous closure on the blocking pool within `budget`.
///
/// On timeout the blocking thread is left to finish on its own; its result
/// is discarded.
pub async fn run_blocking<T, F>(budget: &ExecutionBudget, f: F) -> Result<T, GuardError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::task::spawn_blocking(f);
    let joined = match budget.timeout_duration() {
        Some(limit) => tokio::time::timeout(limit, handle)
            .await
            .map_err(|_| GuardError::TimedOut {
                timeout_ms: budget.timeout_ms,
            })?,
        None => handle.await,
    };
    joined.map_err(|e| GuardError::Panicked {
        message: join_error_message(e),
    })
}

/// Bound an async operation by `budget`.
pub async fn run_async<T, Fut>(budget: &ExecutionBudget, fut: Fut) -> Result<T, GuardError>
where
    Fut: Future<Output = T>,
{
    match budget.timeout_duration() {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| GuardError::TimedOut {
                timeout_ms: budget.timeout_ms,
            }),
        None => Ok(fut.await),
    }
}

/// Spawn an async operation as its own task and bound it by `budget`.
///
/// Unlike [`run_async`], a panic inside the task is caught, and the task is
/// aborted when the budget runs out.
pub async fn run_spawned<T, Fut>(budget: &ExecutionBudget, fut: Fut) -> Result<T, GuardError>
where
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let mut handle = tokio::spawn(fut);
    let joined = match run_async(budget, &mut handle).await {
        Ok(joined) => joined,
        Err(timeout) => {
            handle.abort();
            return Err(timeout);
        }
    };
    joined.map_err(|e| GuardError::Panicked {
        message: join_error_message(e),
    })
}

fn join_error_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return "task cancelled".to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
