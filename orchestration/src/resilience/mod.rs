//! Resilience layer: circuit breaker, result cache and execution-time guard.

pub mod cache;
pub mod circuit_breaker;
pub mod guard;

pub use cache::{CacheOutcome, Fingerprint, ResultCache};
pub use circuit_breaker::{Admission, CircuitBreaker, CircuitBreakerSnapshot, CircuitState};
pub use guard::{run_async, run_blocking, run_spawned, ExecutionBudget, GuardError};
