use crate::decomposer::DecompositionError;
use crate::router::RoutingError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::executor::ExecutionError;

/// Pipeline stage a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Decomposition,
    Routing,
    Execution,
    CircuitBreaker,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Decomposition => write!(f, "LAG processing"),
            Self::Routing => write!(f, "RCR routing"),
            Self::Execution => write!(f, "Execution"),
            Self::CircuitBreaker => write!(f, "Circuit breaker"),
        }
    }
}

/// Error type for coordinator operations.
///
/// Messages start with a stable stage prefix so callers can branch on the
/// failing stage from the text alone.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error("LAG processing failed: {0}")]
    Decomposition(#[source] DecompositionError),

    #[error("RCR routing failed: {0}")]
    Routing(#[source] RoutingError),

    #[error("Execution failed: {0}")]
    Execution(#[source] ExecutionError),

    #[error("{stage} failed: timed out after {timeout_ms}ms")]
    Timeout { stage: PipelineStage, timeout_ms: u64 },

    #[error("{stage} failed: engine panicked: {message}")]
    EnginePanicked { stage: PipelineStage, message: String },

    #[error("Circuit breaker is open; retry in {}ms", retry_after.as_millis())]
    CircuitBreakerOpen { retry_after: Duration },
}

impl OrchestrationError {
    pub fn stage(&self) -> PipelineStage {
        match self {
            Self::Decomposition(_) => PipelineStage::Decomposition,
            Self::Routing(_) => PipelineStage::Routing,
            Self::Execution(_) => PipelineStage::Execution,
            Self::Timeout { stage, .. } | Self::EnginePanicked { stage, .. } => *stage,
            Self::CircuitBreakerOpen { .. } => PipelineStage::CircuitBreaker,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitBreakerOpen { .. })
    }
}

/// Result type for coordinator operations.
pub type CoordinatorResult<T> = Result<T, OrchestrationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_prefixes() {
        let err = OrchestrationError::Decomposition(DecompositionError::PlanConstruction {
            message: "no steps".into(),
        });
        assert!(err.to_string().starts_with("LAG processing failed: "));
        assert_eq!(err.stage(), PipelineStage::Decomposition);

        let err = OrchestrationError::Routing(RoutingError::ScoringFailed {
            message: "nan".into(),
        });
        assert!(err.to_string().starts_with("RCR routing failed: "));

        let err = OrchestrationError::Timeout {
            stage: PipelineStage::Routing,
            timeout_ms: 50,
        };
        assert_eq!(err.to_string(), "RCR routing failed: timed out after 50ms");
        assert_eq!(err.stage(), PipelineStage::Routing);
    }

    #[test]
    fn test_circuit_open_is_distinguishable() {
        let err = OrchestrationError::CircuitBreakerOpen {
            retry_after: Duration::from_millis(1500),
        };
        assert!(err.is_circuit_open());
        assert!(err.to_string().starts_with("Circuit breaker is open"));
        assert!(err.to_string().contains("1500ms"));
        assert_eq!(err.stage(), PipelineStage::CircuitBreaker);

        let err = OrchestrationError::EnginePanicked {
            stage: PipelineStage::Decomposition,
            message: "boom".into(),
        };
        assert!(!err.is_circuit_open());
        assert_eq!(err.to_string(), "LAG processing failed: engine panicked: boom");
    }
}
