//! Role-Routed Orchestration Library
//!
//! This library provides:
//! - A decomposer that splits a request into scored sub-tasks and an execution plan
//! - A capability router that picks one of five roles for a request
//! - An orchestration coordinator with caching, circuit breaking, metrics,
//!   health reporting and quality scoring
//!
//! # Roles
//!
//! `analyst`, `synthesizer`, `specialist`, `coordinator` (also the fallback
//! for malformed input) and `validator`.
//!
//! # Usage
//!
//! ```rust,ignore
//! use orchestration::{OrchestrationConfig, OrchestrationCoordinator};
//! use serde_json::json;
//!
//! let coordinator = OrchestrationCoordinator::with_defaults(OrchestrationConfig::default());
//! let result = coordinator
//!     .process_query("Analyze customer purchase patterns", &json!({"data": true}))
//!     .await?;
//! assert_eq!(result.routing.selected_role.as_str(), "analyst");
//! ```

pub mod config;
pub mod context;
pub mod coordinator;
pub mod decomposer;
pub mod resilience;
pub mod router;

pub use config::{
    ConfigError, CoordinatorConfig, DecomposerConfig, OrchestrationConfig, RouterConfig,
    ScoringWeights,
};
pub use context::{ComplexityLevel, Context, Request, Requirements, Urgency};
pub use coordinator::{
    CoordinatorMetrics, CoordinatorResult, ExecutionError, ExecutionOutput, Executor,
    HealthState, HealthStatus, HttpExecutor, HttpExecutorConfig, OrchestrationCoordinator,
    OrchestrationError, OrchestrationResult, PerformanceStatus, PipelineStage, PlanExecutor,
    QualityMetrics, ResultStatus, SharedCoordinator, WorkflowPlan,
};
pub use decomposer::{
    Decomposer, Decomposition, DecompositionError, DecompositionResult, ExecutionStep,
    HeuristicDecomposer, SubTask, TerminationReason,
};
pub use resilience::{CircuitBreakerSnapshot, CircuitState, Fingerprint};
pub use router::{
    CapabilityRouter, Role, Router, RouterMetrics, RoutingDecision, RoutingError, RoutingResult,
};
