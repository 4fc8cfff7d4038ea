//! Capability Router
//!
//! Selects which role handles a request. Each role is scored on:
//! - Keyword and domain affinity
//! - Complexity band fit
//! - Context richness
//! - Recent load (ranking only, spreads sustained traffic)
//!
//! # Selection Strategy
//!
//! ```text
//! Input                               | Outcome
//! ------------------------------------|----------------------------------
//! Clear keyword/domain signal         | Best-scoring role
//! max_response_time too tight         | Fastest relevant role within budget
//! min_quality set                     | Best role whose quality clears it
//! Empty / emoji / overlong / null ctx | coordinator, low confidence
//! ```

pub mod capability;
pub mod metrics;
pub mod role;

pub use capability::CapabilityRouter;
pub use metrics::RouterMetrics;
pub use role::{Role, RoleProfile};

use crate::context::{ComplexityLevel, Context, Requirements};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Only internal computation failures are errors; odd input never is.
#[derive(Error, Debug)]
pub enum RoutingError {
    #[error("Invalid router configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Scoring failed: {message}")]
    ScoringFailed { message: String },
}

pub type RoutingResult<T> = Result<T, RoutingError>;

/// Chooses a role for a request.
pub trait Router: Send + Sync {
    fn route(
        &self,
        query: &str,
        context: &Context,
        requirements: Option<&Requirements>,
    ) -> RoutingResult<RoutingDecision>;

    /// Routing metrics, for routers that keep them.
    fn router_metrics(&self) -> Option<RouterMetrics> {
        None
    }

    /// Clear routing metrics and any load history. No-op by default.
    fn reset_router_metrics(&self) {}
}

/// The factors that drove the selection, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecisionFactors {
    pub complexity_match: f64,
    pub capability_match: f64,
    pub resource_availability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRationale {
    pub primary_reason: String,
    /// Named contributions to the confidence (key-sorted for stable output).
    pub confidence_factors: BTreeMap<String, f64>,
    pub decision_factors: DecisionFactors,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlternativeRole {
    pub role: Role,
    /// Share of the total affinity across roles.
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceEstimate {
    pub estimated_response_time_ms: u64,
    /// False when a latency requirement could not be met by any relevant role.
    pub within_budget: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextAnalysis {
    pub richness: f64,
    pub recognized_keys: Vec<String>,
    pub complexity: ComplexityLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub selected_role: Role,
    pub confidence: f64,
    pub rationale: RoutingRationale,
    /// At most two runners-up.
    pub alternative_roles: Vec<AlternativeRole>,
    pub estimated_performance: PerformanceEstimate,
    pub context_analysis: ContextAnalysis,
    /// Whether the coordinator fallback was used.
    pub fallback: bool,
}
