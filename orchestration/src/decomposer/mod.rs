//! Request decomposition.
//!
//! Splits a request into ordered sub-tasks with confidence scores, builds
//! an execution plan and records why decomposition stopped.
//!
//! ```text
//! "Analyze Q4 sales and then draft a summary for the board"
//!   ├─ [0] analyze  "analyze q4 sales"              0.90
//!   └─ [1] draft    "draft a summary for the board" 0.90  depends_on: 0
//! ```

pub mod heuristic;

pub use heuristic::HeuristicDecomposer;

use crate::context::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecompositionError {
    #[error("Invalid decomposer configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Could not build execution plan: {message}")]
    PlanConstruction { message: String },
}

pub type DecompositionResult<T> = Result<T, DecompositionError>;

/// Splits a request into sub-tasks.
///
/// `HeuristicDecomposer` is the production implementation; tests can
/// substitute their own.
pub trait Decomposer: Send + Sync {
    fn decompose(&self, query: &str, context: &Context) -> DecompositionResult<Decomposition>;
}

/// Why decomposition stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    Completed,
    LowConfidence,
    DepthLimit,
}

impl TerminationReason {
    /// Quality factor applied to the decomposition confidence.
    pub fn quality_factor(&self) -> f64 {
        match self {
            Self::Completed => 1.0,
            Self::DepthLimit => 0.85,
            Self::LowConfidence => 0.6,
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::LowConfidence => write!(f, "low_confidence"),
            Self::DepthLimit => write!(f, "depth_limit"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTask {
    pub text: String,
    /// Leading action verb, or "general".
    pub action: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub index: usize,
    pub action: String,
    pub description: String,
    /// Step that must finish first, if the request sequenced them.
    pub depends_on: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decomposition {
    pub subtasks: Vec<SubTask>,
    pub confidence: f64,
    pub execution_plan: Vec<ExecutionStep>,
    pub terminator_triggered: bool,
    pub termination_reason: Option<TerminationReason>,
    /// Opaque trace of how the decomposition was produced.
    pub artifacts: serde_json::Value,
}

impl Decomposition {
    pub fn depth(&self) -> usize {
        self.subtasks.len()
    }

    /// Whether every step can run without waiting on another.
    pub fn is_parallelizable(&self) -> bool {
        self.execution_plan.iter().all(|s| s.depends_on.is_none())
    }
}
