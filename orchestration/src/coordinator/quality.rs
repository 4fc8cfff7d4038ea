//! Quality scoring for a completed orchestration.
//!
//! ```text
//! lag      = decomposition confidence × termination factor
//! rcr      = 0.5·routing confidence + 0.3·role match + 0.2·performance
//! workflow = 0.5·answer confidence + 0.5·plan structure
//! overall  = 0.35·lag + 0.40·rcr + 0.25·workflow
//! ```

use serde::{Deserialize, Serialize};

use super::workflow::WorkflowPlan;
use crate::decomposer::{Decomposition, TerminationReason};
use crate::router::RoutingDecision;

const LAG_WEIGHT: f64 = 0.35;
const RCR_WEIGHT: f64 = 0.40;
const WORKFLOW_WEIGHT: f64 = 0.25;

/// Overall score expected for well-formed input.
pub const QUALITY_TARGET: f64 = 0.7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LagQuality {
    pub decomposition_depth: usize,
    pub confidence: f64,
    pub termination_reason: Option<TerminationReason>,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RcrQuality {
    pub routing_confidence: f64,
    pub role_match_score: f64,
    /// 1.0 for an instant response, 0.5 exactly at budget, below 0.5 over it.
    pub performance_estimate: f64,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowQuality {
    pub steps: usize,
    pub parallelizable: bool,
    pub answer_confidence: f64,
    pub structure: f64,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub lag_quality: LagQuality,
    pub rcr_quality: RcrQuality,
    pub workflow_quality: WorkflowQuality,
    pub overall_score: f64,
}

impl QualityMetrics {
    pub fn evaluate(
        decomposition: &Decomposition,
        routing: &RoutingDecision,
        workflow: &WorkflowPlan,
        answer_confidence: f64,
        latency_budget_ms: u64,
    ) -> Self {
        let factor = decomposition
            .termination_reason
            .map(|r| r.quality_factor())
            .unwrap_or(1.0);
        let lag_quality = LagQuality {
            decomposition_depth: decomposition.depth(),
            confidence: decomposition.confidence,
            termination_reason: decomposition.termination_reason,
            score: clamp(decomposition.confidence * factor),
        };

        let role_match_score = clamp(routing.rationale.decision_factors.capability_match);
        let performance_estimate = performance_score(
            routing.estimated_performance.estimated_response_time_ms,
            latency_budget_ms,
        );
        let rcr_quality = RcrQuality {
            routing_confidence: routing.confidence,
            role_match_score,
            performance_estimate,
            score: clamp(
                0.5 * routing.confidence + 0.3 * role_match_score + 0.2 * performance_estimate,
            ),
        };

        let answer_confidence = clamp(answer_confidence);
        let structure = workflow.structure_score();
        let workflow_quality = WorkflowQuality {
            steps: workflow.steps.len(),
            parallelizable: workflow.parallelizable,
            answer_confidence,
            structure,
            score: clamp(0.5 * answer_confidence + 0.5 * structure),
        };

        let overall_score = clamp(
            LAG_WEIGHT * lag_quality.score
                + RCR_WEIGHT * rcr_quality.score
                + WORKFLOW_WEIGHT * workflow_quality.score,
        );

        Self {
            lag_quality,
            rcr_quality,
            workflow_quality,
            overall_score,
        }
    }

    pub fn meets_target(&self) -> bool {
        self.overall_score >= QUALITY_TARGET
    }
}

/// Blend of the three stage confidences reported on the result.
pub fn combined_confidence(decomposition: f64, routing: f64, answer: f64) -> f64 {
    clamp(0.3 * decomposition + 0.4 * routing + 0.3 * answer)
}

fn performance_score(estimated_ms: u64, budget_ms: u64) -> f64 {
    if budget_ms == 0 {
        return 0.0;
    }
    let (est, budget) = (estimated_ms as f64, budget_ms as f64);
    if est <= budget {
        clamp(1.0 - 0.5 * est / budget)
    } else {
        clamp(0.5 * budget / est)
    }
}

fn clamp(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::decomposer::{Decomposer, HeuristicDecomposer};
    use crate::router::{CapabilityRouter, Router};
    use serde_json::json;

    fn evaluate(query: &str, context: serde_json::Value, answer: f64) -> QualityMetrics {
        let context = Context::from_value(&context);
        let decomposition = HeuristicDecomposer::default()
            .decompose(query, &context)
            .unwrap();
        let routing = CapabilityRouter::default().route(query, &context, None).unwrap();
        let workflow = WorkflowPlan::build(&decomposition, &routing);
        QualityMetrics::evaluate(&decomposition, &routing, &workflow, answer, 200)
    }

    #[test]
    fn test_performance_score_curve() {
        assert_eq!(performance_score(0, 200), 1.0);
        assert!((performance_score(100, 200) - 0.75).abs() < 1e-9);
        assert!((performance_score(200, 200) - 0.5).abs() < 1e-9);
        assert!((performance_score(400, 200) - 0.25).abs() < 1e-9);
        assert_eq!(performance_score(100, 0), 0.0);
    }

    #[test]
    fn test_well_formed_input_meets_target() {
        let q = evaluate("Analyze customer purchase patterns", json!({"data": true}), 0.9);
        assert!(q.meets_target(), "overall {}", q.overall_score);
        assert_eq!(q.lag_quality.decomposition_depth, 1);
        assert_eq!(
            q.lag_quality.termination_reason,
            Some(TerminationReason::Completed)
        );
    }

    #[test]
    fn test_degenerate_input_scores_lower() {
        let good = evaluate("Analyze customer purchase patterns", json!({"data": true}), 0.9);
        let bad = evaluate("", json!({}), 0.5);
        assert!(bad.overall_score < good.overall_score);
        assert!((bad.lag_quality.score - 0.3 * 0.6).abs() < 1e-9);
        assert!((0.0..=1.0).contains(&bad.overall_score));
    }

    #[test]
    fn test_combined_confidence_is_clamped() {
        assert!((combined_confidence(1.0, 1.0, 1.0) - 1.0).abs() < 1e-9);
        assert_eq!(combined_confidence(-5.0, 0.0, 0.0), 0.0);
        assert!((combined_confidence(0.5, 0.5, 0.5) - 0.5).abs() < 1e-9);
        assert_eq!(clamp(f64::NAN), 0.0);
    }
}
