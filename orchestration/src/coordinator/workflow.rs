//! Workflow plan: the execution plan with a role assigned to each step.

use serde::{Deserialize, Serialize};

use crate::decomposer::{Decomposition, ExecutionStep};
use crate::router::{Role, RoutingDecision};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub index: usize,
    pub action: String,
    pub description: String,
    pub role: Role,
    pub depends_on: Option<usize>,
    pub estimated_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowPlan {
    pub steps: Vec<WorkflowStep>,
    /// No step depends on another.
    pub parallelizable: bool,
    /// Length of the longest dependency chain, in milliseconds.
    pub estimated_total_ms: u64,
}

impl WorkflowPlan {
    /// Assign each step to the selected role, or to an alternative whose
    /// profile handles the step's action when the selected role does not.
    pub fn build(decomposition: &Decomposition, routing: &RoutingDecision) -> Self {
        let complexity = routing.context_analysis.complexity;
        let steps: Vec<WorkflowStep> = decomposition
            .execution_plan
            .iter()
            .map(|step| {
                let role = assign_role(step, routing);
                WorkflowStep {
                    index: step.index,
                    action: step.action.clone(),
                    description: step.description.clone(),
                    role,
                    depends_on: step.depends_on,
                    estimated_ms: role.profile().estimated_latency_ms(complexity),
                }
            })
            .collect();

        let mut finish = vec![0u64; steps.len()];
        for (i, step) in steps.iter().enumerate() {
            let ready = step
                .depends_on
                .filter(|d| *d < i)
                .map(|d| finish[d])
                .unwrap_or(0);
            finish[i] = ready + step.estimated_ms;
        }

        Self {
            parallelizable: steps.iter().all(|s| s.depends_on.is_none()),
            estimated_total_ms: finish.into_iter().max().unwrap_or(0),
            steps,
        }
    }

    /// Share of steps with a recognised action, lifted so a one-step
    /// general plan still scores: 0.6 + 0.4·actionable. Empty plans score 0.
    pub fn structure_score(&self) -> f64 {
        if self.steps.is_empty() {
            return 0.0;
        }
        let actionable = self.steps.iter().filter(|s| s.action != "general").count();
        0.6 + 0.4 * actionable as f64 / self.steps.len() as f64
    }
}

fn assign_role(step: &ExecutionStep, routing: &RoutingDecision) -> Role {
    let selected = routing.selected_role;
    if routing.fallback || selected.profile().handles_action(&step.action) {
        return selected;
    }
    routing
        .alternative_roles
        .iter()
        .map(|alt| alt.role)
        .find(|role| role.profile().handles_action(&step.action))
        .unwrap_or(selected)
}
