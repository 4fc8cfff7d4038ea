//! Answer-generation seam.
//!
//! The coordinator hands the decomposition and routing decision to an
//! [`Executor`] and gets back an answer with a confidence. Two
//! implementations ship with the crate:
//!
//! - [`PlanExecutor`]: offline, renders the role-framed plan as the answer.
//! - [`HttpExecutor`]: OpenAI-compatible chat-completions endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::decomposer::Decomposition;
use crate::router::{Role, RoutingDecision};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutput {
    pub answer: String,
    pub confidence: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Executor rejected request: {0}")]
    Rejected(String),
}

/// Produces the answer for a routed request.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        decomposition: &Decomposition,
        routing: &RoutingDecision,
    ) -> Result<ExecutionOutput, ExecutionError>;
}

/// Offline executor: the answer is the plan itself, framed by the role.
#[derive(Debug, Clone, Default)]
pub struct PlanExecutor;

impl PlanExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Executor for PlanExecutor {
    async fn execute(
        &self,
        decomposition: &Decomposition,
        routing: &RoutingDecision,
    ) -> Result<ExecutionOutput, ExecutionError> {
        let role = routing.selected_role;
        let mut answer = format!("[{role}] {}\n", role.profile().description);
        for step in &decomposition.execution_plan {
            let after = step
                .depends_on
                .map(|d| format!(" (after step {})", d + 1))
                .unwrap_or_default();
            answer.push_str(&format!(
                "{}. {}: {}{}\n",
                step.index + 1,
                step.action,
                step.description,
                after
            ));
        }

        let confidence = (0.5 * role.profile().quality_rating
            + 0.25 * decomposition.confidence
            + 0.25 * routing.confidence)
            .clamp(0.0, 1.0);

        Ok(ExecutionOutput {
            answer: answer.trim_end().to_string(),
            confidence,
        })
    }
}

/// Settings for [`HttpExecutor`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpExecutorConfig {
    /// Full chat-completions URL.
    pub endpoint: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for HttpExecutorConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8000/v1/chat/completions".to_string(),
            model: "default".to_string(),
            max_tokens: 1024,
            temperature: 0.3,
            timeout_secs: 30,
        }
    }
}

impl HttpExecutorConfig {
    /// Defaults overridden by `ORCH_EXECUTOR_URL` and `ORCH_EXECUTOR_MODEL`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("ORCH_EXECUTOR_URL") {
            config.endpoint = url;
        }
        if let Ok(model) = std::env::var("ORCH_EXECUTOR_MODEL") {
            config.model = model;
        }
        config
    }
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Executor backed by an OpenAI-compatible chat-completions endpoint.
pub struct HttpExecutor {
    http: reqwest::Client,
    config: HttpExecutorConfig,
}

impl HttpExecutor {
    pub fn new(config: HttpExecutorConfig) -> Result<Self, ExecutionError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ExecutionError::Http(e.to_string()))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &HttpExecutorConfig {
        &self.config
    }
}

#[async_trait]
impl Executor for HttpExecutor {
    async fn execute(
        &self,
        decomposition: &Decomposition,
        routing: &RoutingDecision,
    ) -> Result<ExecutionOutput, ExecutionError> {
        let role = routing.selected_role;
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system_prompt(role),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user_prompt(decomposition),
                },
            ],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        debug!(role = %role, endpoint = %self.config.endpoint, "Querying executor endpoint");

        let response = self
            .http
            .post(&self.config.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| ExecutionError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ExecutionError::Rejected(format!("HTTP {}: {}", status, body)));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| ExecutionError::InvalidResponse(e.to_string()))?;

        output_from_response(chat_response, role, routing.confidence)
    }
}

fn output_from_response(
    response: ChatResponse,
    role: Role,
    routing_confidence: f64,
) -> Result<ExecutionOutput, ExecutionError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ExecutionError::InvalidResponse("no choices in response".to_string()))?;

    let answer = choice
        .message
        .content
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ExecutionError::InvalidResponse("empty answer".to_string()))?;

    // A length cut-off means the answer is probably incomplete.
    let truncated = choice.finish_reason.as_deref() == Some("length");
    let base = 0.6 * role.profile().quality_rating + 0.4 * routing_confidence;
    let confidence = if truncated { base * 0.8 } else { base };

    Ok(ExecutionOutput {
        answer,
        confidence: confidence.clamp(0.0, 1.0),
    })
}

/// System prompt framing the model as the selected role.
pub fn system_prompt(role: Role) -> String {
    let focus = match role {
        Role::Analyst => "Ground every claim in the figures provided and call out trends and outliers.",
        Role::Synthesizer => "Be concise, merge overlapping points and keep the reader's goal in view.",
        Role::Specialist => "Be precise, name the standards or constraints that apply and flag risks.",
        Role::Coordinator => "Produce an ordered plan with owners, dependencies and dates where known.",
        Role::Validator => "Check each statement, list what is confirmed and what needs evidence.",
    };
    format!(
        "You are the {role} in a role-routed assistant. {}. {focus}",
        role.profile().description
    )
}

fn user_prompt(decomposition: &Decomposition) -> String {
    let mut prompt = String::from("Complete the following steps in order:\n");
    for step in &decomposition.execution_plan {
        prompt.push_str(&format!("{}. {}\n", step.index + 1, step.description));
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::decomposer::{Decomposer, HeuristicDecomposer};
    use crate::router::{CapabilityRouter, Router};
    use serde_json::json;

    fn fixtures(query: &str) -> (Decomposition, RoutingDecision) {
        let context = Context::from_value(&json!({"data": true}));
        let decomposition = HeuristicDecomposer::default()
            .decompose(query, &context)
            .unwrap();
        let routing = CapabilityRouter::default().route(query, &context, None).unwrap();
        (decomposition, routing)
    }

    #[tokio::test]
    async fn test_plan_executor_renders_steps() {
        let (decomposition, routing) =
            fixtures("Analyze customer purchase patterns and then summarize the findings");
        let output = PlanExecutor::new()
            .execute(&decomposition, &routing)
            .await
            .unwrap();
        assert!(output.answer.starts_with("[analyst]"));
        assert!(output.answer.contains("1. analyze"));
        assert!(output.answer.contains("(after step 1)"));
        assert!(output.confidence > 0.0 && output.confidence <= 1.0);
    }

    #[test]
    fn test_system_prompts_are_role_specific() {
        let prompts: std::collections::BTreeSet<_> =
            Role::all().iter().map(|r| system_prompt(*r)).collect();
        assert_eq!(prompts.len(), Role::all().len());
        assert!(system_prompt(Role::Validator).contains("validator"));
    }

    #[test]
    fn test_output_from_response() {
        let response: ChatResponse = serde_json::from_value(json!({
            "choices": [{"message": {"content": "  Sales rose 12%.  "}, "finish_reason": "stop"}]
        }))
        .unwrap();
        let output = output_from_response(response, Role::Analyst, 0.8).unwrap();
        assert_eq!(output.answer, "Sales rose 12%.");
        assert!((output.confidence - (0.6 * 0.9 + 0.4 * 0.8)).abs() < 1e-9);
    }

    #[test]
    fn test_truncated_response_lowers_confidence() {
        let full: ChatResponse = serde_json::from_value(json!({
            "choices": [{"message": {"content": "x"}, "finish_reason": "stop"}]
        }))
        .unwrap();
        let cut: ChatResponse = serde_json::from_value(json!({
            "choices": [{"message": {"content": "x"}, "finish_reason": "length"}]
        }))
        .unwrap();
        let full = output_from_response(full, Role::Coordinator, 0.5).unwrap();
        let cut = output_from_response(cut, Role::Coordinator, 0.5).unwrap();
        assert!(cut.confidence < full.confidence);
    }

    #[test]
    fn test_empty_responses_are_invalid() {
        let none: ChatResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(matches!(
            output_from_response(none, Role::Analyst, 0.5),
            Err(ExecutionError::InvalidResponse(_))
        ));
        let blank: ChatResponse =
            serde_json::from_value(json!({"choices": [{"message": {"content": "   "}}]})).unwrap();
        assert!(matches!(
            output_from_response(blank, Role::Analyst, 0.5),
            Err(ExecutionError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_http_executor_unreachable_endpoint() {
        let executor = HttpExecutor::new(HttpExecutorConfig {
            endpoint: "http://127.0.0.1:1/v1/chat/completions".to_string(),
            timeout_secs: 2,
            ..HttpExecutorConfig::default()
        })
        .unwrap();
        let (decomposition, routing) = fixtures("Schedule the weekly team meeting");
        let err = executor.execute(&decomposition, &routing).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Http(_)));
    }
}
