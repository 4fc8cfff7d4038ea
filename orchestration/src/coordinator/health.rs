//! Health reporting.
//!
//! | Status   | Condition                                          |
//! |----------|----------------------------------------------------|
//! | healthy  | stability ≥ target and breaker closed              |
//! | degraded | stability below target, or breaker half-open       |
//! | failed   | breaker open                                       |
//!
//! Performance status bands on average response time: optimal (<100ms),
//! good (<150ms), acceptable (<200ms), else needs_optimization.

use serde::{Deserialize, Serialize};

use super::metrics::CoordinatorMetrics;
use crate::config::CoordinatorConfig;
use crate::resilience::{CircuitBreakerSnapshot, CircuitState};
use crate::router::RouterMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Failed,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceStatus {
    Optimal,
    Good,
    Acceptable,
    NeedsOptimization,
}

impl PerformanceStatus {
    pub fn from_latency(average_ms: f64, config: &CoordinatorConfig) -> Self {
        if average_ms < config.optimal_latency_ms {
            Self::Optimal
        } else if average_ms < config.good_latency_ms {
            Self::Good
        } else if average_ms < config.acceptable_latency_ms {
            Self::Acceptable
        } else {
            Self::NeedsOptimization
        }
    }
}

impl std::fmt::Display for PerformanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Optimal => write!(f, "optimal"),
            Self::Good => write!(f, "good"),
            Self::Acceptable => write!(f, "acceptable"),
            Self::NeedsOptimization => write!(f, "needs_optimization"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: HealthState,
    pub performance_status: PerformanceStatus,
    pub stability_score: f64,
    pub stability_target: f64,
    pub average_response_time_ms: f64,
    pub max_response_time_ms: f64,
    pub error_rate: f64,
    pub total_requests: u64,
    pub circuit_breaker: CircuitBreakerSnapshot,
    pub cache_enabled: bool,
    pub cache_entries: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router: Option<RouterMetrics>,
    pub recommendations: Vec<String>,
}

/// Spread below this normalized entropy counts as concentrated routing.
const MIN_UTILIZATION: f64 = 0.3;
/// Fallback share above which input quality is questioned.
const MAX_FALLBACK_SHARE: f64 = 0.25;
/// Routes needed before router-level advice is given.
const MIN_ROUTES_FOR_ADVICE: u64 = 20;

impl HealthStatus {
    pub fn evaluate(
        metrics: &CoordinatorMetrics,
        breaker: CircuitBreakerSnapshot,
        router: Option<RouterMetrics>,
        cache_entries: usize,
        config: &CoordinatorConfig,
    ) -> Self {
        let status = match breaker.state {
            CircuitState::Open => HealthState::Failed,
            CircuitState::HalfOpen => HealthState::Degraded,
            CircuitState::Closed if metrics.stability_score >= config.stability_target => {
                HealthState::Healthy
            }
            CircuitState::Closed => HealthState::Degraded,
        };
        let performance_status =
            PerformanceStatus::from_latency(metrics.average_response_time_ms, config);
        let recommendations = recommendations(metrics, &breaker, router.as_ref(), config);

        Self {
            status,
            performance_status,
            stability_score: metrics.stability_score,
            stability_target: config.stability_target,
            average_response_time_ms: metrics.average_response_time_ms,
            max_response_time_ms: metrics.max_response_time_ms,
            error_rate: metrics.error_rate,
            total_requests: metrics.total_requests,
            circuit_breaker: breaker,
            cache_enabled: config.cache_enabled,
            cache_entries,
            router,
            recommendations,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthState::Healthy
    }
}

fn recommendations(
    metrics: &CoordinatorMetrics,
    breaker: &CircuitBreakerSnapshot,
    router: Option<&RouterMetrics>,
    config: &CoordinatorConfig,
) -> Vec<String> {
    let mut advice = Vec::new();

    match breaker.state {
        CircuitState::Open => advice.push(format!(
            "Circuit breaker is open after {} consecutive failures; check decomposer and router health",
            breaker.failure_count
        )),
        CircuitState::HalfOpen => advice.push(
            "Circuit breaker is probing recovery; hold load steady until it closes".to_string(),
        ),
        CircuitState::Closed => {}
    }

    if metrics.stability_score < config.stability_target {
        advice.push(format!(
            "Stability {:.1}% is below the {:.1}% target; investigate failing requests",
            metrics.stability_score * 100.0,
            config.stability_target * 100.0
        ));
    }

    if metrics.average_response_time_ms >= config.acceptable_latency_ms {
        advice.push(format!(
            "Average response time {:.0}ms exceeds the {:.0}ms budget; enable caching or lower engine timeouts",
            metrics.average_response_time_ms, config.acceptable_latency_ms
        ));
    }

    if metrics.max_response_time_ms >= config.critical_latency_ms {
        advice.push(format!(
            "Worst-case response time {:.0}ms reached the {:.0}ms critical threshold",
            metrics.max_response_time_ms, config.critical_latency_ms
        ));
    }

    if !config.cache_enabled && metrics.total_requests > 0 {
        advice.push(
            "Result cache is disabled; repeated queries recompute the full pipeline".to_string(),
        );
    }

    if let Some(router) = router.filter(|r| r.total_routes >= MIN_ROUTES_FOR_ADVICE) {
        let fallback_share = router.fallback_routes as f64 / router.total_routes as f64;
        if fallback_share > MAX_FALLBACK_SHARE {
            advice.push(format!(
                "{:.0}% of requests fell back to coordinator; check upstream input quality",
                fallback_share * 100.0
            ));
        }
        if router.resource_utilization < MIN_UTILIZATION {
            advice.push(format!(
                "Routing is concentrated on few roles (utilization {:.2}); review role profiles",
                router.resource_utilization
            ));
        }
    }

    advice
}
