//! Coordinator pipeline tests with counting and failing engine doubles.
//!
//! Covers caching (sequential and concurrent), the circuit breaker state
//! machine, execution-time guards, metrics reset and health reporting.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use orchestration::{
    CapabilityRouter, CircuitState, Context, CoordinatorConfig, Decomposer, Decomposition,
    DecompositionError, DecompositionResult, ExecutionError, ExecutionOutput, Executor,
    HealthState, HeuristicDecomposer, OrchestrationCoordinator, OrchestrationError,
    PipelineStage, PlanExecutor, Requirements, ResultStatus, Router, RouterMetrics,
    RoutingDecision, RoutingError, RoutingResult,
};
use serde_json::json;

// ── Test doubles ──────────────────────────────────────────────────────────────

/// Heuristic decomposer that counts calls and can be switched to fail.
#[derive(Default)]
struct CountingDecomposer {
    calls: AtomicUsize,
    failing: AtomicBool,
    delay: Option<Duration>,
}

impl CountingDecomposer {
    fn failing() -> Self {
        let d = Self::default();
        d.failing.store(true, Ordering::SeqCst);
        d
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl Decomposer for CountingDecomposer {
    fn decompose(&self, query: &str, context: &Context) -> DecompositionResult<Decomposition> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(DecompositionError::PlanConstruction {
                message: "injected failure".to_string(),
            });
        }
        HeuristicDecomposer::default().decompose(query, context)
    }
}

/// Decomposer whose behaviour follows the query: "slow:" sleeps, "fail:" errors.
#[derive(Default)]
struct ScriptedDecomposer {
    calls: AtomicUsize,
}

impl Decomposer for ScriptedDecomposer {
    fn decompose(&self, query: &str, context: &Context) -> DecompositionResult<Decomposition> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if query.starts_with("slow:") {
            std::thread::sleep(Duration::from_millis(300));
        }
        if query.starts_with("fail:") {
            return Err(DecompositionError::PlanConstruction {
                message: "boom".to_string(),
            });
        }
        HeuristicDecomposer::default().decompose(query, context)
    }
}

/// Capability router that counts calls and can fail or panic.
#[derive(Default)]
struct CountingRouter {
    inner: CapabilityRouter,
    calls: AtomicUsize,
    failing: bool,
    panicking: bool,
}

impl CountingRouter {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Router for CountingRouter {
    fn route(
        &self,
        query: &str,
        context: &Context,
        requirements: Option<&Requirements>,
    ) -> RoutingResult<RoutingDecision> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panicking {
            panic!("router state corrupted");
        }
        if self.failing {
            return Err(RoutingError::ScoringFailed {
                message: "injected failure".to_string(),
            });
        }
        self.inner.route(query, context, requirements)
    }

    fn router_metrics(&self) -> Option<RouterMetrics> {
        self.inner.router_metrics()
    }

    fn reset_router_metrics(&self) {
        self.inner.reset_router_metrics();
    }
}

struct FailingExecutor;

#[async_trait]
impl Executor for FailingExecutor {
    async fn execute(
        &self,
        _decomposition: &Decomposition,
        _routing: &RoutingDecision,
    ) -> Result<ExecutionOutput, ExecutionError> {
        Err(ExecutionError::Rejected("HTTP 503: overloaded".to_string()))
    }
}

fn build(
    decomposer: Arc<CountingDecomposer>,
    router: Arc<CountingRouter>,
    config: CoordinatorConfig,
) -> OrchestrationCoordinator {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();
    OrchestrationCoordinator::new(decomposer, router, Arc::new(PlanExecutor::new()), config)
}

// ── Caching ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_identical_requests_invoke_engines_once() {
    let decomposer = Arc::new(CountingDecomposer::default());
    let router = Arc::new(CountingRouter::default());
    let coordinator = build(decomposer.clone(), router.clone(), CoordinatorConfig::default());

    let ctx = json!({"data": true});
    let first = coordinator
        .process_query("Analyze customer purchase patterns", &ctx)
        .await
        .unwrap();
    let second = coordinator
        .process_query("Analyze customer purchase patterns", &ctx)
        .await
        .unwrap();

    assert_eq!(decomposer.calls(), 1);
    assert_eq!(router.calls(), 1);
    assert!(second.metadata.cache_hit);
    assert_eq!(first.routing, second.routing);
    assert_eq!(first.answer, second.answer);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_identical_requests_share_one_computation() {
    let decomposer = Arc::new(CountingDecomposer::slow(Duration::from_millis(80)));
    let router = Arc::new(CountingRouter::default());
    let coordinator = Arc::new(build(
        decomposer.clone(),
        router.clone(),
        CoordinatorConfig::default(),
    ));

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move {
                coordinator
                    .process_query("Summarize the meeting notes", &json!({}))
                    .await
            })
        })
        .collect();

    let mut request_ids = std::collections::HashSet::new();
    for task in tasks {
        let result = task.await.unwrap().unwrap();
        request_ids.insert(result.request_id);
    }

    assert_eq!(decomposer.calls(), 1);
    assert_eq!(router.calls(), 1);
    assert_eq!(request_ids.len(), 1);
    let metrics = coordinator.get_metrics();
    assert_eq!(metrics.successful_requests, 10);
    assert_eq!(metrics.cache_hits, 9);
}

#[tokio::test]
async fn test_failures_are_not_cached() {
    let decomposer = Arc::new(CountingDecomposer::failing());
    let router = Arc::new(CountingRouter::default());
    let coordinator = build(decomposer.clone(), router.clone(), CoordinatorConfig::default());

    assert!(coordinator.process_query("Plan the offsite", &json!({})).await.is_err());
    decomposer.set_failing(false);
    let result = coordinator.process_query("Plan the offsite", &json!({})).await.unwrap();
    assert!(!result.metadata.cache_hit);
    assert_eq!(decomposer.calls(), 2);
}

// ── Stability ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_hundred_successful_calls_are_stable() {
    let decomposer = Arc::new(CountingDecomposer::default());
    let router = Arc::new(CountingRouter::default());
    let coordinator = build(decomposer, router, CoordinatorConfig::default());

    for i in 0..100 {
        coordinator
            .process_query(&format!("Analyze sales data for region {i}"), &json!({}))
            .await
            .unwrap();
    }

    let metrics = coordinator.get_metrics();
    assert_eq!(metrics.total_requests, 100);
    assert_eq!(metrics.failed_requests, 0);
    assert_eq!(metrics.acceptable_requests, 100);
    assert!(metrics.stability_score >= 0.986);
    assert_eq!(coordinator.get_health_status().status, HealthState::Healthy);
}

// ── Circuit breaker ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_breaker_opens_after_five_failures_without_touching_engines() {
    let decomposer = Arc::new(CountingDecomposer::failing());
    let router = Arc::new(CountingRouter::default());
    let coordinator = build(decomposer.clone(), router.clone(), CoordinatorConfig::default());

    for i in 0..5 {
        let err = coordinator
            .process_query(&format!("Analyze churn {i}"), &json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("LAG processing failed: "));
        assert!(!err.is_circuit_open());
    }
    assert_eq!(coordinator.circuit_breaker().state, CircuitState::Open);

    let err = coordinator
        .process_query("Analyze churn 6", &json!({}))
        .await
        .unwrap_err();
    assert!(err.is_circuit_open());
    assert!(err.to_string().starts_with("Circuit breaker is open"));
    assert_eq!(decomposer.calls(), 5);
    assert_eq!(router.calls(), 0);

    let metrics = coordinator.get_metrics();
    assert_eq!(metrics.failed_requests, 6);
    assert_eq!(metrics.circuit_breaker_rejections, 1);
    assert_eq!(coordinator.get_health_status().status, HealthState::Failed);
}

#[tokio::test]
async fn test_router_failures_also_trip_the_breaker() {
    let decomposer = Arc::new(CountingDecomposer::default());
    let router = Arc::new(CountingRouter {
        failing: true,
        ..CountingRouter::default()
    });
    let config = CoordinatorConfig {
        failure_threshold: 3,
        ..CoordinatorConfig::default()
    };
    let coordinator = build(decomposer.clone(), router.clone(), config);

    for i in 0..3 {
        let err = coordinator
            .process_query(&format!("Draft a memo {i}"), &json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("RCR routing failed: "));
        assert_eq!(err.stage(), PipelineStage::Routing);
    }
    let err = coordinator.process_query("Draft a memo", &json!({})).await.unwrap_err();
    assert!(err.is_circuit_open());
    assert_eq!(decomposer.calls(), 3);
    assert_eq!(router.calls(), 3);
}

#[tokio::test]
async fn test_half_open_probe_closes_breaker_on_success() {
    let decomposer = Arc::new(CountingDecomposer::failing());
    let router = Arc::new(CountingRouter::default());
    let config = CoordinatorConfig {
        failure_threshold: 2,
        cooldown_ms: 50,
        ..CoordinatorConfig::default()
    };
    let coordinator = build(decomposer.clone(), router.clone(), config);

    for _ in 0..2 {
        assert!(coordinator.process_query("Check the totals", &json!({})).await.is_err());
    }
    assert!(coordinator
        .process_query("Check the totals", &json!({}))
        .await
        .unwrap_err()
        .is_circuit_open());

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(coordinator.circuit_breaker().state, CircuitState::HalfOpen);
    assert_eq!(coordinator.get_health_status().status, HealthState::Degraded);

    decomposer.set_failing(false);
    coordinator
        .process_query("Check the totals", &json!({}))
        .await
        .unwrap();
    let snapshot = coordinator.circuit_breaker();
    assert_eq!(snapshot.state, CircuitState::Closed);
    assert_eq!(snapshot.failure_count, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_late_success_cannot_close_an_open_breaker() {
    let decomposer = Arc::new(ScriptedDecomposer::default());
    let config = CoordinatorConfig {
        failure_threshold: 1,
        cooldown_ms: 60_000,
        ..CoordinatorConfig::default()
    };
    let coordinator = Arc::new(OrchestrationCoordinator::new(
        decomposer.clone(),
        Arc::new(CountingRouter::default()),
        Arc::new(PlanExecutor::new()),
        config,
    ));

    // Admitted while closed, finishes after the breaker has tripped.
    let slow = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move {
            coordinator
                .process_query("slow: Analyze sales data", &json!({}))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = coordinator
        .process_query("fail: Analyze churn", &json!({}))
        .await
        .unwrap_err();
    assert!(!err.is_circuit_open());
    assert_eq!(coordinator.circuit_breaker().state, CircuitState::Open);

    slow.await.unwrap().unwrap();
    assert_eq!(coordinator.circuit_breaker().state, CircuitState::Open);

    let err = coordinator
        .process_query("Analyze revenue by region", &json!({}))
        .await
        .unwrap_err();
    assert!(err.is_circuit_open());
    assert_eq!(decomposer.calls.load(Ordering::SeqCst), 2);

    let metrics = coordinator.get_metrics();
    assert_eq!(metrics.successful_requests, 1);
    assert_eq!(metrics.failed_requests, 2);
    assert_eq!(metrics.circuit_breaker_rejections, 1);
    assert_eq!(coordinator.circuit_breaker().trips, 1);
}

#[tokio::test]
async fn test_half_open_probe_failure_reopens() {
    let decomposer = Arc::new(CountingDecomposer::failing());
    let router = Arc::new(CountingRouter::default());
    let config = CoordinatorConfig {
        failure_threshold: 1,
        cooldown_ms: 200,
        ..CoordinatorConfig::default()
    };
    let coordinator = build(decomposer.clone(), router, config);

    assert!(coordinator.process_query("Audit q3", &json!({})).await.is_err());
    tokio::time::sleep(Duration::from_millis(250)).await;

    let err = coordinator.process_query("Audit q3", &json!({})).await.unwrap_err();
    assert!(!err.is_circuit_open(), "probe should reach the engine");
    assert_eq!(decomposer.calls(), 2);
    assert_eq!(coordinator.circuit_breaker().state, CircuitState::Open);
    assert_eq!(coordinator.circuit_breaker().trips, 2);
}

#[tokio::test]
async fn test_reset_metrics_clears_counters_and_breaker() {
    let decomposer = Arc::new(CountingDecomposer::failing());
    let router = Arc::new(CountingRouter::default());
    let coordinator = build(decomposer.clone(), router, CoordinatorConfig::default());

    for _ in 0..6 {
        let _ = coordinator.process_query("Organize the launch", &json!({})).await;
    }
    assert_eq!(coordinator.circuit_breaker().state, CircuitState::Open);

    coordinator.reset_metrics();
    let metrics = coordinator.get_metrics();
    assert_eq!(metrics.total_requests, 0);
    assert_eq!(metrics.successful_requests, 0);
    assert_eq!(metrics.failed_requests, 0);
    assert_eq!(metrics.stability_score, 1.0);
    assert_eq!(coordinator.circuit_breaker().state, CircuitState::Closed);

    decomposer.set_failing(false);
    assert!(coordinator
        .process_query("Organize the launch", &json!({}))
        .await
        .is_ok());
}

// ── Execution-time guard ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_stalled_decomposer_times_out_and_counts_as_failure() {
    let decomposer = Arc::new(CountingDecomposer::slow(Duration::from_millis(300)));
    let router = Arc::new(CountingRouter::default());
    let config = CoordinatorConfig {
        engine_timeout_ms: 20,
        ..CoordinatorConfig::default()
    };
    let coordinator = build(decomposer, router.clone(), config);

    let err = coordinator
        .process_query("Forecast next quarter revenue", &json!({}))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestrationError::Timeout {
            stage: PipelineStage::Decomposition,
            timeout_ms: 20
        }
    ));
    assert_eq!(err.to_string(), "LAG processing failed: timed out after 20ms");
    assert_eq!(router.calls(), 0);
    assert_eq!(coordinator.circuit_breaker().failure_count, 1);
    assert_eq!(coordinator.get_metrics().failed_requests, 1);
}

#[tokio::test]
async fn test_panicking_router_is_contained() {
    let decomposer = Arc::new(CountingDecomposer::default());
    let router = Arc::new(CountingRouter {
        panicking: true,
        ..CountingRouter::default()
    });
    let coordinator = build(decomposer, router, CoordinatorConfig::default());

    let err = coordinator
        .process_query("Review the contract", &json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestrationError::EnginePanicked { .. }));
    assert!(err.to_string().starts_with("RCR routing failed: engine panicked"));
    assert_eq!(coordinator.circuit_breaker().failure_count, 1);
}

#[tokio::test]
async fn test_executor_failure_is_reported_as_execution_stage() {
    let coordinator = OrchestrationCoordinator::new(
        Arc::new(CountingDecomposer::default()),
        Arc::new(CountingRouter::default()),
        Arc::new(FailingExecutor),
        CoordinatorConfig::default(),
    );
    let err = coordinator
        .process_query("Validate the invoice totals", &json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.stage(), PipelineStage::Execution);
    assert!(err.to_string().starts_with("Execution failed: "));
    assert_eq!(coordinator.cache_len(), 0);
}

// ── Health ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health_degrades_below_stability_target() {
    let decomposer = Arc::new(CountingDecomposer::default());
    let router = Arc::new(CountingRouter::default());
    let coordinator = build(decomposer.clone(), router, CoordinatorConfig::default());

    for i in 0..9 {
        coordinator
            .process_query(&format!("Analyze sales data for region {i}"), &json!({}))
            .await
            .unwrap();
    }
    decomposer.set_failing(true);
    let _ = coordinator
        .process_query("Analyze sales data for region x", &json!({}))
        .await;

    let health = coordinator.get_health_status();
    assert_eq!(health.status, HealthState::Degraded);
    assert_eq!(health.circuit_breaker.state, CircuitState::Closed);
    assert!((health.stability_score - 0.9).abs() < 1e-9);
    assert!(health
        .recommendations
        .iter()
        .any(|r| r.contains("below the 98.6% target")));
    assert!(health.router.is_some());
}

#[tokio::test]
async fn test_fallback_heavy_workload_degrades_stability() {
    let decomposer = Arc::new(CountingDecomposer::default());
    let router = Arc::new(CountingRouter::default());
    let config = CoordinatorConfig {
        cache_enabled: false,
        ..CoordinatorConfig::default()
    };
    let coordinator = build(decomposer, router, config);

    for i in 0..10 {
        let ok = coordinator
            .process_query(&format!("Analyze sales data for region {i}"), &json!({}))
            .await
            .unwrap();
        assert_eq!(ok.status, ResultStatus::Success);
        let fallback = coordinator.process_query("", &json!({})).await.unwrap();
        assert_eq!(fallback.status, ResultStatus::Degraded);
    }

    let metrics = coordinator.get_metrics();
    assert_eq!(metrics.successful_requests, 20);
    assert_eq!(metrics.acceptable_requests, 10);
    assert_eq!(metrics.failed_requests, 0);
    assert_eq!(metrics.stability_score, 0.5);

    let health = coordinator.get_health_status();
    assert_eq!(health.status, HealthState::Degraded);
    assert!(health
        .recommendations
        .iter()
        .any(|r| r.contains("below the 98.6% target")));
}

#[tokio::test]
async fn test_reset_metrics_clears_router_history() {
    let decomposer = Arc::new(CountingDecomposer::default());
    let router = Arc::new(CountingRouter::default());
    let coordinator = build(decomposer, router, CoordinatorConfig::default());

    for i in 0..5 {
        coordinator
            .process_query(&format!("Analyze sales data for region {i}"), &json!({}))
            .await
            .unwrap();
    }
    assert_eq!(coordinator.get_router_metrics().unwrap().total_routes, 5);

    coordinator.reset_metrics();
    let router_metrics = coordinator.get_router_metrics().unwrap();
    assert_eq!(router_metrics.total_routes, 0);
    assert!(router_metrics.role_distribution.is_empty());
    assert!(coordinator.get_health_status().router.is_some());
}
