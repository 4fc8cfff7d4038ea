//! Orchestration Coordinator
//!
//! The facade external callers use. Each request flows through:
//!
//! ```text
//! process_query(query, context)
//!   ├─ fingerprint ─▶ cache hit? ─▶ return cached result
//!   ├─ circuit breaker open? ─▶ CircuitBreakerOpen (engines untouched)
//!   ├─ Decomposer.decompose   (blocking pool, engine timeout)
//!   ├─ Router.route           (blocking pool, engine timeout, derived requirements)
//!   ├─ Executor.execute       (spawned task, executor timeout)
//!   ├─ workflow plan + quality metrics
//!   └─ record success, cache, return
//! ```
//!
//! Metrics and the circuit breaker share one mutex so a snapshot never sees
//! a counter update without the matching breaker transition.

pub mod error;
pub mod executor;
pub mod health;
pub mod metrics;
pub mod quality;
pub mod workflow;

pub use error::{CoordinatorResult, OrchestrationError, PipelineStage};
pub use executor::{
    ExecutionError, ExecutionOutput, Executor, HttpExecutor, HttpExecutorConfig, PlanExecutor,
};
pub use health::{HealthState, HealthStatus, PerformanceStatus};
pub use metrics::CoordinatorMetrics;
pub use quality::QualityMetrics;
pub use workflow::{WorkflowPlan, WorkflowStep};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{CoordinatorConfig, OrchestrationConfig};
use crate::context::{Request, Requirements};
use crate::decomposer::{Decomposer, Decomposition, HeuristicDecomposer, TerminationReason};
use crate::resilience::{
    run_blocking, run_spawned, Admission, CacheOutcome, CircuitBreaker, CircuitBreakerSnapshot,
    ExecutionBudget, Fingerprint, GuardError, ResultCache,
};
use crate::router::{CapabilityRouter, Router, RouterMetrics, RoutingDecision};
use self::metrics::MetricsRecorder;

/// Shared reference to an OrchestrationCoordinator.
pub type SharedCoordinator = Arc<OrchestrationCoordinator>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    /// Completed, but routing fell back to the coordinator role.
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub started_at: DateTime<Utc>,
    pub processing_time_ms: f64,
    pub cache_hit: bool,
    /// Processing time and role estimate both fit the latency budget.
    pub within_budget: bool,
    /// "slow_response" over the budget, "critical_latency" at the critical threshold.
    pub performance_flags: Vec<String>,
    pub stage_timings_ms: BTreeMap<String, f64>,
    /// Requirements handed to the router after derivation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<Requirements>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub status: ResultStatus,
    pub request_id: Uuid,
    pub query: String,
    pub decomposition: Decomposition,
    pub routing: RoutingDecision,
    pub workflow: WorkflowPlan,
    pub answer: String,
    pub confidence: f64,
    pub quality_metrics: QualityMetrics,
    pub metadata: ResultMetadata,
}

#[derive(Debug)]
struct CoordinatorState {
    metrics: MetricsRecorder,
    breaker: CircuitBreaker,
}

/// Outputs of the three engine stages.
struct StageOutputs {
    decomposition: Decomposition,
    routing: RoutingDecision,
    requirements: Option<Requirements>,
    answer: ExecutionOutput,
    timings: BTreeMap<String, f64>,
}

/// Frees the half-open probe slot if the pipeline is dropped mid-flight.
struct ProbeSlot<'a> {
    state: &'a Mutex<CoordinatorState>,
    admission: Admission,
    armed: bool,
}

impl Drop for ProbeSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            lock(self.state).breaker.release_probe(&self.admission);
        }
    }
}

fn lock(state: &Mutex<CoordinatorState>) -> MutexGuard<'_, CoordinatorState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}

pub struct OrchestrationCoordinator {
    decomposer: Arc<dyn Decomposer>,
    router: Arc<dyn Router>,
    executor: Arc<dyn Executor>,
    config: CoordinatorConfig,
    state: Mutex<CoordinatorState>,
    cache: ResultCache<OrchestrationResult>,
}

impl OrchestrationCoordinator {
    pub fn new(
        decomposer: Arc<dyn Decomposer>,
        router: Arc<dyn Router>,
        executor: Arc<dyn Executor>,
        config: CoordinatorConfig,
    ) -> Self {
        let breaker = CircuitBreaker::new(
            config.failure_threshold,
            Duration::from_millis(config.cooldown_ms),
        );
        let cache = ResultCache::new(
            Duration::from_secs(config.cache_ttl_secs),
            config.cache_max_entries,
        );
        Self {
            decomposer,
            router,
            executor,
            config,
            state: Mutex::new(CoordinatorState {
                metrics: MetricsRecorder::default(),
                breaker,
            }),
            cache,
        }
    }

    /// Heuristic decomposer, capability router and the offline plan executor.
    pub fn with_defaults(config: OrchestrationConfig) -> Self {
        Self::new(
            Arc::new(HeuristicDecomposer::new(config.decomposer)),
            Arc::new(CapabilityRouter::new(config.router)),
            Arc::new(PlanExecutor::new()),
            config.coordinator,
        )
    }

    /// Swap the executor, keeping engines and state.
    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn shared(self) -> SharedCoordinator {
        Arc::new(self)
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Decompose, route and execute a request.
    ///
    /// Identical (query, context) pairs are served from the cache while their
    /// entry is live; concurrent identical requests share one computation.
    pub async fn process_query(
        &self,
        query: &str,
        context: &serde_json::Value,
    ) -> CoordinatorResult<OrchestrationResult> {
        let started = Instant::now();
        let started_at = Utc::now();
        let request = Request::new(query, context);

        if !self.config.cache_enabled {
            return self.run_pipeline(&request, None, started, started_at).await;
        }

        let fingerprint = Fingerprint::of(&request);
        let outcome = self
            .cache
            .get_or_compute(&fingerprint, || {
                self.run_pipeline(&request, Some(&fingerprint), started, started_at)
            })
            .await?;

        Ok(match outcome {
            CacheOutcome::Computed(result) => result,
            CacheOutcome::Hit(result) | CacheOutcome::Joined(result) => {
                self.serve_cached(result, started, started_at)
            }
        })
    }

    async fn run_pipeline(
        &self,
        request: &Request,
        fingerprint: Option<&Fingerprint>,
        started: Instant,
        started_at: DateTime<Utc>,
    ) -> CoordinatorResult<OrchestrationResult> {
        let admission = {
            let mut state = lock(&self.state);
            let admission = state.breaker.try_acquire();
            if let Admission::Rejected { retry_after } = admission {
                state.metrics.record_rejection();
                drop(state);
                warn!(
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Circuit breaker open, failing fast"
                );
                return Err(OrchestrationError::CircuitBreakerOpen { retry_after });
            }
            if fingerprint.is_some() {
                state.metrics.record_cache_miss();
            }
            admission
        };
        if admission.is_probe() {
            info!("Circuit breaker half-open, running probe request");
        }
        let mut probe = ProbeSlot {
            state: &self.state,
            admission,
            armed: admission.is_probe(),
        };

        let request_id = Uuid::new_v4();
        let outcome = self.run_stages(request).await;
        let processing_time_ms = elapsed_ms(started);

        let stages = match outcome {
            Ok(stages) => stages,
            Err(err) => {
                let tripped = {
                    let mut state = lock(&self.state);
                    state.metrics.record_failure(processing_time_ms);
                    probe.armed = false;
                    state.breaker.record_failure(&admission)
                };
                warn!(
                    request_id = %request_id,
                    stage = ?err.stage(),
                    elapsed_ms = processing_time_ms,
                    error = %err,
                    "Orchestration failed"
                );
                if tripped {
                    warn!(
                        threshold = self.config.failure_threshold,
                        cooldown_ms = self.config.cooldown_ms,
                        "Circuit breaker opened"
                    );
                }
                return Err(err);
            }
        };

        let result = self.assemble(
            request,
            request_id,
            stages,
            fingerprint.cloned(),
            started_at,
            processing_time_ms,
        );
        let recovered = {
            let mut state = lock(&self.state);
            state
                .metrics
                .record_success(processing_time_ms, false, self.is_acceptable(&result));
            probe.armed = false;
            state.breaker.record_success(&admission)
        };
        if recovered {
            info!("Circuit breaker closed after successful probe");
        }

        info!(
            request_id = %result.request_id,
            role = %result.routing.selected_role,
            confidence = result.confidence,
            overall_score = result.quality_metrics.overall_score,
            elapsed_ms = processing_time_ms,
            fingerprint = fingerprint.map(Fingerprint::short).unwrap_or("-"),
            "Orchestration complete"
        );
        Ok(result)
    }

    async fn run_stages(&self, request: &Request) -> CoordinatorResult<StageOutputs> {
        let engine_budget = ExecutionBudget::new().timeout_ms(self.config.engine_timeout_ms);
        let mut timings = BTreeMap::new();

        let t = Instant::now();
        let decomposer = Arc::clone(&self.decomposer);
        let (query, context) = (request.query.clone(), request.context.clone());
        let decomposition = run_blocking(&engine_budget, move || {
            decomposer.decompose(&query, &context)
        })
        .await
        .map_err(|e| guarded(PipelineStage::Decomposition, e))?
        .map_err(OrchestrationError::Decomposition)?;
        timings.insert("decomposition".to_string(), elapsed_ms(t));
        debug!(
            subtasks = decomposition.depth(),
            confidence = decomposition.confidence,
            "Decomposition stage done"
        );

        let requirements = self.derive_requirements(request.requirements, &decomposition);

        let t = Instant::now();
        let router = Arc::clone(&self.router);
        let (query, context) = (request.query.clone(), request.context.clone());
        let routing = run_blocking(&engine_budget, move || {
            router.route(&query, &context, requirements.as_ref())
        })
        .await
        .map_err(|e| guarded(PipelineStage::Routing, e))?
        .map_err(OrchestrationError::Routing)?;
        timings.insert("routing".to_string(), elapsed_ms(t));
        debug!(
            role = %routing.selected_role,
            confidence = routing.confidence,
            "Routing stage done"
        );

        let t = Instant::now();
        let executor_budget = ExecutionBudget::new().timeout_ms(self.config.executor_timeout_ms);
        let executor = Arc::clone(&self.executor);
        let (plan, decision) = (decomposition.clone(), routing.clone());
        let answer = run_spawned(&executor_budget, async move {
            executor.execute(&plan, &decision).await
        })
        .await
        .map_err(|e| guarded(PipelineStage::Execution, e))?
        .map_err(OrchestrationError::Execution)?;
        timings.insert("execution".to_string(), elapsed_ms(t));

        Ok(StageOutputs {
            decomposition,
            routing,
            requirements,
            answer,
            timings,
        })
    }

    /// Explicit requirements win; a low-confidence decomposition asks for a
    /// higher-quality role when none was requested.
    fn derive_requirements(
        &self,
        explicit: Option<Requirements>,
        decomposition: &Decomposition,
    ) -> Option<Requirements> {
        let mut derived = Requirements::default();
        if decomposition.termination_reason == Some(TerminationReason::LowConfidence) {
            derived.min_quality = Some(self.config.low_confidence_min_quality);
        }
        let merged = explicit.unwrap_or_default().merged_with(derived);
        (!merged.is_empty()).then_some(merged)
    }

    fn latency_budget_ms(&self, requirements: Option<&Requirements>) -> u64 {
        requirements
            .and_then(|r| r.max_response_time_ms)
            .unwrap_or(self.config.acceptable_latency_ms.round() as u64)
    }

    fn performance_flags(&self, processing_time_ms: f64) -> Vec<String> {
        let mut flags = Vec::new();
        if processing_time_ms > self.config.acceptable_latency_ms {
            flags.push("slow_response".to_string());
        }
        if processing_time_ms >= self.config.critical_latency_ms {
            flags.push("critical_latency".to_string());
        }
        flags
    }

    fn assemble(
        &self,
        request: &Request,
        request_id: Uuid,
        stages: StageOutputs,
        fingerprint: Option<Fingerprint>,
        started_at: DateTime<Utc>,
        processing_time_ms: f64,
    ) -> OrchestrationResult {
        let StageOutputs {
            decomposition,
            routing,
            requirements,
            answer,
            timings,
        } = stages;

        let budget_ms = self.latency_budget_ms(requirements.as_ref());
        let workflow = WorkflowPlan::build(&decomposition, &routing);
        let quality_metrics = QualityMetrics::evaluate(
            &decomposition,
            &routing,
            &workflow,
            answer.confidence,
            budget_ms,
        );
        let confidence = quality::combined_confidence(
            decomposition.confidence,
            routing.confidence,
            answer.confidence,
        );

        let performance_flags = self.performance_flags(processing_time_ms);
        if !performance_flags.is_empty() {
            warn!(
                request_id = %request_id,
                elapsed_ms = processing_time_ms,
                budget_ms,
                "Response exceeded latency budget"
            );
        }

        OrchestrationResult {
            status: if routing.fallback {
                ResultStatus::Degraded
            } else {
                ResultStatus::Success
            },
            request_id,
            query: request.query.clone(),
            metadata: ResultMetadata {
                started_at,
                processing_time_ms,
                cache_hit: false,
                within_budget: routing.estimated_performance.within_budget
                    && processing_time_ms <= budget_ms as f64,
                performance_flags,
                stage_timings_ms: timings,
                requirements,
                fingerprint,
            },
            decomposition,
            routing,
            workflow,
            answer: answer.answer,
            confidence,
            quality_metrics,
        }
    }

    /// Counts toward stability: status `success` with enough confidence.
    fn is_acceptable(&self, result: &OrchestrationResult) -> bool {
        result.status == ResultStatus::Success
            && result.confidence >= self.config.stability_min_confidence
    }

    fn serve_cached(
        &self,
        mut result: OrchestrationResult,
        started: Instant,
        started_at: DateTime<Utc>,
    ) -> OrchestrationResult {
        let processing_time_ms = elapsed_ms(started);
        let acceptable = self.is_acceptable(&result);
        lock(&self.state)
            .metrics
            .record_success(processing_time_ms, true, acceptable);

        let budget_ms = self.latency_budget_ms(result.metadata.requirements.as_ref());
        result.metadata.started_at = started_at;
        result.metadata.processing_time_ms = processing_time_ms;
        result.metadata.cache_hit = true;
        result.metadata.within_budget = result.routing.estimated_performance.within_budget
            && processing_time_ms <= budget_ms as f64;
        result.metadata.performance_flags = self.performance_flags(processing_time_ms);
        result.metadata.stage_timings_ms.clear();

        debug!(
            request_id = %result.request_id,
            elapsed_ms = processing_time_ms,
            "Served orchestration from cache"
        );
        result
    }

    pub fn get_metrics(&self) -> CoordinatorMetrics {
        lock(&self.state).metrics.snapshot()
    }

    /// Metrics of the router, if it keeps any.
    pub fn get_router_metrics(&self) -> Option<RouterMetrics> {
        self.router.router_metrics()
    }

    pub fn circuit_breaker(&self) -> CircuitBreakerSnapshot {
        lock(&self.state).breaker.snapshot()
    }

    pub fn get_health_status(&self) -> HealthStatus {
        let (metrics, breaker) = {
            let state = lock(&self.state);
            (state.metrics.snapshot(), state.breaker.snapshot())
        };
        HealthStatus::evaluate(
            &metrics,
            breaker,
            self.router.router_metrics(),
            self.cache.len(),
            &self.config,
        )
    }

    /// Zero the counters, close the circuit breaker and reset the router's
    /// metrics and load window. Cached results stay.
    pub fn reset_metrics(&self) {
        {
            let mut state = lock(&self.state);
            state.metrics = MetricsRecorder::default();
            state.breaker.reset();
        }
        self.router.reset_router_metrics();
        info!("Coordinator metrics reset");
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

fn guarded(stage: PipelineStage, err: GuardError) -> OrchestrationError {
    match err {
        GuardError::TimedOut { timeout_ms } => OrchestrationError::Timeout { stage, timeout_ms },
        GuardError::Panicked { message } => OrchestrationError::EnginePanicked { stage, message },
    }
}
