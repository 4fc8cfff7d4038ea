//! Coordinator request metrics.

use serde::{Deserialize, Serialize};

/// Snapshot returned by `OrchestrationCoordinator::get_metrics`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorMetrics {
    pub total_requests: u64,
    /// Requests that completed without an error, degraded or not.
    pub successful_requests: u64,
    /// Successful requests with status `success` and confidence at or above
    /// `stability_min_confidence`.
    pub acceptable_requests: u64,
    pub failed_requests: u64,
    /// Mean over requests that reached the cache or the pipeline.
    pub average_response_time_ms: f64,
    pub max_response_time_ms: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Requests failed fast by the open circuit breaker.
    pub circuit_breaker_rejections: u64,
    /// acceptable / total (1.0 before any request).
    pub stability_score: f64,
    /// failed / total (0.0 before any request).
    pub error_rate: f64,
}

impl CoordinatorMetrics {
    pub fn cache_hit_rate(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / lookups as f64
        }
    }
}

/// Counters behind the coordinator's state mutex.
#[derive(Debug, Default)]
pub(crate) struct MetricsRecorder {
    total: u64,
    successes: u64,
    acceptable: u64,
    failures: u64,
    timed: u64,
    response_total_ms: f64,
    response_max_ms: f64,
    cache_hits: u64,
    cache_misses: u64,
    rejections: u64,
}

impl MetricsRecorder {
    /// A completed request; `acceptable` marks it as counting toward stability.
    pub(crate) fn record_success(&mut self, elapsed_ms: f64, cache_hit: bool, acceptable: bool) {
        self.total += 1;
        self.successes += 1;
        if acceptable {
            self.acceptable += 1;
        }
        if cache_hit {
            self.cache_hits += 1;
        }
        self.record_latency(elapsed_ms);
    }

    pub(crate) fn record_failure(&mut self, elapsed_ms: f64) {
        self.total += 1;
        self.failures += 1;
        self.record_latency(elapsed_ms);
    }

    /// Fail-fast rejection: counts as a failed request, not as a latency sample.
    pub(crate) fn record_rejection(&mut self) {
        self.total += 1;
        self.failures += 1;
        self.rejections += 1;
    }

    pub(crate) fn record_cache_miss(&mut self) {
        self.cache_misses += 1;
    }

    fn record_latency(&mut self, elapsed_ms: f64) {
        self.timed += 1;
        self.response_total_ms += elapsed_ms;
        self.response_max_ms = self.response_max_ms.max(elapsed_ms);
    }

    pub(crate) fn snapshot(&self) -> CoordinatorMetrics {
        let (stability_score, error_rate) = if self.total == 0 {
            (1.0, 0.0)
        } else {
            (
                self.acceptable as f64 / self.total as f64,
                self.failures as f64 / self.total as f64,
            )
        };
        CoordinatorMetrics {
            total_requests: self.total,
            successful_requests: self.successes,
            acceptable_requests: self.acceptable,
            failed_requests: self.failures,
            average_response_time_ms: if self.timed == 0 {
                0.0
            } else {
                self.response_total_ms / self.timed as f64
            },
            max_response_time_ms: self.response_max_ms,
            cache_hits: self.cache_hits,
            cache_misses: self.cache_misses,
            circuit_breaker_rejections: self.rejections,
            stability_score,
            error_rate,
        }
    }
}
