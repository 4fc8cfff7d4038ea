//! Router-side metrics: accuracy, latency and how load spreads over roles.

use super::Role;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Snapshot returned by `CapabilityRouter::metrics`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouterMetrics {
    pub total_routes: u64,
    pub fallback_routes: u64,
    /// Share of decisions whose confidence reached the accuracy threshold.
    pub routing_accuracy: f64,
    pub average_latency_ms: f64,
    /// Normalized Shannon entropy of `role_distribution` (1.0 = evenly spread).
    pub resource_utilization: f64,
    pub role_distribution: BTreeMap<Role, u64>,
}

/// Mutable counters behind the router's mutex.
#[derive(Debug, Default)]
pub(crate) struct RouterStats {
    total: u64,
    fallbacks: u64,
    accurate: u64,
    latency_total_ms: f64,
    distribution: BTreeMap<Role, u64>,
    recent: VecDeque<Role>,
}

impl RouterStats {
    pub(crate) fn record(
        &mut self,
        role: Role,
        accurate: bool,
        fallback: bool,
        latency_ms: f64,
        window: usize,
    ) {
        self.total += 1;
        if accurate {
            self.accurate += 1;
        }
        if fallback {
            self.fallbacks += 1;
        }
        self.latency_total_ms += latency_ms;
        *self.distribution.entry(role).or_insert(0) += 1;

        self.recent.push_back(role);
        while self.recent.len() > window {
            self.recent.pop_front();
        }
    }

    /// Share of the recent window held by `role`, once enough samples exist.
    pub(crate) fn recent_share(&self, role: Role, min_samples: usize) -> Option<f64> {
        if self.recent.is_empty() || self.recent.len() < min_samples {
            return None;
        }
        let count = self.recent.iter().filter(|r| **r == role).count();
        Some(count as f64 / self.recent.len() as f64)
    }

    pub(crate) fn snapshot(&self) -> RouterMetrics {
        let total = self.total.max(1) as f64;
        RouterMetrics {
            total_routes: self.total,
            fallback_routes: self.fallbacks,
            routing_accuracy: if self.total == 0 {
                1.0
            } else {
                self.accurate as f64 / total
            },
            average_latency_ms: if self.total == 0 {
                0.0
            } else {
                self.latency_total_ms / total
            },
            resource_utilization: normalized_entropy(&self.distribution),
            role_distribution: self.distribution.clone(),
        }
    }
}

fn normalized_entropy(distribution: &BTreeMap<Role, u64>) -> f64 {
    let total: u64 = distribution.values().sum();
    if total == 0 {
        return 0.0;
    }
    let entropy: f64 = distribution
        .values()
        .filter(|c| **c > 0)
        .map(|c| {
            let p = *c as f64 / total as f64;
            -p * p.ln()
        })
        .sum();
    (entropy / (Role::all().len() as f64).ln()).clamp(0.0, 1.0)
}
