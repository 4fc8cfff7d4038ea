//! Multi-factor capability scoring and role selection.

use super::metrics::{RouterMetrics, RouterStats};
use super::{
    AlternativeRole, ContextAnalysis, DecisionFactors, PerformanceEstimate, Role, Router,
    RoutingDecision, RoutingError, RoutingRationale, RoutingResult,
};
use crate::config::RouterConfig;
use crate::context::{
    canonicalize, resolve_complexity, tokenize, ComplexityLevel, Context, Requirements,
};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, warn};

/// Per-role scoring breakdown for one request.
#[derive(Debug, Clone, Copy)]
struct RoleScore {
    role: Role,
    keyword_hits: usize,
    keyword: f64,
    domain: f64,
    complexity: f64,
    relevance: f64,
    /// Load-independent score; drives confidence.
    affinity: f64,
    /// Affinity minus the load penalty; drives ordering.
    rank: f64,
    share: Option<f64>,
    latency_ms: u64,
}

/// Production router. Scores every role, applies resource constraints and
/// keeps its own metrics.
pub struct CapabilityRouter {
    config: RouterConfig,
    stats: Mutex<RouterStats>,
}

impl CapabilityRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self {
            config,
            stats: Mutex::new(RouterStats::default()),
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn metrics(&self) -> RouterMetrics {
        self.lock_stats().snapshot()
    }

    pub fn reset_metrics(&self) {
        *self.lock_stats() = RouterStats::default();
    }

    fn lock_stats(&self) -> MutexGuard<'_, RouterStats> {
        self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Richness grows with the number and kind of recognised context keys.
    pub fn richness(&self, context: &Context) -> f64 {
        (context.signal_weight() / self.config.richness_saturation).clamp(0.0, 1.0)
    }

    /// Why this input cannot be scored, if it cannot.
    fn degenerate_reason(
        &self,
        query: &str,
        tokens: &[String],
        context: &Context,
    ) -> Option<String> {
        if context.is_malformed() {
            let keys: Vec<&str> = context.null_keys.iter().map(String::as_str).collect();
            return Some(format!("context contains null values ({})", keys.join(", ")));
        }
        if query.trim().is_empty() {
            return Some("empty query".to_string());
        }
        let chars = query.chars().count();
        if chars > self.config.max_query_chars {
            return Some(format!(
                "query length {} exceeds {} characters",
                chars, self.config.max_query_chars
            ));
        }
        if tokens.is_empty() {
            return Some("query has no recognizable words".to_string());
        }
        None
    }

    fn score_roles(
        &self,
        tokens: &[String],
        context: &Context,
        level: ComplexityLevel,
        richness: f64,
        stats: &RouterStats,
    ) -> RoutingResult<Vec<RoleScore>> {
        let w = &self.config.weights;
        let mut scores = Vec::with_capacity(Role::all().len());

        for &role in Role::all() {
            let profile = role.profile();
            let keyword_hits = profile.keyword_hits(tokens);
            let keyword = (keyword_hits as f64 / self.config.keyword_saturation).min(1.0);

            let domain_hit = context
                .domain
                .as_deref()
                .is_some_and(|d| profile.domains.contains(&d));
            let flag_hit = profile.flag_signals.iter().any(|f| context.has_flag(f));
            let domain = if domain_hit {
                1.0
            } else if flag_hit {
                0.6
            } else {
                0.0
            };

            let relevance = keyword.max(domain);
            let complexity = profile.complexity_match(level);
            let affinity = if relevance > 0.0 {
                w.keyword * keyword
                    + w.domain * domain
                    + w.complexity * complexity
                    + w.richness * richness * relevance
            } else {
                0.0
            };
            if !affinity.is_finite() {
                return Err(RoutingError::ScoringFailed {
                    message: format!("non-finite affinity for {role}"),
                });
            }

            let share = stats.recent_share(role, self.config.load_min_samples);
            let penalty = share
                .filter(|s| *s > self.config.overuse_threshold)
                .map(|s| {
                    w.load_penalty * (s - self.config.overuse_threshold)
                        / (1.0 - self.config.overuse_threshold)
                })
                .unwrap_or(0.0)
                .min(self.config.load_balance_margin);

            scores.push(RoleScore {
                role,
                keyword_hits,
                keyword,
                domain,
                complexity,
                relevance,
                affinity,
                rank: affinity - penalty,
                share,
                latency_ms: profile.estimated_latency_ms(level),
            });
        }

        // Highest rank first; ties resolved by affinity then role order.
        scores.sort_by(|a, b| {
            b.rank
                .total_cmp(&a.rank)
                .then(b.affinity.total_cmp(&a.affinity))
                .then(a.role.cmp(&b.role))
        });
        Ok(scores)
    }

    fn select(
        &self,
        scores: &[RoleScore],
        requirements: Option<&Requirements>,
        analysis: ContextAnalysis,
    ) -> Option<RoutingDecision> {
        let total_affinity: f64 = scores.iter().map(|s| s.affinity).sum();
        let best_affinity = scores.iter().map(|s| s.affinity).fold(0.0, f64::max);
        if best_affinity < self.config.min_relevance || total_affinity <= 0.0 {
            return None;
        }

        let candidates: Vec<&RoleScore> = scores
            .iter()
            .filter(|s| s.affinity >= self.config.min_relevance)
            .collect();
        let top = candidates[0];

        let mut pool = candidates.clone();
        if let Some(min_quality) = requirements.and_then(|r| r.min_quality) {
            let qualified: Vec<&RoleScore> = pool
                .iter()
                .copied()
                .filter(|s| s.role.profile().quality_rating >= min_quality)
                .collect();
            if !qualified.is_empty() {
                pool = qualified;
            }
        }

        let mut within_budget = true;
        let chosen = match requirements.and_then(|r| r.max_response_time_ms) {
            Some(budget) => {
                let limit = budget as f64 * (1.0 + self.config.latency_tolerance);
                match pool.iter().find(|s| s.latency_ms as f64 <= limit) {
                    Some(fit) => *fit,
                    None => {
                        within_budget = false;
                        pool[0]
                    }
                }
            }
            None => pool[0],
        };
        let constraint_note = (chosen.role != top.role).then(|| {
            format!(
                "{} preferred over {} to satisfy requirements",
                chosen.role, top.role
            )
        });

        let strength = chosen.affinity / self.config.weights.affinity_total();
        let dominance = chosen.affinity / total_affinity;
        let confidence = (0.5 * strength + 0.5 * dominance).clamp(0.0, 1.0);

        let alternative_roles: Vec<AlternativeRole> = scores
            .iter()
            .filter(|s| s.role != chosen.role && s.affinity > 0.0)
            .map(|s| AlternativeRole {
                role: s.role,
                score: (s.affinity / total_affinity).clamp(0.0, 1.0),
            })
            .filter(|alt| alt.score > self.config.alternative_floor)
            .take(2)
            .collect();

        let primary_reason = constraint_note.unwrap_or_else(|| {
            if chosen.keyword_hits > 0 {
                format!(
                    "{} keyword signal(s) match {} capabilities",
                    chosen.keyword_hits, chosen.role
                )
            } else {
                format!("context signals match {} capabilities", chosen.role)
            }
        });

        let mut confidence_factors = BTreeMap::new();
        confidence_factors.insert("keyword_match".to_string(), chosen.keyword);
        confidence_factors.insert("domain_match".to_string(), chosen.domain);
        confidence_factors.insert("complexity_match".to_string(), chosen.complexity);
        confidence_factors.insert("context_richness".to_string(), analysis.richness);
        confidence_factors.insert("strength".to_string(), strength.clamp(0.0, 1.0));
        confidence_factors.insert("dominance".to_string(), dominance.clamp(0.0, 1.0));

        Some(RoutingDecision {
            selected_role: chosen.role,
            confidence,
            rationale: RoutingRationale {
                primary_reason,
                confidence_factors,
                decision_factors: DecisionFactors {
                    complexity_match: chosen.complexity,
                    capability_match: chosen.relevance,
                    resource_availability: 1.0 - chosen.share.unwrap_or(0.0),
                },
            },
            alternative_roles,
            estimated_performance: PerformanceEstimate {
                estimated_response_time_ms: chosen.latency_ms,
                within_budget,
            },
            context_analysis: analysis,
            fallback: false,
        })
    }

    fn fallback(
        &self,
        reason: String,
        level: ComplexityLevel,
        analysis: ContextAnalysis,
    ) -> RoutingDecision {
        let profile = Role::Coordinator.profile();
        let mut confidence_factors = BTreeMap::new();
        confidence_factors.insert("fallback".to_string(), self.config.fallback_confidence);

        RoutingDecision {
            selected_role: Role::Coordinator,
            confidence: self.config.fallback_confidence,
            rationale: RoutingRationale {
                primary_reason: format!("fallback to coordinator: {reason}"),
                confidence_factors,
                decision_factors: DecisionFactors {
                    complexity_match: profile.complexity_match(level),
                    capability_match: 0.0,
                    resource_availability: 1.0,
                },
            },
            alternative_roles: Vec::new(),
            estimated_performance: PerformanceEstimate {
                estimated_response_time_ms: profile.estimated_latency_ms(level),
                within_budget: true,
            },
            context_analysis: analysis,
            fallback: true,
        }
    }
}

impl Default for CapabilityRouter {
    fn default() -> Self {
        Self::new(RouterConfig::default())
    }
}

impl Router for CapabilityRouter {
    fn route(
        &self,
        query: &str,
        context: &Context,
        requirements: Option<&Requirements>,
    ) -> RoutingResult<RoutingDecision> {
        let started = Instant::now();
        let canonical = canonicalize(query);
        let tokens = tokenize(&canonical);
        let level = resolve_complexity(context, &tokens);
        let analysis = ContextAnalysis {
            richness: self.richness(context),
            recognized_keys: context.recognized_keys(),
            complexity: level,
        };

        let mut stats = self.lock_stats();
        let decision = match self.degenerate_reason(query, &tokens, context) {
            Some(reason) => {
                warn!(%reason, "Routing degenerate input to coordinator");
                self.fallback(reason, level, analysis)
            }
            None => {
                let scores = self.score_roles(&tokens, context, level, analysis.richness, &stats)?;
                match self.select(&scores, requirements, analysis.clone()) {
                    Some(decision) => decision,
                    None => self.fallback(
                        "no role cleared the minimum relevance threshold".to_string(),
                        level,
                        analysis,
                    ),
                }
            }
        };

        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        stats.record(
            decision.selected_role,
            decision.confidence >= self.config.accuracy_confidence,
            decision.fallback,
            latency_ms,
            self.config.load_window,
        );
        drop(stats);

        debug!(
            role = %decision.selected_role,
            confidence = decision.confidence,
            alternatives = decision.alternative_roles.len(),
            fallback = decision.fallback,
            latency_ms,
            "Routed request"
        );
        Ok(decision)
    }

    fn router_metrics(&self) -> Option<RouterMetrics> {
        Some(self.metrics())
    }

    fn reset_router_metrics(&self) {
        self.reset_metrics();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn route(query: &str, context: serde_json::Value) -> RoutingDecision {
        CapabilityRouter::default()
            .route(query, &Context::from_value(&context), None)
            .unwrap()
    }

    #[test]
    fn test_analyst_scenario() {
        let d = route("Analyze customer purchase patterns", json!({"data": true}));
        assert_eq!(d.selected_role, Role::Analyst);
        assert!(d.confidence >= 0.7, "confidence {}", d.confidence);
        assert!(!d.fallback);
    }

    #[test]
    fn test_each_role_reachable() {
        let cases = [
            ("Analyze quarterly revenue trends", Role::Analyst),
            ("Summarize the meeting notes into a brief recap", Role::Synthesizer),
            ("Explain the legal compliance requirements for this contract", Role::Specialist),
            ("Schedule a meeting with the project team", Role::Coordinator),
            ("Verify and audit the expense entries for errors", Role::Validator),
        ];
        for (query, expected) in cases {
            assert_eq!(route(query, json!({})).selected_role, expected, "{query}");
        }
    }

    #[test]
    fn test_degenerate_inputs_fall_back() {
        let long = "a".repeat(10_000);
        for query in ["", "   \t\n", long.as_str(), "🚀🔥✨", "test query"] {
            let d = route(query, json!({}));
            assert_eq!(d.selected_role, Role::Coordinator, "{query:?}");
            assert!(d.confidence > 0.0 && d.confidence < 0.5);
            assert!(d.fallback);
            assert!(d.alternative_roles.is_empty());
        }
    }

    #[test]
    fn test_null_context_falls_back() {
        let d = route("Analyze customer purchase patterns", json!({"domain": null}));
        assert_eq!(d.selected_role, Role::Coordinator);
        assert!(d.rationale.primary_reason.contains("null"));
    }

    #[test]
    fn test_domain_signal_alone_routes() {
        let d = route("Look into this for me", json!({"domain": "legal"}));
        assert_eq!(d.selected_role, Role::Specialist);
    }

    #[test]
    fn test_paraphrases_route_identically() {
        let queries = [
            "Analyze sales performance data for Q4",
            "Review Q4 sales performance metrics",
            "Examine fourth quarter sales analytics",
            "Evaluate sales data from the last quarter",
        ];
        for q in queries {
            assert_eq!(route(q, json!({})).selected_role, Role::Analyst, "{q}");
        }
    }

    #[test]
    fn test_repeat_calls_are_identical() {
        let router = CapabilityRouter::default();
        let ctx = Context::from_value(&json!({"domain": "sales"}));
        let a = router.route("Compare regional revenue", &ctx, None).unwrap();
        let b = router.route("Compare regional revenue", &ctx, None).unwrap();
        assert_eq!(a.selected_role, b.selected_role);
        assert_eq!(a.confidence, b.confidence);
    }

    #[test]
    fn test_richer_context_raises_confidence() {
        let sparse = route("Analyze churn", json!({}));
        let rich = route(
            "Analyze churn",
            json!({"timeframe": "Q3", "department": "growth", "priority": "high", "data": true}),
        );
        assert_eq!(sparse.selected_role, rich.selected_role);
        assert!(rich.context_analysis.richness > sparse.context_analysis.richness);
        assert!(rich.confidence > sparse.confidence);
    }

    #[test]
    fn test_alternatives_capped_at_two() {
        let d = route(
            "Analyze the data, summarize findings, verify accuracy, schedule a review meeting and check legal compliance",
            json!({}),
        );
        assert!(d.alternative_roles.len() <= 2);
        assert!(d.alternative_roles.iter().all(|a| a.role != d.selected_role));
        assert!(d.alternative_roles.iter().all(|a| (0.0..=1.0).contains(&a.score)));
    }

    #[test]
    fn test_latency_budget_prefers_faster_relevant_role() {
        let router = CapabilityRouter::default();
        let ctx = Context::from_value(&json!({"complexity": "high"}));
        let query = "Check the security architecture of the api";

        let unconstrained = router.route(query, &ctx, None).unwrap();
        assert_eq!(unconstrained.selected_role, Role::Specialist);
        assert!(unconstrained.alternative_roles.iter().any(|a| a.role == Role::Validator));

        let reqs = Requirements {
            max_response_time_ms: Some(130),
            min_quality: None,
        };
        let constrained = router.route(query, &ctx, Some(&reqs)).unwrap();
        assert_eq!(constrained.selected_role, Role::Validator);
        assert!(constrained.estimated_performance.estimated_response_time_ms as f64 <= 130.0 * 1.2);
        assert!(constrained.estimated_performance.within_budget);
        assert!(constrained.rationale.primary_reason.contains("requirements"));
    }

    #[test]
    fn test_quality_wins_over_speed() {
        let router = CapabilityRouter::default();
        let ctx = Context::from_value(&json!({"complexity": "high"}));
        let reqs = Requirements {
            max_response_time_ms: Some(130),
            min_quality: Some(0.9),
        };
        let d = router
            .route("Check the security architecture of the api", &ctx, Some(&reqs))
            .unwrap();
        assert_eq!(d.selected_role, Role::Specialist);
        assert!(!d.estimated_performance.within_budget);
    }

    #[test]
    fn test_metrics_track_distribution() {
        let router = CapabilityRouter::default();
        router.route("Analyze sales", &Context::default(), None).unwrap();
        router.route("", &Context::default(), None).unwrap();
        let m = router.metrics();
        assert_eq!(m.total_routes, 2);
        assert_eq!(m.fallback_routes, 1);
        assert_eq!(m.role_distribution.get(&Role::Analyst), Some(&1));
        assert_eq!(m.role_distribution.get(&Role::Coordinator), Some(&1));

        router.reset_metrics();
        assert_eq!(router.metrics().total_routes, 0);
    }

    #[test]
    fn test_clear_winner_is_stable_under_sustained_load() {
        let router = CapabilityRouter::new(RouterConfig {
            load_min_samples: 5,
            ..RouterConfig::default()
        });
        let ctx = Context::default();
        let query = "Analyze quarterly revenue trends";
        let first = router.route(query, &ctx, None).unwrap();
        assert_eq!(first.selected_role, Role::Analyst);
        for _ in 0..50 {
            let d = router.route(query, &ctx, None).unwrap();
            assert_eq!(d.selected_role, first.selected_role);
            assert_eq!(d.confidence, first.confidence);
        }
        assert_eq!(router.metrics().role_distribution.get(&Role::Analyst), Some(&51));
    }

    #[test]
    fn test_zero_margin_disables_load_balancing() {
        let router = CapabilityRouter::new(RouterConfig {
            load_min_samples: 5,
            load_balance_margin: 0.0,
            ..RouterConfig::default()
        });
        let ctx = Context::from_value(&json!({"complexity": "medium"}));
        for _ in 0..30 {
            let d = router.route("Check the figures", &ctx, None).unwrap();
            assert_eq!(d.selected_role, Role::Analyst);
        }
    }

    #[test]
    fn test_sustained_overuse_spreads_near_ties() {
        let router = CapabilityRouter::new(RouterConfig {
            load_min_samples: 5,
            ..RouterConfig::default()
        });
        // Analyst and validator tie exactly at medium complexity; role order favors analyst.
        let ctx = Context::from_value(&json!({"complexity": "medium"}));
        let query = "Check the figures";
        let first = router.route(query, &ctx, None).unwrap();
        assert_eq!(first.selected_role, Role::Analyst);

        let mut seen_validator = false;
        for _ in 0..30 {
            let d = router.route(query, &ctx, None).unwrap();
            seen_validator |= d.selected_role == Role::Validator;
        }
        assert!(seen_validator);
        let m = router.metrics();
        let analyst = *m.role_distribution.get(&Role::Analyst).unwrap_or(&0) as f64;
        assert!(analyst / (m.total_routes as f64) < 0.9);
    }
}
