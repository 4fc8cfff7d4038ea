//! Tunable configuration for the decomposer, router and coordinator.
//!
//! Precedence: built-in defaults, then an optional TOML file, then
//! `ORCH_*` environment variables.
//!
//! ```toml
//! [router.weights]
//! keyword = 0.55
//! domain = 0.15
//!
//! [coordinator]
//! failure_threshold = 5
//! cache_ttl_secs = 300
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    pub decomposer: DecomposerConfig,
    pub router: RouterConfig,
    pub coordinator: CoordinatorConfig,
}

impl OrchestrationConfig {
    /// Load from a TOML file; missing sections keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Override fields from `ORCH_*` environment variables.
    pub fn apply_env(&mut self) {
        env_parse("ORCH_DECOMPOSER_MAX_DEPTH", &mut self.decomposer.max_depth);
        env_parse(
            "ORCH_DECOMPOSER_CONFIDENCE_FLOOR",
            &mut self.decomposer.confidence_floor,
        );
        env_parse("ORCH_ROUTER_MIN_RELEVANCE", &mut self.router.min_relevance);
        env_parse(
            "ORCH_ROUTER_FALLBACK_CONFIDENCE",
            &mut self.router.fallback_confidence,
        );
        env_parse("ORCH_ROUTER_MAX_QUERY_CHARS", &mut self.router.max_query_chars);
        env_parse(
            "ORCH_ROUTER_OVERUSE_THRESHOLD",
            &mut self.router.overuse_threshold,
        );
        env_parse(
            "ORCH_ROUTER_LOAD_BALANCE_MARGIN",
            &mut self.router.load_balance_margin,
        );
        env_parse(
            "ORCH_BREAKER_FAILURE_THRESHOLD",
            &mut self.coordinator.failure_threshold,
        );
        env_parse("ORCH_BREAKER_COOLDOWN_MS", &mut self.coordinator.cooldown_ms);
        env_parse("ORCH_CACHE_TTL_SECS", &mut self.coordinator.cache_ttl_secs);
        env_parse(
            "ORCH_CACHE_MAX_ENTRIES",
            &mut self.coordinator.cache_max_entries,
        );
        env_parse("ORCH_ENGINE_TIMEOUT_MS", &mut self.coordinator.engine_timeout_ms);
        env_parse(
            "ORCH_EXECUTOR_TIMEOUT_MS",
            &mut self.coordinator.executor_timeout_ms,
        );
        env_parse(
            "ORCH_STABILITY_MIN_CONFIDENCE",
            &mut self.coordinator.stability_min_confidence,
        );
        if let Ok(val) = std::env::var("ORCH_CACHE_ENABLED") {
            self.coordinator.cache_enabled = val.to_lowercase() == "true" || val == "1";
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.decomposer.validate()?;
        self.router.validate()?;
        self.coordinator.validate()
    }
}

fn env_parse<T: std::str::FromStr>(var: &str, target: &mut T) {
    if let Ok(raw) = std::env::var(var) {
        match raw.parse() {
            Ok(value) => *target = value,
            Err(_) => {
                tracing::warn!(var, value = %raw, "Ignoring unparseable environment override")
            }
        }
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        message: message.into(),
    }
}

fn check_unit(name: &str, value: f64) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(invalid(format!("{name} must be within [0, 1], got {value}")));
    }
    Ok(())
}

/// Decomposer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecomposerConfig {
    /// Maximum number of sub-tasks before the depth limit triggers.
    pub max_depth: usize,
    /// Overall confidence below which decomposition terminates.
    pub confidence_floor: f64,
}

impl Default for DecomposerConfig {
    fn default() -> Self {
        Self {
            max_depth: 5,
            confidence_floor: 0.4,
        }
    }
}

impl DecomposerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_depth == 0 {
            return Err(invalid("decomposer.max_depth must be at least 1"));
        }
        check_unit("decomposer.confidence_floor", self.confidence_floor)
    }
}

/// Relative weights of the affinity factors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub keyword: f64,
    pub domain: f64,
    pub complexity: f64,
    pub richness: f64,
    /// Maximum penalty applied to an overused role when ranking.
    pub load_penalty: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            keyword: 0.55,
            domain: 0.15,
            complexity: 0.15,
            richness: 0.15,
            load_penalty: 0.10,
        }
    }
}

impl ScoringWeights {
    /// Sum of the affinity weights (the load penalty is not part of affinity).
    pub fn affinity_total(&self) -> f64 {
        self.keyword + self.domain + self.complexity + self.richness
    }
}

/// Capability router settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub weights: ScoringWeights,
    /// Keyword hits at which the keyword factor saturates.
    pub keyword_saturation: f64,
    /// Context signal weight at which richness saturates.
    pub richness_saturation: f64,
    /// Affinity the best role must reach to avoid the coordinator fallback.
    pub min_relevance: f64,
    /// Confidence reported for fallback decisions.
    pub fallback_confidence: f64,
    /// Queries longer than this are treated as degenerate.
    pub max_query_chars: usize,
    /// Minimum normalized share for an alternative role.
    pub alternative_floor: f64,
    /// Share of recent decisions above which a role counts as overused.
    pub overuse_threshold: f64,
    /// Number of recent decisions considered for load balancing.
    pub load_window: usize,
    /// Decisions required before the load penalty applies.
    pub load_min_samples: usize,
    /// Largest affinity lead the load penalty can overturn. Roles ahead by
    /// more than this are selected regardless of recent load.
    pub load_balance_margin: f64,
    /// Tolerance on `max_response_time` (0.2 = 20%).
    pub latency_tolerance: f64,
    /// Confidence at or above which a decision counts toward routing accuracy.
    pub accuracy_confidence: f64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            keyword_saturation: 3.0,
            richness_saturation: 4.0,
            min_relevance: 0.15,
            fallback_confidence: 0.3,
            max_query_chars: 5_000,
            alternative_floor: 0.05,
            overuse_threshold: 0.6,
            load_window: 100,
            load_min_samples: 20,
            load_balance_margin: 0.05,
            latency_tolerance: 0.2,
            accuracy_confidence: 0.5,
        }
    }
}

impl RouterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let w = &self.weights;
        for (name, value) in [
            ("router.weights.keyword", w.keyword),
            ("router.weights.domain", w.domain),
            ("router.weights.complexity", w.complexity),
            ("router.weights.richness", w.richness),
            ("router.weights.load_penalty", w.load_penalty),
            ("router.min_relevance", self.min_relevance),
            ("router.fallback_confidence", self.fallback_confidence),
            ("router.alternative_floor", self.alternative_floor),
            ("router.overuse_threshold", self.overuse_threshold),
            ("router.load_balance_margin", self.load_balance_margin),
            ("router.accuracy_confidence", self.accuracy_confidence),
        ] {
            check_unit(name, value)?;
        }
        if w.affinity_total() <= 0.0 {
            return Err(invalid("router.weights must not all be zero"));
        }
        if self.fallback_confidence <= 0.0 {
            return Err(invalid("router.fallback_confidence must be positive"));
        }
        if self.keyword_saturation <= 0.0 || self.richness_saturation <= 0.0 {
            return Err(invalid("router saturation values must be positive"));
        }
        if self.overuse_threshold >= 1.0 {
            return Err(invalid("router.overuse_threshold must be below 1"));
        }
        if self.load_window == 0 {
            return Err(invalid("router.load_window must be at least 1"));
        }
        if self.latency_tolerance < 0.0 {
            return Err(invalid("router.latency_tolerance must not be negative"));
        }
        Ok(())
    }
}

/// Coordinator, resilience and health settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Time the circuit stays open before a probe is allowed.
    pub cooldown_ms: u64,
    pub cache_enabled: bool,
    pub cache_ttl_secs: u64,
    pub cache_max_entries: usize,
    /// Execution-time guard for decomposer and router calls.
    pub engine_timeout_ms: u64,
    /// Execution-time guard for the executor.
    pub executor_timeout_ms: u64,
    /// Stability required for a "healthy" status.
    pub stability_target: f64,
    /// Result confidence a `success` result needs to count toward stability.
    pub stability_min_confidence: f64,
    pub optimal_latency_ms: f64,
    pub good_latency_ms: f64,
    /// Average response time budget.
    pub acceptable_latency_ms: f64,
    /// Worst-case response time flagged as critical.
    pub critical_latency_ms: f64,
    /// `min_quality` derived for low-confidence decompositions.
    pub low_confidence_min_quality: f64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_ms: 30_000,
            cache_enabled: true,
            cache_ttl_secs: 300,
            cache_max_entries: 1_024,
            engine_timeout_ms: 2_000,
            executor_timeout_ms: 30_000,
            stability_target: 0.986,
            stability_min_confidence: 0.8,
            optimal_latency_ms: 100.0,
            good_latency_ms: 150.0,
            acceptable_latency_ms: 200.0,
            critical_latency_ms: 300.0,
            low_confidence_min_quality: 0.85,
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(invalid("coordinator.failure_threshold must be at least 1"));
        }
        if self.engine_timeout_ms == 0 || self.executor_timeout_ms == 0 {
            return Err(invalid("coordinator timeouts must be positive"));
        }
        if self.cache_enabled && self.cache_max_entries == 0 {
            return Err(invalid(
                "coordinator.cache_max_entries must be positive when caching is enabled",
            ));
        }
        check_unit("coordinator.stability_target", self.stability_target)?;
        check_unit(
            "coordinator.stability_min_confidence",
            self.stability_min_confidence,
        )?;
        check_unit(
            "coordinator.low_confidence_min_quality",
            self.low_confidence_min_quality,
        )?;
        if !(self.optimal_latency_ms <= self.good_latency_ms
            && self.good_latency_ms <= self.acceptable_latency_ms
            && self.acceptable_latency_ms <= self.critical_latency_ms)
        {
            return Err(invalid(
                "coordinator latency bands must be ordered optimal <= good <= acceptable <= critical",
            ));
        }
        Ok(())
    }
}
