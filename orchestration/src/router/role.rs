//! Role taxonomy and affinity profiles.
//!
//! ```text
//! Role         | Signals                              | Band          | Base latency
//! -------------|--------------------------------------|---------------|-------------
//! analyst      | analyze, metrics, sales, trends      | medium..high  | 140ms
//! synthesizer  | summarize, draft, recap, overview    | low..medium   | 120ms
//! specialist   | legal, technical, compliance, api    | high          | 180ms
//! coordinator  | schedule, meeting, plan, workflow    | low..high     | 100ms
//! validator    | verify, check, audit, confirm        | low..medium   | 110ms
//! ```

use crate::context::ComplexityLevel;
use serde::{Deserialize, Serialize};

/// Processing capability a request can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Analyst,
    Synthesizer,
    Specialist,
    Coordinator,
    Validator,
}

impl Role {
    pub fn all() -> &'static [Role] {
        &[
            Role::Analyst,
            Role::Synthesizer,
            Role::Specialist,
            Role::Coordinator,
            Role::Validator,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analyst => "analyst",
            Self::Synthesizer => "synthesizer",
            Self::Specialist => "specialist",
            Self::Coordinator => "coordinator",
            Self::Validator => "validator",
        }
    }

    pub fn profile(&self) -> &'static RoleProfile {
        match self {
            Self::Analyst => &ANALYST,
            Self::Synthesizer => &SYNTHESIZER,
            Self::Specialist => &SPECIALIST,
            Self::Coordinator => &COORDINATOR,
            Self::Validator => &VALIDATOR,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::all()
            .iter()
            .copied()
            .find(|r| r.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown role: {s}"))
    }
}

/// Static affinity profile for a role.
#[derive(Debug)]
pub struct RoleProfile {
    /// Token prefixes that signal this role ("analy" matches analyze/analysis).
    pub keyword_stems: &'static [&'static str],
    /// Context `domain` values this role serves.
    pub domains: &'static [&'static str],
    /// Context flags (keys set to `true`) that hint at this role.
    pub flag_signals: &'static [&'static str],
    /// Lowest complexity band the role is built for.
    pub min_complexity: ComplexityLevel,
    /// Highest complexity band the role is built for.
    pub max_complexity: ComplexityLevel,
    /// Typical response time at medium complexity.
    pub base_latency_ms: u64,
    /// Expected answer quality (0.0-1.0).
    pub quality_rating: f64,
    /// Plan actions this role handles well.
    pub actions: &'static [&'static str],
    pub description: &'static str,
}

impl RoleProfile {
    /// Number of tokens matching any keyword stem.
    pub fn keyword_hits(&self, tokens: &[String]) -> usize {
        tokens
            .iter()
            .filter(|t| self.keyword_stems.iter().any(|stem| t.starts_with(stem)))
            .count()
    }

    /// 1.0 inside the band, 0.5 one band away, 0.0 otherwise.
    pub fn complexity_match(&self, level: ComplexityLevel) -> f64 {
        if level >= self.min_complexity && level <= self.max_complexity {
            return 1.0;
        }
        let distance = level
            .distance(self.min_complexity)
            .min(level.distance(self.max_complexity));
        if distance == 1 {
            0.5
        } else {
            0.0
        }
    }

    pub fn estimated_latency_ms(&self, level: ComplexityLevel) -> u64 {
        (self.base_latency_ms as f64 * level.latency_multiplier()).round() as u64
    }

    pub fn handles_action(&self, action: &str) -> bool {
        self.actions.contains(&action)
    }
}

static ANALYST: RoleProfile = RoleProfile {
    keyword_stems: &[
        "analy", "data", "metric", "trend", "pattern", "perform", "sales", "statist", "examin",
        "evaluat", "compar", "forecast", "insight", "kpi", "revenue", "purchas", "quarter", "q1",
        "q2", "q3", "q4", "growth", "churn", "segment", "customer", "correlat", "benchmark",
        "figures", "numbers",
    ],
    domains: &[
        "analytics",
        "data",
        "finance",
        "sales",
        "marketing",
        "business_intelligence",
    ],
    flag_signals: &["data", "metrics", "dataset", "numbers"],
    min_complexity: ComplexityLevel::Medium,
    max_complexity: ComplexityLevel::High,
    base_latency_ms: 140,
    quality_rating: 0.9,
    actions: &["analyze", "compare", "forecast", "evaluate", "measure"],
    description: "Quantitative analysis, metrics and trend interpretation",
};

static SYNTHESIZER: RoleProfile = RoleProfile {
    keyword_stems: &[
        "summar", "synthes", "combin", "consolidat", "overview", "draft", "writ", "compos",
        "brief", "recap", "merg", "digest", "notes", "minutes", "outline", "highlight",
        "takeaway", "condens",
    ],
    domains: &["communication", "documentation", "content", "reporting"],
    flag_signals: &["documents", "sources", "transcript"],
    min_complexity: ComplexityLevel::Low,
    max_complexity: ComplexityLevel::Medium,
    base_latency_ms: 120,
    quality_rating: 0.85,
    actions: &["summarize", "draft", "write", "combine", "outline"],
    description: "Summaries, drafts and consolidation of multiple sources",
};

static SPECIALIST: RoleProfile = RoleProfile {
    keyword_stems: &[
        "technical", "legal", "complian", "regulat", "secur", "architect", "engineer", "medical",
        "tax", "contract", "code", "api", "infrastructur", "expert", "configur", "implement",
        "debug", "deploy", "database", "encrypt", "patent", "clinical", "law",
    ],
    domains: &[
        "legal",
        "technical",
        "engineering",
        "security",
        "compliance",
        "medical",
        "it",
    ],
    flag_signals: &["technical", "regulated", "confidential"],
    min_complexity: ComplexityLevel::High,
    max_complexity: ComplexityLevel::High,
    base_latency_ms: 180,
    quality_rating: 0.92,
    actions: &["implement", "design", "configure", "debug", "deploy"],
    description: "Deep domain expertise for technical, legal and regulated questions",
};

static COORDINATOR: RoleProfile = RoleProfile {
    keyword_stems: &[
        "schedul", "meeting", "plan", "organi", "assign", "coordinat", "workflow", "deadline",
        "team", "delegat", "agenda", "process", "manag", "timeline", "task", "project", "follow",
        "remind", "calendar", "milestone", "priorit", "allocat",
    ],
    domains: &[
        "operations",
        "project_management",
        "workflow",
        "scheduling",
        "hr",
    ],
    flag_signals: &["team", "deadline", "multi_step"],
    min_complexity: ComplexityLevel::Low,
    max_complexity: ComplexityLevel::High,
    base_latency_ms: 100,
    quality_rating: 0.8,
    actions: &["schedule", "plan", "organize", "assign", "coordinate", "general"],
    description: "Workflow and process management; fallback for unclear requests",
};

static VALIDATOR: RoleProfile = RoleProfile {
    keyword_stems: &[
        "valid", "verif", "check", "confirm", "audit", "ensur", "accura", "approv", "proofread",
        "consisten", "correct", "inspect", "review", "error", "mistake", "discrepanc", "reconcil",
    ],
    domains: &["quality", "qa", "audit", "review", "verification"],
    flag_signals: &["requires_approval", "audit"],
    min_complexity: ComplexityLevel::Low,
    max_complexity: ComplexityLevel::Medium,
    base_latency_ms: 110,
    quality_rating: 0.88,
    actions: &["verify", "validate", "check", "review", "audit"],
    description: "Verification, auditing and consistency checks",
};
