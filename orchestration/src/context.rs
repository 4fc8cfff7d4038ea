//! Typed request model.
//!
//! Callers hand the coordinator a loosely-typed JSON context. It is parsed
//! exactly once into a [`Context`] with named fields for the signals the
//! engines understand, a set of boolean flags, and an open extension bag
//! for everything else. Parsing never fails: unusable values are kept as
//! extensions and explicit `null` values are recorded in `null_keys`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Key under which callers may pass explicit [`Requirements`].
pub const REQUIREMENTS_KEY: &str = "requirements";

/// Request complexity band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityLevel {
    Low,
    Medium,
    High,
}

impl ComplexityLevel {
    /// Parse a context value: a label ("low", "complex", ...) or a 1-5 score.
    pub fn parse(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "low" | "simple" | "easy" | "trivial" => Some(Self::Low),
                "medium" | "moderate" | "normal" | "average" => Some(Self::Medium),
                "high" | "complex" | "hard" | "advanced" => Some(Self::High),
                _ => None,
            },
            Value::Number(n) => n.as_f64().map(|score| {
                if score >= 4.0 {
                    Self::High
                } else if score >= 2.0 {
                    Self::Medium
                } else {
                    Self::Low
                }
            }),
            _ => None,
        }
    }

    /// Multiplier applied to a role's base latency.
    pub fn latency_multiplier(self) -> f64 {
        match self {
            Self::Low => 0.8,
            Self::Medium => 1.0,
            Self::High => 1.3,
        }
    }

    /// Distance between two bands (0, 1 or 2).
    pub fn distance(self, other: Self) -> u8 {
        (self as i8 - other as i8).unsigned_abs()
    }
}

impl std::fmt::Display for ComplexityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// How soon the caller needs an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Normal,
    High,
    Critical,
}

impl Urgency {
    pub fn parse(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "low" => Some(Self::Low),
                "normal" | "medium" | "standard" => Some(Self::Normal),
                "high" | "urgent" => Some(Self::High),
                "critical" | "immediate" | "asap" => Some(Self::Critical),
                _ => None,
            },
            Value::Bool(true) => Some(Self::High),
            Value::Bool(false) => Some(Self::Normal),
            _ => None,
        }
    }
}

/// Resource constraints a caller may attach to a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Requirements {
    /// Latency budget for the selected role, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_response_time_ms: Option<u64>,
    /// Minimum quality rating (0.0-1.0) the selected role must offer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_quality: Option<f64>,
}

impl Requirements {
    /// Parse a `requirements` object. Returns `None` when nothing usable is set.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let max_response_time_ms = obj
            .get("max_response_time_ms")
            .or_else(|| obj.get("max_response_time"))
            .and_then(Value::as_f64)
            .filter(|ms| ms.is_finite() && *ms > 0.0)
            .map(|ms| ms.round() as u64);
        let min_quality = obj
            .get("min_quality")
            .and_then(Value::as_f64)
            .filter(|q| q.is_finite())
            .map(|q| q.clamp(0.0, 1.0));

        let reqs = Self {
            max_response_time_ms,
            min_quality,
        };
        if reqs.is_empty() {
            None
        } else {
            Some(reqs)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.max_response_time_ms.is_none() && self.min_quality.is_none()
    }

    /// Fill unset fields from `fallback`; explicit values win.
    pub fn merged_with(self, fallback: Requirements) -> Self {
        Self {
            max_response_time_ms: self.max_response_time_ms.or(fallback.max_response_time_ms),
            min_quality: self.min_quality.or(fallback.min_quality),
        }
    }
}

/// Parsed request context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity: Option<ComplexityLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urgency: Option<Urgency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stakeholders: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<String>,
    /// Keys supplied with the value `true`.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub flags: BTreeSet<String>,
    /// Any other non-null key, kept verbatim.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, Value>,
    /// Keys supplied with an explicit `null`.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub null_keys: BTreeSet<String>,
}

impl Context {
    /// Parse a JSON context. Anything other than an object yields an empty context.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Object(map) => Self::from_map(map),
            _ => Self::default(),
        }
    }

    pub fn from_map(map: &Map<String, Value>) -> Self {
        let mut ctx = Self::default();

        for (raw_key, value) in map {
            let key = normalize_key(raw_key);
            if key.is_empty() || key == REQUIREMENTS_KEY {
                continue;
            }
            if value.is_null() {
                ctx.null_keys.insert(key);
                continue;
            }

            let parsed = match key.as_str() {
                "domain" => text(value)
                    .map(|d| normalize_key(&d))
                    .filter(|d| !d.is_empty())
                    .map(|d| ctx.domain = Some(d))
                    .is_some(),
                "complexity" => ComplexityLevel::parse(value)
                    .map(|c| ctx.complexity = Some(c))
                    .is_some(),
                "urgency" => Urgency::parse(value)
                    .map(|u| ctx.urgency = Some(u))
                    .is_some(),
                "priority" => text(value).map(|p| ctx.priority = Some(p)).is_some(),
                "deadline" => text(value).map(|d| ctx.deadline = Some(d)).is_some(),
                "user_role" => text(value).map(|r| ctx.user_role = Some(r)).is_some(),
                "department" => text(value).map(|d| ctx.department = Some(d)).is_some(),
                "timeframe" => text(value).map(|t| ctx.timeframe = Some(t)).is_some(),
                "stakeholders" => {
                    let names = string_list(value);
                    let found = !names.is_empty();
                    ctx.stakeholders = names;
                    found
                }
                _ if value == &Value::Bool(true) => {
                    ctx.flags.insert(key.clone());
                    true
                }
                _ => false,
            };

            if !parsed {
                ctx.extensions.insert(key, value.clone());
            }
        }

        ctx
    }

    /// Whether the caller supplied null-valued keys.
    pub fn is_malformed(&self) -> bool {
        !self.null_keys.is_empty()
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }

    /// Names of the known keys that carry a value, followed by the flags.
    pub fn recognized_keys(&self) -> Vec<String> {
        let present = [
            ("domain", self.domain.is_some()),
            ("complexity", self.complexity.is_some()),
            ("urgency", self.urgency.is_some()),
            ("priority", self.priority.is_some()),
            ("deadline", self.deadline.is_some()),
            ("stakeholders", !self.stakeholders.is_empty()),
            ("user_role", self.user_role.is_some()),
            ("department", self.department.is_some()),
            ("timeframe", self.timeframe.is_some()),
        ];
        present
            .iter()
            .filter(|(_, set)| *set)
            .map(|(k, _)| k.to_string())
            .chain(self.flags.iter().cloned())
            .collect()
    }

    /// Raw signal mass used for richness: known fields count fully, flags
    /// count three quarters, free-form extensions count half.
    pub fn signal_weight(&self) -> f64 {
        let known = self.recognized_keys().len() - self.flags.len();
        let stakeholder_bonus = if self.stakeholders.len() > 1 { 0.25 } else { 0.0 };
        known as f64 + stakeholder_bonus + 0.75 * self.flags.len() as f64
            + 0.5 * self.extensions.len() as f64
    }

    /// Key-sorted JSON used for fingerprints.
    pub fn canonical_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// A single request flowing through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub query: String,
    pub context: Context,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<Requirements>,
}

impl Request {
    /// Build a request from raw query text and a JSON context.
    pub fn new(query: impl Into<String>, context: &Value) -> Self {
        let requirements = context
            .get(REQUIREMENTS_KEY)
            .and_then(Requirements::from_value);
        Self {
            query: query.into(),
            context: Context::from_value(context),
            requirements,
        }
    }

    pub fn canonical_query(&self) -> String {
        canonicalize(&self.query)
    }
}

/// Case-fold and collapse whitespace.
pub fn canonicalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split canonical text into alphanumeric tokens. Emoji and punctuation vanish.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Words that push an unlabelled request toward a higher complexity band.
const COMPLEXITY_MARKERS: &[&str] = &[
    "comprehensive",
    "detailed",
    "multi",
    "across",
    "strategy",
    "strategic",
    "complex",
    "integrat",
    "thorough",
];

/// Complexity from the context when supplied, otherwise estimated from the
/// query: length plus complexity markers.
pub fn resolve_complexity(context: &Context, tokens: &[String]) -> ComplexityLevel {
    if let Some(level) = context.complexity {
        return level;
    }

    let markers = tokens
        .iter()
        .filter(|t| COMPLEXITY_MARKERS.iter().any(|m| t.starts_with(m)))
        .count();

    if tokens.len() > 25 || markers >= 2 {
        ComplexityLevel::High
    } else if tokens.len() >= 8 || markers == 1 {
        ComplexityLevel::Medium
    } else {
        ComplexityLevel::Low
    }
}

fn normalize_key(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(text).collect(),
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}
