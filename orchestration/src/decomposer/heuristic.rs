//! Keyword and punctuation driven decomposition.

use super::{
    Decomposer, Decomposition, DecompositionError, DecompositionResult, ExecutionStep, SubTask,
    TerminationReason,
};
use crate::config::DecomposerConfig;
use crate::context::{resolve_complexity, tokenize, ComplexityLevel, Context};
use regex::Regex;
use serde_json::json;
use std::sync::LazyLock;
use tracing::debug;

/// Sentence punctuation or an explicit sequencing phrase.
static SEPARATOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)[.;!?]+(?:\s+|$)|,?\s+(?:and then|after that|afterwards|followed by|and finally|finally|and also|then)\s+",
    )
    .expect("SEPARATOR_RE regex should compile")
});

/// " and ", " next " or " also " between two clauses; only split when the
/// right side starts with an action.
static CLAUSE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i),?\s+(and|next|also)\s+").expect("CLAUSE_RE regex should compile")
});

/// Sequencing phrase opening a sentence ("Then ...", "Finally, ...").
static LEADING_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(and then|and finally|and also|after that|afterwards|followed by|finally|then|next|also)\b[,:]?\s*",
    )
    .expect("LEADING_MARKER_RE regex should compile")
});

/// Markers that also occur as ordinary words ("next quarter"); they only
/// sequence when an action follows.
const SOFT_MARKERS: &[&str] = &["next", "also"];

/// Verb prefix → canonical action name.
const ACTIONS: &[(&str, &str)] = &[
    ("analy", "analyze"),
    ("examin", "analyze"),
    ("investigat", "analyze"),
    ("review", "review"),
    ("summar", "summarize"),
    ("draft", "draft"),
    ("writ", "write"),
    ("schedul", "schedule"),
    ("book", "schedule"),
    ("plan", "plan"),
    ("organi", "organize"),
    ("assign", "assign"),
    ("coordinat", "coordinate"),
    ("verif", "verify"),
    ("confirm", "verify"),
    ("ensur", "verify"),
    ("validat", "validate"),
    ("check", "check"),
    ("audit", "audit"),
    ("compar", "compare"),
    ("forecast", "forecast"),
    ("estimat", "forecast"),
    ("evaluat", "evaluate"),
    ("measur", "measure"),
    ("creat", "create"),
    ("prepar", "prepare"),
    ("send", "send"),
    ("identif", "identify"),
    ("list", "list"),
    ("find", "find"),
    ("calculat", "calculate"),
    ("implement", "implement"),
    ("design", "design"),
    ("configur", "configure"),
    ("debug", "debug"),
    ("deploy", "deploy"),
    ("updat", "update"),
    ("combin", "combine"),
    ("consolidat", "combine"),
    ("outlin", "outline"),
    ("explain", "explain"),
    ("recommend", "recommend"),
    ("propos", "recommend"),
    ("track", "track"),
    ("gather", "gather"),
    ("collect", "gather"),
];

/// Leading words skipped when looking for the action verb.
const FILLERS: &[&str] = &[
    "please", "can", "could", "would", "you", "i", "we", "need", "needs", "want", "to", "should",
    "let", "lets", "s", "help", "me", "us", "kindly",
];

const VAGUE_TERMS: &[&str] = &[
    "something",
    "stuff",
    "things",
    "thing",
    "maybe",
    "somehow",
    "etc",
    "whatever",
    "anything",
    "probably",
    "kinda",
    "sorta",
];

const GENERAL_ACTION: &str = "general";

/// A clause of the request and whether it was sequenced after the previous one.
#[derive(Debug)]
struct Segment {
    text: String,
    sequential: bool,
}

/// Heuristic decomposer: splits on punctuation and sequencing phrases,
/// scores each clause for ambiguity and applies the termination policy.
#[derive(Debug, Clone, Default)]
pub struct HeuristicDecomposer {
    config: DecomposerConfig,
}

impl HeuristicDecomposer {
    pub fn new(config: DecomposerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DecomposerConfig {
        &self.config
    }

    fn segments(&self, text: &str) -> (Vec<Segment>, Vec<String>) {
        let mut segments = Vec::new();
        let mut markers = Vec::new();
        let mut cursor = 0;
        let mut sequential = false;

        for m in SEPARATOR_RE.find_iter(text) {
            push_clauses(&text[cursor..m.start()], sequential, &mut segments, &mut markers);
            let marker = m.as_str().trim().trim_start_matches(',').trim().to_lowercase();
            sequential = marker.chars().any(char::is_alphabetic);
            if sequential {
                markers.push(marker);
            }
            cursor = m.end();
        }
        push_clauses(&text[cursor..], sequential, &mut segments, &mut markers);

        (segments, markers)
    }

    fn score(
        &self,
        tokens: &[String],
        action: Option<&str>,
        context: &Context,
        level: ComplexityLevel,
    ) -> f64 {
        let mut confidence: f64 = 0.9;

        let vague = tokens
            .iter()
            .filter(|t| VAGUE_TERMS.contains(&t.as_str()))
            .count();
        confidence -= 0.15 * vague as f64;
        if tokens.len() < 3 {
            confidence -= 0.2;
        }
        if action.is_none() {
            confidence -= 0.1;
        }
        if tokens.len() > 40 {
            confidence -= 0.1;
        }
        if context.domain.is_some() {
            confidence += 0.05;
        }
        if level == ComplexityLevel::High {
            confidence -= 0.05;
        }

        confidence.clamp(0.05, 1.0)
    }

    fn degenerate(&self, query: &str) -> Decomposition {
        let text = "clarify request".to_string();
        Decomposition {
            subtasks: vec![SubTask {
                text: text.clone(),
                action: GENERAL_ACTION.to_string(),
                confidence: 0.3,
            }],
            confidence: 0.3,
            execution_plan: vec![ExecutionStep {
                index: 0,
                action: GENERAL_ACTION.to_string(),
                description: text,
                depends_on: None,
            }],
            terminator_triggered: true,
            termination_reason: Some(TerminationReason::LowConfidence),
            artifacts: json!({
                "strategy": "heuristic",
                "degenerate": true,
                "input_chars": query.chars().count(),
            }),
        }
    }
}

impl Decomposer for HeuristicDecomposer {
    fn decompose(&self, query: &str, context: &Context) -> DecompositionResult<Decomposition> {
        if self.config.max_depth == 0 {
            return Err(DecompositionError::InvalidConfig {
                message: "max_depth must be at least 1".to_string(),
            });
        }

        let text = query.split_whitespace().collect::<Vec<_>>().join(" ");
        let all_tokens = tokenize(&text);
        if all_tokens.is_empty() {
            debug!("Degenerate query, emitting single clarification step");
            return Ok(self.degenerate(query));
        }

        let level = resolve_complexity(context, &all_tokens);
        let (segments, markers) = self.segments(&text);
        let total_segments = segments.len();
        let truncated = total_segments.saturating_sub(self.config.max_depth);

        let mut subtasks = Vec::new();
        let mut execution_plan = Vec::new();
        for (index, segment) in segments.into_iter().take(self.config.max_depth).enumerate() {
            let tokens = tokenize(&segment.text);
            let action = leading_action(&tokens);
            let confidence = self.score(&tokens, action, context, level);
            let action = action.unwrap_or(GENERAL_ACTION).to_string();

            execution_plan.push(ExecutionStep {
                index,
                action: action.clone(),
                description: segment.text.clone(),
                depends_on: (segment.sequential && index > 0).then(|| index - 1),
            });
            subtasks.push(SubTask {
                text: segment.text,
                action,
                confidence,
            });
        }

        if subtasks.is_empty() {
            return Err(DecompositionError::PlanConstruction {
                message: format!("no usable clauses in {} characters of input", text.len()),
            });
        }

        let mean = subtasks.iter().map(|s| s.confidence).sum::<f64>() / subtasks.len() as f64;
        let min = subtasks
            .iter()
            .map(|s| s.confidence)
            .fold(f64::INFINITY, f64::min);
        let confidence = (0.7 * mean + 0.3 * min).clamp(0.0, 1.0);

        let reason = if confidence < self.config.confidence_floor {
            TerminationReason::LowConfidence
        } else if truncated > 0 {
            TerminationReason::DepthLimit
        } else {
            TerminationReason::Completed
        };

        debug!(
            subtasks = subtasks.len(),
            truncated,
            confidence,
            reason = %reason,
            "Decomposed request"
        );

        Ok(Decomposition {
            subtasks,
            confidence,
            execution_plan,
            terminator_triggered: reason != TerminationReason::Completed,
            termination_reason: Some(reason),
            artifacts: json!({
                "strategy": "heuristic",
                "segments": total_segments,
                "truncated": truncated,
                "markers": markers,
                "domain": context.domain,
                "complexity": level,
            }),
        })
    }
}

/// Strip a sentence-opening marker, then split the clause further on
/// " and|next|also <action>" and append.
fn push_clauses(
    clause: &str,
    mut sequential: bool,
    out: &mut Vec<Segment>,
    markers: &mut Vec<String>,
) {
    let mut clause = clause.trim();
    if let Some(caps) = LEADING_MARKER_RE.captures(clause) {
        let (whole, word) = (&caps[0], caps[1].to_lowercase());
        let rest = &clause[whole.len()..];
        if !SOFT_MARKERS.contains(&word.as_str()) || leading_action(&tokenize(rest)).is_some() {
            markers.push(word);
            sequential = true;
            clause = rest.trim();
        }
    }
    if clause.is_empty() {
        return;
    }

    let mut start = 0;
    for caps in CLAUSE_RE.captures_iter(clause) {
        let Some(m) = caps.get(0) else { continue };
        let word = caps[1].to_lowercase();
        let soft = SOFT_MARKERS.contains(&word.as_str());
        if soft && tokenize(&clause[start..m.start()]).len() < 2 {
            continue;
        }
        if leading_action(&tokenize(&clause[m.end()..])).is_some() {
            push_segment(&clause[start..m.start()], sequential, out);
            sequential = soft;
            if soft {
                markers.push(word);
            }
            start = m.end();
        }
    }
    push_segment(&clause[start..], sequential, out);
}

fn push_segment(text: &str, sequential: bool, out: &mut Vec<Segment>) {
    let text = text.trim().trim_end_matches(',').trim();
    if !text.is_empty() {
        out.push(Segment {
            text: text.to_string(),
            sequential,
        });
    }
}

/// Canonical action of the first non-filler word, if it is a known verb.
fn leading_action(tokens: &[String]) -> Option<&'static str> {
    let first = tokens
        .iter()
        .take(5)
        .find(|t| !FILLERS.contains(&t.as_str()))?;
    ACTIONS
        .iter()
        .find(|(prefix, _)| first.starts_with(prefix))
        .map(|(_, action)| *action)
}
