//! Operator handoff detection.
//!
//! A [`HandoffDetector`] scores free text against weighted rules and decides whether the dialog
//! should be escalated to a human operator:
//!
//! ```text
//! score = clamp(Σ weight(matched rule) + repeat boost, 0, 1)
//! should_handoff = score >= threshold
//! ```
//!
//! The repeat boost is 0.2 for every consecutive earlier user message identical to the current
//! one, capped at 0.4; a user repeating themselves is usually stuck.

mod patterns;

use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::config::HandoffConfig;
use patterns::{DEFAULT_RULES, RuleKind, RuleSpec};

pub const DEFAULT_THRESHOLD: f32 = 0.6;

const REPEAT_BOOST: f32 = 0.2;
const MAX_REPEAT_BOOST: f32 = 0.4;

/// A weighted pattern. Negative weights express negations.
#[derive(Debug, Clone)]
pub struct HandoffRule {
    name: String,
    regex: Regex,
    weight: f32,
}

impl HandoffRule {
    /// Rule from a raw regex, applied to normalised text.
    pub fn new(name: impl Into<String>, pattern: &str, weight: f32) -> Result<Self, regex::Error> {
        Ok(Self {
            name: name.into(),
            regex: Regex::new(pattern)?,
            weight,
        })
    }

    /// Rule matching any word that starts with `stem`.
    pub fn keyword(name: impl Into<String>, stem: &str, weight: f32) -> Result<Self, regex::Error> {
        Self::new(name, &format!(r"\b{}\w*", regex::escape(&normalize(stem))), weight)
    }

    fn from_spec(spec: &RuleSpec) -> Result<Self, regex::Error> {
        match spec.kind {
            RuleKind::Keyword(stem) => Self::keyword(spec.name, stem, spec.weight),
            RuleKind::Pattern(pattern) => Self::new(spec.name, pattern, spec.weight),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn weight(&self) -> f32 {
        self.weight
    }
}

/// Conversation state that influences the score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandoffContext {
    /// Consecutive earlier user messages identical to the current one
    pub repeated_user_messages: usize,
}

impl HandoffContext {
    /// Count how many of the previous user messages (newest first) repeat `current`.
    pub fn from_history<S: AsRef<str>>(current: &str, previous_newest_first: &[S]) -> Self {
        let current = normalize(current);
        let repeated_user_messages = if current.is_empty() {
            0
        } else {
            previous_newest_first
                .iter()
                .take_while(|previous| normalize(previous.as_ref()) == current)
                .count()
        };
        Self { repeated_user_messages }
    }

    fn boost(&self) -> f32 {
        (self.repeated_user_messages as f32 * REPEAT_BOOST).min(MAX_REPEAT_BOOST)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct HandoffDecision {
    pub should_handoff: bool,
    /// Clamped to 0..=1
    pub score: f32,
    /// Names of every rule that matched, including negations
    pub matched_patterns: Vec<String>,
    /// Strongest positive rule that matched
    pub reason: Option<String>,
}

impl HandoffDecision {
    fn none() -> Self {
        Self {
            should_handoff: false,
            score: 0.0,
            matched_patterns: Vec::new(),
            reason: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HandoffDetector {
    rules: Vec<HandoffRule>,
    threshold: f32,
}

impl Default for HandoffDetector {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl HandoffDetector {
    /// Detector with the built-in Russian and English rules.
    pub fn new(threshold: f32) -> Self {
        Self::with_rules(DEFAULT_RULES.clone(), threshold)
    }

    pub fn from_config(config: &HandoffConfig) -> Self {
        Self::new(config.threshold)
    }

    pub fn with_rules(rules: Vec<HandoffRule>, threshold: f32) -> Self {
        Self {
            rules,
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn detect(&self, text: &str) -> HandoffDecision {
        self.detect_with_context(text, &HandoffContext::default())
    }

    pub fn detect_with_context(&self, text: &str, context: &HandoffContext) -> HandoffDecision {
        let normalized = normalize(text);
        if normalized.is_empty() {
            return HandoffDecision::none();
        }

        let mut raw = 0.0_f32;
        let mut matched_patterns = Vec::new();
        let mut strongest: Option<&HandoffRule> = None;

        for rule in &self.rules {
            if !rule.regex.is_match(&normalized) {
                continue;
            }
            raw += rule.weight;
            matched_patterns.push(rule.name.clone());
            if rule.weight > 0.0 && strongest.is_none_or(|s| rule.weight > s.weight) {
                strongest = Some(rule);
            }
        }

        let score = (raw + context.boost()).clamp(0.0, 1.0);
        let should_handoff = score > 0.0 && score >= self.threshold;

        if should_handoff {
            tracing::debug!(score, ?matched_patterns, "Handoff detected");
        }

        HandoffDecision {
            should_handoff,
            score,
            matched_patterns,
            reason: strongest.map(|rule| rule.name.clone()),
        }
    }
}

/// Lowercase, fold `ё` into `е`, turn everything that is not a letter or digit into a space, and
/// collapse runs of whitespace.
pub fn normalize(text: &str) -> String {
    let mapped: String = text
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'ё' => 'е',
            c if c.is_alphanumeric() => c,
            _ => ' ',
        })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}
