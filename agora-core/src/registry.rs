//! Slide type registry.
//!
//! For every slide type this module declares:
//! - which [`Answer`] shape it accepts and how that answer is validated,
//! - its [`ResubmissionPolicy`],
//! - the reducer the aggregator uses (see [`crate::aggregate::AggregateState::for_kind`]).
//!
//! Adding an interaction type means adding a [`SlideKind`] variant and
//! extending the matches here and in the aggregator; the engine and the
//! gateway only ever go through these functions.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::answer::{Answer, NormalizedAnswer};
use crate::error::{LiveError, LiveResult};
use crate::slide::{SlideKind, CANVAS_EXTENT, POINT_BUDGET};

/// Maximum length of a Q&A question in characters.
pub const MAX_QUESTION_CHARS: usize = 500;

/// Maximum length of a single word cloud token.
pub const MAX_WORD_CHARS: usize = 40;

/// How many accepted responses a participant may contribute to one slide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", content = "limit", rename_all = "kebab-case")]
pub enum ResubmissionPolicy {
    /// The slide takes no responses at all.
    Closed,
    Single,
    /// Up to N units (words for word clouds).
    Bounded(u32),
    /// Any number until the presenter locks the slide.
    UnboundedUntilLocked,
}

impl ResubmissionPolicy {
    /// Gate a submission costing `cost` units when `used` were already accepted.
    pub fn admit(&self, used: u32, cost: u32, locked: bool) -> LiveResult<()> {
        match *self {
            Self::Closed => Err(LiveError::closed("This slide does not accept responses")),
            Self::Single => {
                if used >= 1 {
                    Err(LiveError::DuplicateSubmission { used, limit: 1 })
                } else {
                    Ok(())
                }
            }
            Self::Bounded(limit) => {
                if used >= limit {
                    Err(LiveError::DuplicateSubmission { used, limit })
                } else if used + cost > limit {
                    Err(LiveError::validation(format!(
                        "Only {} more submission(s) allowed for this slide",
                        limit - used
                    )))
                } else {
                    Ok(())
                }
            }
            Self::UnboundedUntilLocked => {
                if locked {
                    Err(LiveError::closed("Responses are locked for this slide"))
                } else {
                    Ok(())
                }
            }
        }
    }

    pub fn limit(&self) -> Option<u32> {
        match *self {
            Self::Single => Some(1),
            Self::Bounded(n) => Some(n),
            Self::Closed => Some(0),
            Self::UnboundedUntilLocked => None,
        }
    }

    /// True when no further response can be accepted for `used` units.
    pub fn is_exhausted(&self, used: u32, locked: bool) -> bool {
        match self.limit() {
            Some(limit) => used >= limit,
            None => locked,
        }
    }
}

/// Static description of a slide type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlideTypeInfo {
    pub name: &'static str,
    pub policy: ResubmissionPolicy,
    /// `Answer` variant accepted, `None` for passive slides.
    pub accepts: Option<&'static str>,
    /// Whether the answer window is time-limited on the server.
    pub timed: bool,
}

pub fn describe(kind: &SlideKind) -> SlideTypeInfo {
    let (policy, accepts, timed) = match kind {
        SlideKind::MultipleChoice { .. } => (ResubmissionPolicy::Single, Some("choice"), false),
        SlideKind::Scales { .. } => (ResubmissionPolicy::Single, Some("scale"), false),
        SlideKind::WordCloud { max_words_per_participant } => (
            ResubmissionPolicy::Bounded((*max_words_per_participant).max(1)),
            Some("text"),
            false,
        ),
        SlideKind::OpenEnded { .. } => (ResubmissionPolicy::UnboundedUntilLocked, Some("text"), false),
        SlideKind::Ranking { .. } => (ResubmissionPolicy::Single, Some("ranking"), false),
        SlideKind::HundredPoints { .. } => (ResubmissionPolicy::Single, Some("points"), false),
        SlideKind::Grid { .. } => (ResubmissionPolicy::Single, Some("grid"), false),
        SlideKind::PinOnImage { .. } => (ResubmissionPolicy::Single, Some("pin"), false),
        SlideKind::GuessNumber { .. } => (ResubmissionPolicy::Single, Some("number"), false),
        SlideKind::Qna { allow_multiple } => (qna_policy(*allow_multiple), Some("text"), false),
        SlideKind::Quiz { .. } => (ResubmissionPolicy::Single, Some("option"), true),
        SlideKind::Leaderboard { .. } | SlideKind::Embed { .. } => {
            (ResubmissionPolicy::Closed, None, false)
        }
    };
    SlideTypeInfo {
        name: kind.type_name(),
        policy,
        accepts,
        timed,
    }
}

pub fn policy(kind: &SlideKind) -> ResubmissionPolicy {
    describe(kind).policy
}

pub fn qna_policy(allow_multiple: bool) -> ResubmissionPolicy {
    if allow_multiple {
        ResubmissionPolicy::UnboundedUntilLocked
    } else {
        ResubmissionPolicy::Single
    }
}

/// Units a normalized answer consumes against the resubmission policy.
pub fn cost(answer: &NormalizedAnswer) -> u32 {
    match answer {
        NormalizedAnswer::Words(words) => words.len() as u32,
        _ => 1,
    }
}

/// Validate `answer` against the slide settings.
///
/// `latency_ms` is the server-measured time since a timed slide opened; it is
/// ignored for untimed slides.
pub fn normalize(kind: &SlideKind, answer: Answer, latency_ms: u64) -> LiveResult<NormalizedAnswer> {
    let info = describe(kind);
    let Some(expected) = info.accepts else {
        return Err(LiveError::closed("This slide does not accept responses"));
    };
    if answer.kind_name() != expected {
        return Err(LiveError::validation(format!(
            "A {} slide expects a '{expected}' answer, got '{}'",
            info.name,
            answer.kind_name()
        )));
    }

    match (kind, answer) {
        (SlideKind::MultipleChoice { options, allow_multiple }, Answer::Choice(picked)) => {
            normalize_choice(options, *allow_multiple, picked)
        }
        (SlideKind::Scales { statements, min_value, max_value }, Answer::Scale(values)) => {
            let expected_len = statements.len().max(1);
            if values.len() != expected_len {
                return Err(LiveError::validation(format!(
                    "Expected {expected_len} scale value(s), got {}",
                    values.len()
                )));
            }
            if let Some(v) = values.iter().find(|v| **v < *min_value || **v > *max_value) {
                return Err(LiveError::validation(format!(
                    "Scale value {v} outside {min_value}..={max_value}"
                )));
            }
            Ok(NormalizedAnswer::Scale(values))
        }
        (SlideKind::WordCloud { .. }, Answer::Text(text)) => {
            let words = tokenize(&text);
            if words.is_empty() {
                return Err(LiveError::validation("Please enter a word"));
            }
            if words.iter().any(|w| w.chars().count() > MAX_WORD_CHARS) {
                return Err(LiveError::validation(format!(
                    "Words are limited to {MAX_WORD_CHARS} characters"
                )));
            }
            Ok(NormalizedAnswer::Words(words))
        }
        (SlideKind::OpenEnded { max_length, .. }, Answer::Text(text)) => {
            let text = text.trim();
            if text.is_empty() {
                return Err(LiveError::validation("Please enter a response"));
            }
            if text.chars().count() > *max_length {
                return Err(LiveError::validation(format!(
                    "Responses are limited to {max_length} characters"
                )));
            }
            Ok(NormalizedAnswer::Text(text.to_string()))
        }
        (SlideKind::Ranking { items }, Answer::Ranking(order)) => {
            if order.len() != items.len() {
                return Err(LiveError::validation(format!(
                    "Ranking must order all {} items",
                    items.len()
                )));
            }
            let mut seen = HashSet::new();
            let mut indices = Vec::with_capacity(order.len());
            for label in &order {
                let idx = index_of(items, label)?;
                if !seen.insert(idx) {
                    return Err(LiveError::validation(format!("Item '{label}' ranked twice")));
                }
                indices.push(idx);
            }
            Ok(NormalizedAnswer::Ranking(indices))
        }
        (SlideKind::HundredPoints { items, allow_empty }, Answer::Points(alloc)) => {
            let mut points = vec![0u32; items.len()];
            let mut total: u64 = 0;
            for (label, value) in &alloc {
                let idx = index_of(items, label)?;
                points[idx] = *value;
                total += u64::from(*value);
            }
            if total > u64::from(POINT_BUDGET) {
                return Err(LiveError::validation(format!(
                    "Allocated {total} points, the maximum is {POINT_BUDGET}"
                )));
            }
            if total == 0 && !allow_empty {
                return Err(LiveError::validation("Allocate at least one point"));
            }
            Ok(NormalizedAnswer::Points(points))
        }
        (SlideKind::Grid { items, axis }, Answer::Grid(placed)) => {
            if placed.is_empty() {
                return Err(LiveError::validation("Place at least one item on the grid"));
            }
            let mut positions = vec![None; items.len()];
            for (label, p) in placed {
                let idx = index_of(items, &label)?;
                if !axis.contains(p.x) || !axis.contains(p.y) {
                    return Err(LiveError::validation(format!(
                        "Position for '{label}' outside {}..={}",
                        axis.min, axis.max
                    )));
                }
                positions[idx] = Some(p);
            }
            Ok(NormalizedAnswer::Grid(positions))
        }
        (SlideKind::PinOnImage { .. }, Answer::Pin(p)) => {
            let in_canvas = |v: f64| v.is_finite() && (0.0..=CANVAS_EXTENT).contains(&v);
            if !in_canvas(p.x) || !in_canvas(p.y) {
                return Err(LiveError::validation("Pin must be placed on the image"));
            }
            Ok(NormalizedAnswer::Pin(p))
        }
        (SlideKind::GuessNumber { min_value, max_value, .. }, Answer::Number(n)) => {
            if n < *min_value || n > *max_value {
                return Err(LiveError::validation(format!(
                    "Guess must be between {min_value} and {max_value}"
                )));
            }
            Ok(NormalizedAnswer::Guess(n))
        }
        (SlideKind::Qna { .. }, Answer::Text(text)) => {
            let text = text.trim();
            if text.is_empty() {
                return Err(LiveError::validation("Please enter a question"));
            }
            if text.chars().count() > MAX_QUESTION_CHARS {
                return Err(LiveError::validation(format!(
                    "Questions are limited to {MAX_QUESTION_CHARS} characters"
                )));
            }
            Ok(NormalizedAnswer::Question(text.to_string()))
        }
        (SlideKind::Quiz { options, .. }, Answer::Option(index)) => {
            if index >= options.len() {
                return Err(LiveError::validation("Invalid option"));
            }
            Ok(NormalizedAnswer::QuizOption { index, latency_ms })
        }
        _ => Err(LiveError::Internal(format!(
            "registry has no normalizer for {}",
            info.name
        ))),
    }
}

fn normalize_choice(options: &[String], allow_multiple: bool, picked: Vec<String>) -> LiveResult<NormalizedAnswer> {
    let mut indices = Vec::with_capacity(picked.len());
    for label in &picked {
        let label = label.trim();
        if label.is_empty() {
            continue;
        }
        let idx = options
            .iter()
            .position(|o| o.trim() == label)
            .ok_or_else(|| LiveError::validation("Invalid option"))?;
        indices.push(idx);
    }
    indices.sort_unstable();
    indices.dedup();
    if indices.is_empty() {
        return Err(LiveError::validation("Please select an answer"));
    }
    if !allow_multiple && indices.len() > 1 {
        return Err(LiveError::validation("Only one option may be selected"));
    }
    Ok(NormalizedAnswer::Choice(indices))
}

fn index_of(items: &[String], label: &str) -> LiveResult<usize> {
    items
        .iter()
        .position(|i| i == label)
        .ok_or_else(|| LiveError::validation(format!("Unknown item '{label}'")))
}

/// Lower-case and split into words, trimming surrounding punctuation.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}
