//! Participant answers.
//!
//! [`Answer`] is the untrusted wire shape. The slide type registry turns it
//! into a [`NormalizedAnswer`] whose indices and values are already checked
//! against the slide's settings, so reducers never re-validate.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::slide::Point;

/// Answer as submitted by a client.
///
/// ```text
/// { "kind": "choice",  "value": ["A"] }
/// { "kind": "points",  "value": { "X": 60, "Y": 40 } }
/// { "kind": "pin",     "value": { "x": 12.5, "y": 40.0 } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Answer {
    /// Selected option labels.
    Choice(Vec<String>),
    /// One value per scale statement, in statement order.
    Scale(Vec<i64>),
    /// Free text: word cloud entry, open ended response or Q&A question.
    Text(String),
    /// Items in preferred order, best first.
    Ranking(Vec<String>),
    /// Points per item label.
    Points(BTreeMap<String, u32>),
    /// Position per item label.
    Grid(BTreeMap<String, Point>),
    Pin(Point),
    Number(i64),
    /// Quiz option index.
    Option(usize),
}

impl Answer {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Choice(_) => "choice",
            Self::Scale(_) => "scale",
            Self::Text(_) => "text",
            Self::Ranking(_) => "ranking",
            Self::Points(_) => "points",
            Self::Grid(_) => "grid",
            Self::Pin(_) => "pin",
            Self::Number(_) => "number",
            Self::Option(_) => "option",
        }
    }
}

/// Validated answer, expressed against the slide's own indices.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedAnswer {
    /// Sorted, de-duplicated option indices.
    Choice(Vec<usize>),
    Scale(Vec<i64>),
    /// Lower-cased tokens.
    Words(Vec<String>),
    /// Trimmed open ended response.
    Text(String),
    /// Item indices, best first; a permutation of all items.
    Ranking(Vec<usize>),
    /// Points aligned with the slide's item list.
    Points(Vec<u32>),
    /// Position aligned with the slide's item list; `None` = not placed.
    Grid(Vec<Option<Point>>),
    Pin(Point),
    Guess(i64),
    Question(String),
    /// Quiz option plus server-measured latency since the quiz opened.
    QuizOption { index: usize, latency_ms: u64 },
}
