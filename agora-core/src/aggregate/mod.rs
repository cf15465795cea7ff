//! Response aggregation.
//!
//! ```text
//! NormalizedAnswer ──fold──▸ AggregateState (per slide) ──snapshot──▸ AggregateSnapshot
//!                               ▲
//!                  reset/replay │ (rebuild from the full response set)
//! ```
//!
//! Reducers trust their caller: the resubmission gate lives in the engine, so
//! folding the same accepted response twice would double count. Every
//! reducer is order-independent, folding responses in any participant order
//! produces the same snapshot.

mod board;
mod quiz;
mod tally;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::answer::NormalizedAnswer;
use crate::error::{LiveError, LiveResult};
use crate::registry::{self, ResubmissionPolicy};
use crate::slide::{Slide, SlideKind};

pub use board::{OpenEndedBoard, OpenEndedEntry, QnaBoard, QnaQuestion};
pub use quiz::{quiz_points, LeaderboardEntry, QuizTally};
pub use tally::{
    ChoiceTally, GridStat, GridTally, GuessTally, OptionTally, PinMark, PinTally, PointStat,
    PointTally, RankStat, RankTally, ScaleTally, StatementStats, WordTally,
};

/// Who submitted and when (server clock, epoch milliseconds).
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub participant_id: Uuid,
    pub display_name: String,
    pub at_ms: u64,
}

/// Server-side correctness judgement returned to the submitter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub is_correct: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points: Option<u32>,
}

/// Mean kept as sum and count.
///
/// Equivalent to the incremental update `m' = m + (v - m) / n` but exact for
/// integer inputs, which keeps folding commutative.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningMean {
    sum: f64,
    count: u64,
}

impl RunningMean {
    pub fn push(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// `None` until the first value arrives.
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// Full derived summary of one slide's accepted responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum AggregateSnapshot {
    MultipleChoice {
        /// Ordered by count descending, ties in option order.
        votes: Vec<OptionTally>,
        total_responses: u64,
    },
    Scales {
        statements: Vec<StatementStats>,
        overall_average: Option<f64>,
        total_responses: u64,
    },
    WordCloud {
        frequencies: std::collections::BTreeMap<String, u64>,
        total_words: u64,
        total_responses: u64,
    },
    OpenEnded {
        responses: Vec<OpenEndedEntry>,
        allow_voting: bool,
        total_responses: u64,
    },
    Ranking {
        /// Ordered by average rank ascending.
        items: Vec<RankStat>,
        total_responses: u64,
    },
    HundredPoints {
        items: Vec<PointStat>,
        total_responses: u64,
    },
    #[serde(rename = "2x2_grid")]
    Grid {
        items: Vec<GridStat>,
        total_responses: u64,
    },
    PinOnImage {
        pins: Vec<PinMark>,
        centroid: Option<crate::slide::Point>,
        correct_count: u64,
        incorrect_count: u64,
        total_responses: u64,
    },
    GuessNumber {
        distribution: std::collections::BTreeMap<i64, u64>,
        correct_count: u64,
        total_responses: u64,
    },
    Qna {
        questions: Vec<QnaQuestion>,
        allow_multiple: bool,
        active_question_id: Option<String>,
        total_responses: u64,
    },
    Quiz {
        option_counts: Vec<u64>,
        correct_count: u64,
        leaderboard: Vec<LeaderboardEntry>,
        total_responses: u64,
    },
    Leaderboard {
        entries: Vec<LeaderboardEntry>,
    },
    Static {},
}

impl AggregateSnapshot {
    pub fn total_responses(&self) -> u64 {
        match self {
            Self::MultipleChoice { total_responses, .. }
            | Self::Scales { total_responses, .. }
            | Self::WordCloud { total_responses, .. }
            | Self::OpenEnded { total_responses, .. }
            | Self::Ranking { total_responses, .. }
            | Self::HundredPoints { total_responses, .. }
            | Self::Grid { total_responses, .. }
            | Self::PinOnImage { total_responses, .. }
            | Self::GuessNumber { total_responses, .. }
            | Self::Qna { total_responses, .. }
            | Self::Quiz { total_responses, .. } => *total_responses,
            Self::Leaderboard { entries } => entries.len() as u64,
            Self::Static {} => 0,
        }
    }

    /// The snapshot as participants may see it. A running quiz tally gives
    /// the correct option away through its scores, so it is withheld until
    /// the quiz has finished.
    pub fn participant_view(self, quiz_finished: bool) -> Option<Self> {
        match self {
            Self::Quiz { .. } if !quiz_finished => None,
            other => Some(other),
        }
    }

    /// Vote count for a multiple choice option label, 0 for other snapshots.
    pub fn votes_for(&self, option: &str) -> u64 {
        match self {
            Self::MultipleChoice { votes, .. } => votes
                .iter()
                .find(|v| v.option == option)
                .map_or(0, |v| v.count),
            _ => 0,
        }
    }
}

/// Folds one accepted answer into running state.
pub trait Reducer {
    fn fold(&mut self, sub: &Submission, answer: &NormalizedAnswer) -> LiveResult<Option<Verdict>>;

    fn snapshot(&self) -> AggregateSnapshot;
}

pub(crate) fn shape_mismatch(reducer: &str, answer: &NormalizedAnswer) -> LiveError {
    LiveError::Internal(format!("{reducer} reducer cannot fold {answer:?}"))
}

/// Per-type running state, dispatched by slide type.
#[derive(Debug, Clone)]
pub enum AggregateState {
    Choice(ChoiceTally),
    Scale(ScaleTally),
    Words(WordTally),
    OpenEnded(OpenEndedBoard),
    Ranking(RankTally),
    Points(PointTally),
    Grid(GridTally),
    Pin(PinTally),
    Guess(GuessTally),
    Qna(QnaBoard),
    Quiz(QuizTally),
    /// Leaderboards derive from quiz tallies; embeds take no responses.
    Passive,
}

impl AggregateState {
    pub fn for_kind(kind: &SlideKind) -> Self {
        match kind {
            SlideKind::MultipleChoice { options, .. } => Self::Choice(ChoiceTally::new(options.clone())),
            SlideKind::Scales { statements, .. } => Self::Scale(ScaleTally::new(statements.clone())),
            SlideKind::WordCloud { .. } => Self::Words(WordTally::default()),
            SlideKind::OpenEnded { allow_voting, .. } => Self::OpenEnded(OpenEndedBoard::new(*allow_voting)),
            SlideKind::Ranking { items } => Self::Ranking(RankTally::new(items.clone())),
            SlideKind::HundredPoints { items, .. } => Self::Points(PointTally::new(items.clone())),
            SlideKind::Grid { items, .. } => Self::Grid(GridTally::new(items.clone())),
            SlideKind::PinOnImage { correct_area, .. } => Self::Pin(PinTally::new(*correct_area)),
            SlideKind::GuessNumber { correct_answer, .. } => Self::Guess(GuessTally::new(*correct_answer)),
            SlideKind::Qna { allow_multiple } => Self::Qna(QnaBoard::new(*allow_multiple)),
            SlideKind::Quiz { options, correct_option, time_limit_secs, max_points } => Self::Quiz(
                QuizTally::new(options.len(), *correct_option, time_limit_secs.saturating_mul(1000), *max_points),
            ),
            SlideKind::Leaderboard { .. } | SlideKind::Embed { .. } => Self::Passive,
        }
    }

    fn reducer_mut(&mut self) -> Option<&mut dyn Reducer> {
        let reducer: &mut dyn Reducer = match self {
            Self::Choice(t) => t,
            Self::Scale(t) => t,
            Self::Words(t) => t,
            Self::OpenEnded(t) => t,
            Self::Ranking(t) => t,
            Self::Points(t) => t,
            Self::Grid(t) => t,
            Self::Pin(t) => t,
            Self::Guess(t) => t,
            Self::Qna(t) => t,
            Self::Quiz(t) => t,
            Self::Passive => return None,
        };
        Some(reducer)
    }

    fn reducer(&self) -> Option<&dyn Reducer> {
        let reducer: &dyn Reducer = match self {
            Self::Choice(t) => t,
            Self::Scale(t) => t,
            Self::Words(t) => t,
            Self::OpenEnded(t) => t,
            Self::Ranking(t) => t,
            Self::Points(t) => t,
            Self::Grid(t) => t,
            Self::Pin(t) => t,
            Self::Guess(t) => t,
            Self::Qna(t) => t,
            Self::Quiz(t) => t,
            Self::Passive => return None,
        };
        Some(reducer)
    }
}

struct Entry {
    kind: SlideKind,
    state: AggregateState,
}

/// Owns the aggregate state of every slide in one presentation.
pub struct ResponseAggregator {
    entries: HashMap<Uuid, Entry>,
}

impl ResponseAggregator {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Build empty state for every slide.
    pub fn for_slides<'a>(slides: impl IntoIterator<Item = &'a Slide>) -> Self {
        let mut agg = Self::new();
        for slide in slides {
            agg.prepare(slide);
        }
        agg
    }

    /// Register a slide; existing state is kept.
    pub fn prepare(&mut self, slide: &Slide) {
        self.entries.entry(slide.id).or_insert_with(|| Entry {
            kind: slide.kind.clone(),
            state: AggregateState::for_kind(&slide.kind),
        });
    }

    fn entry(&self, slide_id: Uuid) -> LiveResult<&Entry> {
        self.entries.get(&slide_id).ok_or_else(|| LiveError::not_found("Slide"))
    }

    fn entry_mut(&mut self, slide_id: Uuid) -> LiveResult<&mut Entry> {
        self.entries.get_mut(&slide_id).ok_or_else(|| LiveError::not_found("Slide"))
    }

    /// Fold one accepted answer and return the slide's new snapshot.
    pub fn fold(
        &mut self,
        slide_id: Uuid,
        sub: &Submission,
        answer: &NormalizedAnswer,
    ) -> LiveResult<(AggregateSnapshot, Option<Verdict>)> {
        let entry = self.entry_mut(slide_id)?;
        let reducer = entry
            .state
            .reducer_mut()
            .ok_or_else(|| LiveError::closed("This slide does not accept responses"))?;
        let verdict = reducer.fold(sub, answer)?;
        log::trace!("Folded {} answer from {} into slide {slide_id}", entry.kind.type_name(), sub.participant_id);
        Ok((self.snapshot(slide_id)?, verdict))
    }

    /// Drop all folded state for a slide.
    pub fn reset(&mut self, slide_id: Uuid) -> LiveResult<()> {
        let entry = self.entry_mut(slide_id)?;
        entry.state = AggregateState::for_kind(&entry.kind);
        Ok(())
    }

    /// Rebuild a slide's state from scratch out of a full response set.
    pub fn replay<'a>(
        &mut self,
        slide_id: Uuid,
        responses: impl IntoIterator<Item = (&'a Submission, &'a NormalizedAnswer)>,
    ) -> LiveResult<AggregateSnapshot> {
        self.reset(slide_id)?;
        for (sub, answer) in responses {
            self.fold(slide_id, sub, answer)?;
        }
        self.snapshot(slide_id)
    }

    pub fn snapshot(&self, slide_id: Uuid) -> LiveResult<AggregateSnapshot> {
        let entry = self.entry(slide_id)?;
        Ok(match (&entry.kind, entry.state.reducer()) {
            (_, Some(reducer)) => reducer.snapshot(),
            (SlideKind::Leaderboard { linked_quiz }, None) => AggregateSnapshot::Leaderboard {
                entries: self.leaderboard(*linked_quiz),
            },
            (_, None) => AggregateSnapshot::Static {},
        })
    }

    /// Resubmission policy for a slide, including live setting overrides.
    pub fn effective_policy(&self, slide_id: Uuid) -> LiveResult<ResubmissionPolicy> {
        let entry = self.entry(slide_id)?;
        Ok(match &entry.state {
            AggregateState::Qna(board) => registry::qna_policy(board.allow_multiple()),
            _ => registry::policy(&entry.kind),
        })
    }

    /// Leaderboard for one quiz, or cumulative over every quiz when `None`.
    pub fn leaderboard(&self, quiz: Option<Uuid>) -> Vec<LeaderboardEntry> {
        let tallies = self.entries.iter().filter_map(|(id, e)| match &e.state {
            AggregateState::Quiz(t) if quiz.map_or(true, |q| q == *id) => Some(t),
            _ => None,
        });
        quiz::merge_leaderboards(tallies)
    }

    pub fn qna_mut(&mut self, slide_id: Uuid) -> LiveResult<&mut QnaBoard> {
        match &mut self.entry_mut(slide_id)?.state {
            AggregateState::Qna(board) => Ok(board),
            _ => Err(LiveError::not_found("Q&A slide")),
        }
    }

    pub fn open_ended_mut(&mut self, slide_id: Uuid) -> LiveResult<&mut OpenEndedBoard> {
        match &mut self.entry_mut(slide_id)?.state {
            AggregateState::OpenEnded(board) => Ok(board),
            _ => Err(LiveError::not_found("Open ended slide")),
        }
    }

    pub fn quiz(&self, slide_id: Uuid) -> LiveResult<&QuizTally> {
        match &self.entry(slide_id)?.state {
            AggregateState::Quiz(tally) => Ok(tally),
            _ => Err(LiveError::not_found("Quiz slide")),
        }
    }

    /// Clear transient pointers (the active Q&A question) when a slide stops
    /// being current.
    pub fn release(&mut self, slide_id: Uuid) {
        if let Some(Entry { state: AggregateState::Qna(board), .. }) = self.entries.get_mut(&slide_id) {
            board.set_active(None).ok();
        }
    }
}

impl Default for ResponseAggregator {
    fn default() -> Self {
        Self::new()
    }
}
