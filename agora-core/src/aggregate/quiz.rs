//! Quiz tally, time-weighted scoring and leaderboards.
//!
//! A correct answer earns half of `max_points` outright plus the other half
//! scaled by the share of the time limit still remaining:
//!
//! ```text
//! points = max/2 + (max - max/2) * (limit - latency) / limit      (correct)
//! points = 0                                                      (wrong)
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{shape_mismatch, AggregateSnapshot, Reducer, Submission, Verdict};
use crate::answer::NormalizedAnswer;
use crate::error::LiveResult;

/// Points for a correct answer given `latency_ms` since the quiz opened.
pub fn quiz_points(max_points: u32, time_limit_ms: u64, latency_ms: u64) -> u32 {
    if time_limit_ms == 0 {
        return max_points;
    }
    let base = max_points / 2;
    let bonus_max = max_points - base;
    let remaining = time_limit_ms.saturating_sub(latency_ms);
    let bonus = (f64::from(bonus_max) * remaining as f64 / time_limit_ms as f64).round() as u32;
    base + bonus.min(bonus_max)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    /// 1-based position.
    pub rank: usize,
    pub participant_id: Uuid,
    pub display_name: String,
    pub score: u32,
    pub correct_answers: u32,
    pub answered_at_ms: u64,
}

#[derive(Debug, Clone)]
struct QuizScore {
    display_name: String,
    points: u32,
    is_correct: bool,
    at_ms: u64,
}

#[derive(Debug, Clone)]
pub struct QuizTally {
    correct_option: usize,
    time_limit_ms: u64,
    max_points: u32,
    counts: Vec<u64>,
    scores: BTreeMap<Uuid, QuizScore>,
}

impl QuizTally {
    pub fn new(option_count: usize, correct_option: usize, time_limit_ms: u64, max_points: u32) -> Self {
        Self {
            correct_option,
            time_limit_ms,
            max_points,
            counts: vec![0; option_count],
            scores: BTreeMap::new(),
        }
    }

    pub fn time_limit_ms(&self) -> u64 {
        self.time_limit_ms
    }

    pub fn correct_option(&self) -> usize {
        self.correct_option
    }

    pub fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        merge_leaderboards(std::iter::once(self))
    }
}

impl Reducer for QuizTally {
    fn fold(&mut self, sub: &Submission, answer: &NormalizedAnswer) -> LiveResult<Option<Verdict>> {
        let NormalizedAnswer::QuizOption { index, latency_ms } = answer else {
            return Err(shape_mismatch("quiz", answer));
        };
        let slot = self.counts.get_mut(*index).ok_or_else(|| shape_mismatch("quiz", answer))?;
        *slot += 1;

        let is_correct = *index == self.correct_option;
        let points = if is_correct {
            quiz_points(self.max_points, self.time_limit_ms, *latency_ms)
        } else {
            0
        };
        self.scores.insert(
            sub.participant_id,
            QuizScore {
                display_name: sub.display_name.clone(),
                points,
                is_correct,
                at_ms: sub.at_ms,
            },
        );
        Ok(Some(Verdict { is_correct, points: Some(points) }))
    }

    fn snapshot(&self) -> AggregateSnapshot {
        AggregateSnapshot::Quiz {
            option_counts: self.counts.clone(),
            correct_count: self.scores.values().filter(|s| s.is_correct).count() as u64,
            leaderboard: self.leaderboard(),
            total_responses: self.scores.len() as u64,
        }
    }
}

/// Sum scores across quizzes.
///
/// Order: score descending, then the earliest last answer, then participant
/// id so equal inputs always produce the same board.
pub(crate) fn merge_leaderboards<'a>(tallies: impl IntoIterator<Item = &'a QuizTally>) -> Vec<LeaderboardEntry> {
    let mut totals: BTreeMap<Uuid, LeaderboardEntry> = BTreeMap::new();
    for tally in tallies {
        for (id, score) in &tally.scores {
            let entry = totals.entry(*id).or_insert_with(|| LeaderboardEntry {
                rank: 0,
                participant_id: *id,
                display_name: score.display_name.clone(),
                score: 0,
                correct_answers: 0,
                answered_at_ms: 0,
            });
            entry.score += score.points;
            entry.correct_answers += u32::from(score.is_correct);
            if score.at_ms >= entry.answered_at_ms {
                entry.answered_at_ms = score.at_ms;
                entry.display_name = score.display_name.clone();
            }
        }
    }

    let mut board: Vec<LeaderboardEntry> = totals.into_values().collect();
    board.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then(a.answered_at_ms.cmp(&b.answered_at_ms))
            .then(a.participant_id.cmp(&b.participant_id))
    });
    for (i, entry) in board.iter_mut().enumerate() {
        entry.rank = i + 1;
    }
    board
}
