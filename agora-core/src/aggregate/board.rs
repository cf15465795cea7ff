//! Text boards: open ended responses (with optional voting) and Q&A.
//!
//! Entry ids are `"<participant id>:<n>"` where `n` counts that participant's
//! entries on the board, so ids do not depend on how submissions from
//! different participants interleave.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{shape_mismatch, AggregateSnapshot, Reducer, Submission, Verdict};
use crate::answer::NormalizedAnswer;
use crate::error::{LiveError, LiveResult};

fn next_id(seqs: &mut HashMap<Uuid, u32>, participant: Uuid) -> (String, u32) {
    let seq = seqs.entry(participant).or_default();
    *seq += 1;
    (format!("{participant}:{seq}"), *seq)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenEndedEntry {
    pub id: String,
    pub participant_id: Uuid,
    pub display_name: String,
    pub text: String,
    pub submitted_at_ms: u64,
    pub votes: u64,
    #[serde(skip)]
    seq: u32,
}

#[derive(Debug, Clone)]
pub struct OpenEndedBoard {
    allow_voting: bool,
    entries: Vec<OpenEndedEntry>,
    seqs: HashMap<Uuid, u32>,
    voters: HashMap<String, HashSet<Uuid>>,
}

impl OpenEndedBoard {
    pub fn new(allow_voting: bool) -> Self {
        Self {
            allow_voting,
            entries: Vec::new(),
            seqs: HashMap::new(),
            voters: HashMap::new(),
        }
    }

    /// Upvote a response, once per voter.
    pub fn vote(&mut self, response_id: &str, voter: Uuid) -> LiveResult<()> {
        if !self.allow_voting {
            return Err(LiveError::closed("Voting is disabled for this slide"));
        }
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.id == response_id)
            .ok_or_else(|| LiveError::not_found("Response"))?;
        if !self.voters.entry(response_id.to_string()).or_default().insert(voter) {
            return Err(LiveError::DuplicateSubmission { used: 1, limit: 1 });
        }
        entry.votes += 1;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Reducer for OpenEndedBoard {
    fn fold(&mut self, sub: &Submission, answer: &NormalizedAnswer) -> LiveResult<Option<Verdict>> {
        let NormalizedAnswer::Text(text) = answer else {
            return Err(shape_mismatch("open ended", answer));
        };
        let (id, seq) = next_id(&mut self.seqs, sub.participant_id);
        self.entries.push(OpenEndedEntry {
            id,
            participant_id: sub.participant_id,
            display_name: sub.display_name.clone(),
            text: text.clone(),
            submitted_at_ms: sub.at_ms,
            votes: 0,
            seq,
        });
        Ok(None)
    }

    fn snapshot(&self) -> AggregateSnapshot {
        let mut responses = self.entries.clone();
        responses.sort_by(|a, b| {
            b.votes
                .cmp(&a.votes)
                .then(a.submitted_at_ms.cmp(&b.submitted_at_ms))
                .then(a.participant_id.cmp(&b.participant_id))
                .then(a.seq.cmp(&b.seq))
        });
        AggregateSnapshot::OpenEnded {
            total_responses: responses.len() as u64,
            responses,
            allow_voting: self.allow_voting,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QnaQuestion {
    pub id: String,
    pub participant_id: Uuid,
    pub display_name: String,
    pub text: String,
    pub asked_at_ms: u64,
    pub is_answered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_text: Option<String>,
    #[serde(skip)]
    seq: u32,
}

#[derive(Debug, Clone)]
pub struct QnaBoard {
    allow_multiple: bool,
    questions: Vec<QnaQuestion>,
    seqs: HashMap<Uuid, u32>,
    active: Option<String>,
}

impl QnaBoard {
    pub fn new(allow_multiple: bool) -> Self {
        Self {
            allow_multiple,
            questions: Vec::new(),
            seqs: HashMap::new(),
            active: None,
        }
    }

    pub fn allow_multiple(&self) -> bool {
        self.allow_multiple
    }

    pub fn set_allow_multiple(&mut self, allow: bool) {
        self.allow_multiple = allow;
    }

    /// Mark answered (optionally with a written answer) or reopen.
    pub fn mark_answered(&mut self, question_id: &str, answered: bool, answer_text: Option<String>) -> LiveResult<()> {
        let q = self
            .questions
            .iter_mut()
            .find(|q| q.id == question_id)
            .ok_or_else(|| LiveError::not_found("Question"))?;
        q.is_answered = answered;
        q.answer_text = if answered {
            answer_text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
        } else {
            None
        };
        if answered && self.active.as_deref() == Some(question_id) {
            self.active = None;
        }
        Ok(())
    }

    /// Point the audience at one question, or clear the pointer with `None`.
    pub fn set_active(&mut self, question_id: Option<&str>) -> LiveResult<()> {
        match question_id {
            Some(id) if !self.questions.iter().any(|q| q.id == id) => {
                Err(LiveError::not_found("Question"))
            }
            id => {
                self.active = id.map(str::to_string);
                Ok(())
            }
        }
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Remove every question. Id counters keep running so a cleared id is
    /// never reused.
    pub fn clear(&mut self) {
        self.questions.clear();
        self.active = None;
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }
}

impl Reducer for QnaBoard {
    fn fold(&mut self, sub: &Submission, answer: &NormalizedAnswer) -> LiveResult<Option<Verdict>> {
        let NormalizedAnswer::Question(text) = answer else {
            return Err(shape_mismatch("qna", answer));
        };
        let (id, seq) = next_id(&mut self.seqs, sub.participant_id);
        self.questions.push(QnaQuestion {
            id,
            participant_id: sub.participant_id,
            display_name: sub.display_name.clone(),
            text: text.clone(),
            asked_at_ms: sub.at_ms,
            is_answered: false,
            answer_text: None,
            seq,
        });
        Ok(None)
    }

    fn snapshot(&self) -> AggregateSnapshot {
        let mut questions = self.questions.clone();
        questions.sort_by(|a, b| {
            a.asked_at_ms
                .cmp(&b.asked_at_ms)
                .then(a.participant_id.cmp(&b.participant_id))
                .then(a.seq.cmp(&b.seq))
        });
        AggregateSnapshot::Qna {
            total_responses: questions.len() as u64,
            questions,
            allow_multiple: self.allow_multiple,
            active_question_id: self.active.clone(),
        }
    }
}
