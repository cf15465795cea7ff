//! Presentation runtime: live status, slide pointer and quiz window.
//!
//! ```text
//!            start                 end
//!  NotLive ─────────▸ Live ─────────────▸ Ended
//!                      │  ▲
//!                goto  └──┘  (generation += 1)
//! ```
//!
//! Every slide transition bumps `generation`. Outbound frames carry it, and
//! anything scheduled against an older generation (a quiz timer, a frame
//! still in flight) is stale and must be ignored.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LiveError, LiveResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LiveStatus {
    NotLive,
    Live,
    Ended,
}

/// Open answer window of a quiz slide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizWindow {
    pub slide_id: Uuid,
    pub opened_at_ms: u64,
    pub time_limit_ms: u64,
    pub generation: u64,
}

impl QuizWindow {
    pub fn deadline_ms(&self) -> u64 {
        self.opened_at_ms.saturating_add(self.time_limit_ms)
    }

    pub fn remaining_ms(&self, now_ms: u64) -> u64 {
        self.deadline_ms().saturating_sub(now_ms)
    }

    /// Latency of an answer arriving at `now_ms`, or `Timeout` once the limit
    /// has passed. An answer exactly on the deadline is accepted.
    pub fn latency(&self, now_ms: u64) -> LiveResult<u64> {
        let latency = now_ms.saturating_sub(self.opened_at_ms);
        if latency > self.time_limit_ms {
            return Err(LiveError::Timeout {
                limit_ms: self.time_limit_ms,
                late_by_ms: latency - self.time_limit_ms,
            });
        }
        Ok(latency)
    }
}

/// Result of a slide change that actually moved the pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlideTransition {
    pub from: usize,
    pub to: usize,
    pub generation: u64,
    /// Quiz that was still open on the slide being left.
    pub closed_quiz: Option<QuizWindow>,
}

#[derive(Debug, Clone)]
pub struct PresentationRuntime {
    status: LiveStatus,
    slide_count: usize,
    current: usize,
    generation: u64,
    quiz: Option<QuizWindow>,
    finished_quizzes: HashSet<Uuid>,
    locked: HashSet<Uuid>,
    started_at_ms: Option<u64>,
}

impl PresentationRuntime {
    pub fn new(slide_count: usize) -> Self {
        Self {
            status: LiveStatus::NotLive,
            slide_count,
            current: 0,
            generation: 0,
            quiz: None,
            finished_quizzes: HashSet::new(),
            locked: HashSet::new(),
            started_at_ms: None,
        }
    }

    pub fn status(&self) -> LiveStatus {
        self.status
    }

    pub fn is_live(&self) -> bool {
        self.status == LiveStatus::Live
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn started_at_ms(&self) -> Option<u64> {
        self.started_at_ms
    }

    fn require_live(&self) -> LiveResult<()> {
        match self.status {
            LiveStatus::Live => Ok(()),
            LiveStatus::NotLive => Err(LiveError::NotLive),
            LiveStatus::Ended => Err(LiveError::closed("Presentation has ended")),
        }
    }

    /// Go live. Returns `false` when already live (nothing changes).
    pub fn start(&mut self, now_ms: u64) -> LiveResult<bool> {
        match self.status {
            LiveStatus::Ended => Err(LiveError::closed("Presentation has ended")),
            LiveStatus::Live => Ok(false),
            LiveStatus::NotLive => {
                self.status = LiveStatus::Live;
                self.generation += 1;
                self.started_at_ms = Some(now_ms);
                Ok(true)
            }
        }
    }

    /// Move to `index`. `Ok(None)` when already there.
    pub fn goto(&mut self, index: usize) -> LiveResult<Option<SlideTransition>> {
        self.require_live()?;
        if index >= self.slide_count {
            return Err(LiveError::validation(format!(
                "Slide index {index} out of range (0..{})",
                self.slide_count
            )));
        }
        if index == self.current {
            return Ok(None);
        }
        let closed_quiz = self.take_quiz();
        let from = self.current;
        self.current = index;
        self.generation += 1;
        Ok(Some(SlideTransition {
            from,
            to: index,
            generation: self.generation,
            closed_quiz,
        }))
    }

    pub fn advance(&mut self) -> LiveResult<Option<SlideTransition>> {
        self.require_live()?;
        if self.current + 1 >= self.slide_count {
            return Err(LiveError::validation("Already on the last slide"));
        }
        self.goto(self.current + 1)
    }

    pub fn back(&mut self) -> LiveResult<Option<SlideTransition>> {
        self.require_live()?;
        if self.current == 0 {
            return Err(LiveError::validation("Already on the first slide"));
        }
        self.goto(self.current - 1)
    }

    /// End a live presentation; returns a quiz that was still open.
    pub fn end(&mut self) -> LiveResult<Option<QuizWindow>> {
        self.require_live()?;
        self.status = LiveStatus::Ended;
        self.generation += 1;
        Ok(self.take_quiz())
    }

    /// Open the quiz on `slide_id`. Each quiz runs once.
    pub fn open_quiz(&mut self, slide_id: Uuid, time_limit_ms: u64, now_ms: u64) -> LiveResult<QuizWindow> {
        self.require_live()?;
        if self.finished_quizzes.contains(&slide_id) {
            return Err(LiveError::closed("Quiz has already ended"));
        }
        if let Some(open) = &self.quiz {
            if open.slide_id == slide_id {
                return Err(LiveError::closed("Quiz is already running"));
            }
        }
        let window = QuizWindow {
            slide_id,
            opened_at_ms: now_ms,
            time_limit_ms,
            generation: self.generation,
        };
        self.quiz = Some(window);
        Ok(window)
    }

    /// Close the open quiz on `slide_id`. With `generation` set (timer
    /// expiry) only a window opened in that generation is closed.
    pub fn close_quiz(&mut self, slide_id: Uuid, generation: Option<u64>) -> Option<QuizWindow> {
        let open = self.quiz?;
        if open.slide_id != slide_id || generation.is_some_and(|g| g != open.generation) {
            return None;
        }
        self.take_quiz()
    }

    fn take_quiz(&mut self) -> Option<QuizWindow> {
        let window = self.quiz.take()?;
        self.finished_quizzes.insert(window.slide_id);
        Some(window)
    }

    pub fn quiz(&self) -> Option<&QuizWindow> {
        self.quiz.as_ref()
    }

    pub fn quiz_finished(&self, slide_id: Uuid) -> bool {
        self.finished_quizzes.contains(&slide_id)
    }

    /// Latency for a quiz answer on `slide_id` arriving at `now_ms`.
    pub fn quiz_latency(&self, slide_id: Uuid, now_ms: u64) -> LiveResult<u64> {
        match &self.quiz {
            Some(w) if w.slide_id == slide_id => w.latency(now_ms),
            _ if self.finished_quizzes.contains(&slide_id) => Err(LiveError::closed("Quiz has ended")),
            _ => Err(LiveError::closed("Quiz has not started yet")),
        }
    }

    pub fn set_locked(&mut self, slide_id: Uuid, locked: bool) -> bool {
        if locked {
            self.locked.insert(slide_id)
        } else {
            self.locked.remove(&slide_id)
        }
    }

    pub fn is_locked(&self, slide_id: Uuid) -> bool {
        self.locked.contains(&slide_id)
    }
}
