//! Per-presentation engine.
//!
//! ```text
//!                       ┌──────────────────────────────┐
//!   command ──────────▸ │ LivePresentation             │ ──▸ Effects
//!   (already            │  runtime    (status, slide)  │     ├ Dispatch { to, notice }
//!    authorized)        │  registry   (participants)   │     └ Action (disconnect,
//!                       │  aggregator (per-slide state)│        timers, teardown)
//!                       └──────────────────────────────┘
//! ```
//!
//! Every method runs to completion on `&mut self`; the gateway holds one
//! engine per presentation behind a lock, so "validate then fold" is a single
//! step and a concurrent duplicate submission can only observe the state
//! after the first one was recorded. Time is passed in as `now_ms` so quiz
//! windows are testable without a clock.

use uuid::Uuid;

use crate::aggregate::{AggregateSnapshot, ResponseAggregator, Submission};
use crate::answer::Answer;
use crate::error::{LiveError, LiveResult};
use crate::notice::{Action, Effects, Notice, PresenterState, Receipt, Recipient, SessionState, SlideResults};
use crate::registry;
use crate::runtime::{LiveStatus, PresentationRuntime, QuizWindow};
use crate::session::{ParticipantRegistry, ParticipantStatus, RecordedAnswer};
use crate::slide::{Presentation, PresentationInfo, Slide, SlideKind};

pub struct LivePresentation {
    presentation: Presentation,
    runtime: PresentationRuntime,
    registry: ParticipantRegistry,
    aggregator: ResponseAggregator,
    max_participants: Option<usize>,
}

impl LivePresentation {
    /// Load a validated presentation into a fresh, not-live runtime.
    pub fn new(presentation: Presentation, max_participants: Option<usize>) -> LiveResult<Self> {
        presentation.validate()?;
        let aggregator = ResponseAggregator::for_slides(&presentation.slides);
        let runtime = PresentationRuntime::new(presentation.slides.len());
        Ok(Self {
            presentation,
            runtime,
            registry: ParticipantRegistry::new(),
            aggregator,
            max_participants,
        })
    }

    pub fn id(&self) -> Uuid {
        self.presentation.id
    }

    pub fn access_code(&self) -> &str {
        &self.presentation.access_code
    }

    pub fn presentation(&self) -> &Presentation {
        &self.presentation
    }

    pub fn status(&self) -> LiveStatus {
        self.runtime.status()
    }

    pub fn generation(&self) -> u64 {
        self.runtime.generation()
    }

    pub fn registry(&self) -> &ParticipantRegistry {
        &self.registry
    }

    pub fn runtime(&self) -> &PresentationRuntime {
        &self.runtime
    }

    pub fn info(&self) -> PresentationInfo {
        self.presentation
            .info(self.runtime.current_index(), self.runtime.is_live())
    }

    pub fn authorize_presenter(&self, token: &str) -> LiveResult<()> {
        if token.is_empty() || token != self.presentation.presenter_token {
            return Err(LiveError::unauthorized("Invalid presenter credentials"));
        }
        Ok(())
    }

    fn require_live(&self) -> LiveResult<()> {
        match self.runtime.status() {
            LiveStatus::Live => Ok(()),
            LiveStatus::NotLive => Err(LiveError::NotLive),
            LiveStatus::Ended => Err(LiveError::closed("Presentation has ended")),
        }
    }

    fn slide(&self, slide_id: Uuid) -> LiveResult<&Slide> {
        self.presentation
            .slide(slide_id)
            .ok_or_else(|| LiveError::not_found("Slide"))
    }

    pub fn current_slide(&self) -> Option<&Slide> {
        if self.runtime.status() == LiveStatus::NotLive {
            return None;
        }
        self.presentation.slides.get(self.runtime.current_index())
    }

    /// Slide that must be current for a participant action on `slide_id`.
    fn require_current(&self, slide_id: Uuid) -> LiveResult<&Slide> {
        self.require_live()?;
        let slide = self.slide(slide_id)?;
        match self.current_slide() {
            Some(current) if current.id == slide_id => Ok(slide),
            _ => Err(LiveError::closed("Slide is not active")),
        }
    }

    fn results(&self, slide_id: Uuid) -> LiveResult<SlideResults> {
        Ok(SlideResults {
            slide_id,
            aggregate_snapshot: self.aggregator.snapshot(slide_id)?,
        })
    }

    fn current_snapshot(&self) -> LiveResult<Option<AggregateSnapshot>> {
        self.current_slide()
            .map(|s| self.aggregator.snapshot(s.id))
            .transpose()
    }

    fn participant_snapshot(&self, slide_id: Uuid) -> LiveResult<Option<AggregateSnapshot>> {
        let snapshot = self.aggregator.snapshot(slide_id)?;
        Ok(snapshot.participant_view(self.runtime.quiz_finished(slide_id)))
    }

    fn current_participant_snapshot(&self) -> LiveResult<Option<AggregateSnapshot>> {
        match self.current_slide() {
            Some(slide) => self.participant_snapshot(slide.id),
            None => Ok(None),
        }
    }

    fn roster_notice(&self) -> Notice {
        let participants = self.registry.roster();
        Notice::ParticipantListUpdated {
            participant_count: participants
                .iter()
                .filter(|p| p.connected && p.status != ParticipantStatus::Kicked)
                .count(),
            participants,
        }
    }

    fn open_quiz(&self) -> Option<QuizWindow> {
        self.runtime.quiz().copied()
    }

    /// Complete state for one participant, as sent on join and resync.
    pub fn session_state(&self, participant_id: Uuid, rejoined: bool) -> LiveResult<SessionState> {
        let participant = self
            .registry
            .get(participant_id)
            .ok_or_else(|| LiveError::not_found("Participant"))?;
        let slide = self.current_slide();
        let (has_submitted, submission_count, participant_response) = match slide {
            Some(slide) => {
                let policy = self.aggregator.effective_policy(slide.id)?;
                let used = participant.used(slide.id);
                (
                    policy.is_exhausted(used, self.runtime.is_locked(slide.id)),
                    participant.record(slide.id).map_or(0, |r| r.answers.len() as u32),
                    participant.last_answer(slide.id).cloned(),
                )
            }
            None => (false, 0, None),
        };
        Ok(SessionState {
            participant_id,
            resume_token: participant.resume_token,
            status: participant.status,
            presentation: self.info(),
            slide: slide.map(Slide::public_view),
            aggregate_snapshot: self.current_participant_snapshot()?,
            has_submitted,
            submission_count,
            participant_response,
            quiz: self.open_quiz(),
            rejoined,
        })
    }

    pub fn presenter_state(&self) -> LiveResult<PresenterState> {
        Ok(PresenterState {
            presentation: self.info(),
            slide: self.current_slide().cloned(),
            aggregate_snapshot: self.current_snapshot()?,
            participants: self.registry.roster(),
            quiz: self.open_quiz(),
        })
    }

    /// Full-state notice replacing any deltas a connection may have missed.
    pub fn resync(&self, participant_id: Option<Uuid>) -> LiveResult<Notice> {
        match participant_id {
            Some(id) => Ok(Notice::JoinedPresentation(self.session_state(id, true)?)),
            None => Ok(Notice::PresentationStarted(self.presenter_state()?)),
        }
    }

    /// Join or reconnect. Joining before the presenter starts registers the
    /// participant as waiting and answers with `presentation-not-live`.
    /// Reconnecting under a known id needs the resume token from the first
    /// join.
    pub fn join(
        &mut self,
        participant_id: Option<Uuid>,
        resume_token: Option<Uuid>,
        display_name: &str,
        now_ms: u64,
    ) -> LiveResult<(Uuid, Effects)> {
        if self.runtime.status() == LiveStatus::Ended {
            return Err(LiveError::closed("Presentation has ended"));
        }
        let live = self.runtime.is_live();
        let outcome = self
            .registry
            .join(participant_id, resume_token, display_name, live, self.max_participants, now_ms)?;
        let id = outcome.participant_id;
        log::info!(
            "Participant {id} {} presentation {} ({:?})",
            if outcome.rejoined { "rejoined" } else { "joined" },
            self.presentation.id,
            outcome.status
        );

        let mut fx = Effects::new();
        if live {
            fx.to_sender(Notice::JoinedPresentation(self.session_state(id, outcome.rejoined)?));
        } else {
            fx.to_sender(Notice::PresentationNotLive {
                participant_id: id,
                resume_token: outcome.resume_token,
                presentation: self.info(),
                message: LiveError::NotLive.to_string(),
            });
        }
        fx.to_presenter(self.roster_notice());
        Ok((id, fx))
    }

    /// Presenter start. Repeating it while live only re-sends presenter state.
    pub fn start(&mut self, token: &str, now_ms: u64) -> LiveResult<Effects> {
        self.authorize_presenter(token)?;
        let went_live = self.runtime.start(now_ms)?;
        let mut fx = Effects::new();
        if went_live {
            let promoted = self.registry.promote_waiting();
            log::info!(
                "Presentation {} is live, {} waiting participant(s) admitted",
                self.presentation.id,
                promoted.len()
            );
            fx.to_room(Notice::PresentationLive {
                presentation: self.info(),
                slide: self.current_slide().map(Slide::public_view),
                aggregate_snapshot: self.current_participant_snapshot()?,
            });
        }
        fx.to_sender(Notice::PresentationStarted(self.presenter_state()?));
        Ok(fx)
    }

    pub fn goto(&mut self, index: usize) -> LiveResult<Effects> {
        let Some(transition) = self.runtime.goto(index)? else {
            return Ok(Effects::new());
        };
        let mut fx = Effects::new();
        if let Some(window) = transition.closed_quiz {
            fx.to_room(self.quiz_ended(window.slide_id)?);
            fx.act(Action::CancelQuizTimer);
        }
        if let Some(left) = self.presentation.slides.get(transition.from) {
            self.aggregator.release(left.id);
        }

        let slide = self
            .presentation
            .slides
            .get(transition.to)
            .ok_or_else(|| LiveError::Internal(format!("slide index {} vanished", transition.to)))?;
        log::debug!(
            "Presentation {} moved to slide {} ({}) generation {}",
            self.presentation.id,
            transition.to,
            slide.kind.type_name(),
            transition.generation
        );
        fx.to_room(Notice::SlideChanged {
            index: transition.to,
            slide: Some(slide.public_view()),
            aggregate_snapshot: self.participant_snapshot(slide.id)?,
        });

        // Revisited slide: restore flags for those who already answered.
        let policy = self.aggregator.effective_policy(slide.id)?;
        let locked = self.runtime.is_locked(slide.id);
        for p in self.registry.iter() {
            let Some(record) = p.record(slide.id) else {
                continue;
            };
            fx.send(
                Recipient::Participant(p.id),
                Notice::SubmissionState {
                    slide_id: slide.id,
                    has_submitted: policy.is_exhausted(record.used, locked),
                    submission_count: record.answers.len() as u32,
                    participant_response: record.answers.last().map(|r| r.answer.clone()),
                },
            );
        }
        Ok(fx)
    }

    pub fn advance(&mut self) -> LiveResult<Effects> {
        self.require_live()?;
        self.goto(self.runtime.current_index() + 1)
    }

    pub fn back(&mut self) -> LiveResult<Effects> {
        self.require_live()?;
        let current = self.runtime.current_index();
        if current == 0 {
            return Err(LiveError::validation("Already on the first slide"));
        }
        self.goto(current - 1)
    }

    pub fn end(&mut self) -> LiveResult<Effects> {
        let current = self.current_slide().map(|s| s.id);
        let open_quiz = self.runtime.end()?;
        let mut fx = Effects::new();
        if let Some(window) = open_quiz {
            fx.to_room(self.quiz_ended(window.slide_id)?);
        }
        if let Some(slide_id) = current {
            self.aggregator.release(slide_id);
        }
        log::info!("Presentation {} ended", self.presentation.id);
        fx.to_room(Notice::PresentationEnded {
            presentation_id: self.presentation.id,
            message: "The presenter has ended this presentation".to_string(),
        })
        .act(Action::CancelQuizTimer)
        .act(Action::Teardown);
        Ok(fx)
    }

    /// Validate, gate, fold and record one answer.
    pub fn submit(
        &mut self,
        participant_id: Uuid,
        slide_id: Uuid,
        answer: Answer,
        now_ms: u64,
    ) -> LiveResult<Effects> {
        self.require_live()?;
        let participant = self.registry.active(participant_id)?;
        let display_name = participant.display_name.clone();
        let used = participant.used(slide_id);

        let slide = self.require_current(slide_id)?;
        let kind = slide.kind.clone();
        let locked = self.runtime.is_locked(slide_id);
        if locked {
            return Err(LiveError::closed("Responses are locked for this slide"));
        }
        let latency_ms = match kind {
            SlideKind::Quiz { .. } => self.runtime.quiz_latency(slide_id, now_ms)?,
            _ => 0,
        };
        let normalized = registry::normalize(&kind, answer.clone(), latency_ms)?;
        let cost = registry::cost(&normalized);
        let policy = self.aggregator.effective_policy(slide_id)?;
        policy.admit(used, cost, locked)?;

        let sub = Submission {
            participant_id,
            display_name,
            at_ms: now_ms,
        };
        let (snapshot, verdict) = self.aggregator.fold(slide_id, &sub, &normalized)?;
        let record = self.registry.record(
            participant_id,
            slide_id,
            RecordedAnswer {
                answer,
                normalized,
                at_ms: now_ms,
            },
            cost,
        )?;
        let receipt = Receipt {
            success: true,
            slide_id,
            submission_count: record.answers.len() as u32,
            has_submitted: policy.is_exhausted(record.used, false),
            result: verdict,
        };
        log::debug!(
            "Accepted {} answer from {participant_id} on slide {slide_id} ({} total)",
            kind.type_name(),
            snapshot.total_responses()
        );

        let results = SlideResults {
            slide_id,
            aggregate_snapshot: snapshot,
        };
        let mut fx = Effects::new();
        match kind {
            SlideKind::Qna { .. } => {
                fx.to_sender(Notice::QnaQuestionSubmitted(receipt))
                    .to_room(Notice::QnaUpdated(results));
            }
            SlideKind::GuessNumber { .. } => {
                fx.to_sender(Notice::GuessSubmitted(receipt))
                    .to_room(Notice::GuessUpdated(results));
            }
            SlideKind::Quiz { .. } => {
                fx.to_sender(Notice::QuizAnswerSubmitted(receipt))
                    .to_presenter(Notice::QuizResultsUpdated(results));
            }
            _ => {
                fx.to_sender(Notice::ResponseSubmitted(receipt))
                    .to_room(Notice::ResponseUpdated(results));
            }
        }
        Ok(fx)
    }

    pub fn start_quiz(&mut self, slide_id: Uuid, now_ms: u64) -> LiveResult<Effects> {
        let slide = self.require_current(slide_id)?;
        let SlideKind::Quiz { time_limit_secs, .. } = slide.kind else {
            return Err(LiveError::validation("Slide is not a quiz"));
        };
        let window = self.runtime.open_quiz(slide_id, time_limit_secs.saturating_mul(1000), now_ms)?;
        log::info!(
            "Quiz {slide_id} opened for {}ms in presentation {}",
            window.time_limit_ms,
            self.presentation.id
        );
        let mut fx = Effects::new();
        fx.to_room(Notice::QuizStarted {
            slide_id,
            start_time: window.opened_at_ms,
            time_limit: window.time_limit_ms,
        })
        .act(Action::ScheduleQuizClose {
            slide_id,
            generation: window.generation,
            after_ms: window.time_limit_ms,
        });
        Ok(fx)
    }

    fn quiz_ended(&self, slide_id: Uuid) -> LiveResult<Notice> {
        let tally = self.aggregator.quiz(slide_id)?;
        Ok(Notice::QuizEnded {
            slide_id,
            correct_option: tally.correct_option(),
            leaderboard: tally.leaderboard(),
        })
    }

    /// Presenter closes the running quiz.
    pub fn end_quiz(&mut self, slide_id: Uuid) -> LiveResult<Effects> {
        self.require_live()?;
        self.slide(slide_id)?;
        if self.runtime.close_quiz(slide_id, None).is_none() {
            return Err(LiveError::closed("Quiz is not running"));
        }
        let mut fx = Effects::new();
        fx.to_room(self.quiz_ended(slide_id)?).act(Action::CancelQuizTimer);
        Ok(fx)
    }

    /// Timer expiry. A timer from an older generation is ignored.
    pub fn expire_quiz(&mut self, slide_id: Uuid, generation: u64) -> LiveResult<Effects> {
        let mut fx = Effects::new();
        if self.runtime.close_quiz(slide_id, Some(generation)).is_some() {
            log::debug!("Quiz {slide_id} expired");
            fx.to_room(self.quiz_ended(slide_id)?);
        }
        Ok(fx)
    }

    /// Cumulative board, or one quiz's board.
    pub fn leaderboard(&self, quiz_id: Option<Uuid>) -> LiveResult<Effects> {
        if let Some(id) = quiz_id {
            self.aggregator.quiz(id)?;
        }
        let mut fx = Effects::new();
        fx.to_sender(Notice::LeaderboardData {
            quiz_id,
            leaderboard: self.aggregator.leaderboard(quiz_id),
        });
        Ok(fx)
    }

    pub fn vote(&mut self, participant_id: Uuid, slide_id: Uuid, response_id: &str) -> LiveResult<Effects> {
        self.require_live()?;
        self.registry.active(participant_id)?;
        self.require_current(slide_id)?;
        if self.runtime.is_locked(slide_id) {
            return Err(LiveError::closed("Responses are locked for this slide"));
        }
        self.aggregator
            .open_ended_mut(slide_id)?
            .vote(response_id, participant_id)?;
        let mut fx = Effects::new();
        fx.to_sender(Notice::VoteRecorded {
            slide_id,
            response_id: response_id.to_string(),
        })
        .to_room(Notice::ResponseUpdated(self.results(slide_id)?));
        Ok(fx)
    }

    fn qna_changed(&self, slide_id: Uuid) -> LiveResult<Effects> {
        let mut fx = Effects::new();
        fx.to_room(Notice::QnaUpdated(self.results(slide_id)?));
        Ok(fx)
    }

    pub fn mark_qna_answered(
        &mut self,
        slide_id: Uuid,
        question_id: &str,
        answered: bool,
        answer_text: Option<String>,
    ) -> LiveResult<Effects> {
        self.aggregator
            .qna_mut(slide_id)?
            .mark_answered(question_id, answered, answer_text)?;
        self.qna_changed(slide_id)
    }

    pub fn set_qna_active(&mut self, slide_id: Uuid, question_id: Option<&str>) -> LiveResult<Effects> {
        self.aggregator.qna_mut(slide_id)?.set_active(question_id)?;
        self.qna_changed(slide_id)
    }

    /// Remove all questions and give every participant their quota back.
    pub fn clear_qna(&mut self, slide_id: Uuid) -> LiveResult<Effects> {
        self.aggregator.qna_mut(slide_id)?.clear();
        self.registry.reset_slide(slide_id);
        self.qna_changed(slide_id)
    }

    pub fn update_qna_settings(&mut self, slide_id: Uuid, allow_multiple: bool) -> LiveResult<Effects> {
        self.aggregator.qna_mut(slide_id)?.set_allow_multiple(allow_multiple);
        self.qna_changed(slide_id)
    }

    pub fn qna_state(&mut self, slide_id: Uuid) -> LiveResult<Effects> {
        self.aggregator.qna_mut(slide_id)?;
        let mut fx = Effects::new();
        fx.to_sender(Notice::QnaUpdated(self.results(slide_id)?));
        Ok(fx)
    }

    pub fn clear_guess(&mut self, slide_id: Uuid) -> LiveResult<Effects> {
        if !matches!(self.slide(slide_id)?.kind, SlideKind::GuessNumber { .. }) {
            return Err(LiveError::validation("Slide is not a guess number slide"));
        }
        self.aggregator.reset(slide_id)?;
        self.registry.reset_slide(slide_id);
        let mut fx = Effects::new();
        fx.to_room(Notice::GuessReset { slide_id })
            .to_room(Notice::ResponseUpdated(self.results(slide_id)?));
        Ok(fx)
    }

    pub fn lock_responses(&mut self, slide_id: Uuid, locked: bool) -> LiveResult<Effects> {
        self.slide(slide_id)?;
        self.runtime.set_locked(slide_id, locked);
        let mut fx = Effects::new();
        fx.to_room(Notice::ResponsesLocked { slide_id, locked });
        Ok(fx)
    }

    pub fn kick(&mut self, participant_id: Uuid) -> LiveResult<Effects> {
        self.registry.kick(participant_id)?;
        log::info!("Participant {participant_id} removed from presentation {}", self.presentation.id);
        let mut fx = Effects::new();
        fx.send(
            Recipient::Participant(participant_id),
            Notice::KickedByPresenter {
                message: "You have been removed from this presentation by the presenter".to_string(),
            },
        )
        .act(Action::Disconnect(participant_id))
        .to_presenter(self.roster_notice());
        Ok(fx)
    }

    pub fn admit(&mut self, participant_id: Uuid) -> LiveResult<Effects> {
        self.registry.admit(participant_id, self.runtime.is_live())?;
        let mut fx = Effects::new();
        fx.to_presenter(self.roster_notice());
        Ok(fx)
    }

    /// Connection dropped. The participant record and its answers survive.
    pub fn disconnect(&mut self, participant_id: Uuid) -> Effects {
        let mut fx = Effects::new();
        if self.registry.detach(participant_id) {
            fx.to_presenter(self.roster_notice());
        }
        fx
    }

    /// Recompute a slide's aggregate from the recorded answers.
    pub fn rebuild(&mut self, slide_id: Uuid) -> LiveResult<AggregateSnapshot> {
        let answers = self.registry.answers(slide_id);
        self.aggregator
            .replay(slide_id, answers.iter().map(|(s, a)| (s, a)))
    }

    pub fn snapshot(&self, slide_id: Uuid) -> LiveResult<AggregateSnapshot> {
        self.aggregator.snapshot(slide_id)
    }
}
