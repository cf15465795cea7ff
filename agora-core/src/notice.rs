//! Outbound events and their routing.
//!
//! The engine never touches connections. Each operation returns [`Effects`]:
//! a list of notices addressed to a [`Recipient`] plus transport [`Action`]s
//! the gateway must carry out (close a connection, arm a timer, tear the
//! room down).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::{AggregateSnapshot, LeaderboardEntry, Verdict};
use crate::answer::Answer;
use crate::error::{LiveError, Recovery};
use crate::runtime::QuizWindow;
use crate::session::{ParticipantStatus, RosterEntry};
use crate::slide::{PresentationInfo, PublicSlide, Slide};

/// Full participant view, sent on join, reconnect and lag resync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub participant_id: Uuid,
    /// Presented with `participantId` to re-attach after a reconnect.
    pub resume_token: Uuid,
    pub status: ParticipantStatus,
    pub presentation: PresentationInfo,
    pub slide: Option<PublicSlide>,
    pub aggregate_snapshot: Option<AggregateSnapshot>,
    pub has_submitted: bool,
    pub submission_count: u32,
    /// The participant's own latest answer on the current slide.
    pub participant_response: Option<Answer>,
    pub quiz: Option<QuizWindow>,
    pub rejoined: bool,
}

/// Full presenter view, with unredacted slide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenterState {
    pub presentation: PresentationInfo,
    pub slide: Option<Slide>,
    pub aggregate_snapshot: Option<AggregateSnapshot>,
    pub participants: Vec<RosterEntry>,
    pub quiz: Option<QuizWindow>,
}

/// Acknowledgement to a submitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub success: bool,
    pub slide_id: Uuid,
    pub submission_count: u32,
    /// No further submission will be accepted from this participant.
    pub has_submitted: bool,
    pub result: Option<Verdict>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlideResults {
    pub slide_id: Uuid,
    pub aggregate_snapshot: AggregateSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Notice {
    JoinedPresentation(SessionState),
    PresentationNotLive {
        participant_id: Uuid,
        resume_token: Uuid,
        presentation: PresentationInfo,
        message: String,
    },
    PresentationLive {
        presentation: PresentationInfo,
        slide: Option<PublicSlide>,
        aggregate_snapshot: Option<AggregateSnapshot>,
    },
    PresentationStarted(PresenterState),
    SlideChanged {
        index: usize,
        slide: Option<PublicSlide>,
        aggregate_snapshot: Option<AggregateSnapshot>,
    },
    /// Per-participant submission flags for a slide revisited after a change.
    SubmissionState {
        slide_id: Uuid,
        has_submitted: bool,
        submission_count: u32,
        participant_response: Option<Answer>,
    },
    ResponseSubmitted(Receipt),
    ResponseUpdated(SlideResults),
    QnaQuestionSubmitted(Receipt),
    QnaUpdated(SlideResults),
    GuessSubmitted(Receipt),
    GuessUpdated(SlideResults),
    GuessReset {
        slide_id: Uuid,
    },
    QuizStarted {
        slide_id: Uuid,
        start_time: u64,
        time_limit: u64,
    },
    QuizAnswerSubmitted(Receipt),
    QuizResultsUpdated(SlideResults),
    QuizEnded {
        slide_id: Uuid,
        correct_option: usize,
        leaderboard: Vec<LeaderboardEntry>,
    },
    LeaderboardData {
        quiz_id: Option<Uuid>,
        leaderboard: Vec<LeaderboardEntry>,
    },
    VoteRecorded {
        slide_id: Uuid,
        response_id: String,
    },
    ResponsesLocked {
        slide_id: Uuid,
        locked: bool,
    },
    ParticipantListUpdated {
        participant_count: usize,
        participants: Vec<RosterEntry>,
    },
    PresentationEnded {
        presentation_id: Uuid,
        message: String,
    },
    KickedByPresenter {
        message: String,
    },
    Error {
        code: String,
        message: String,
        recovery: Recovery,
    },
    Pong {
        server_time: u64,
    },
}

impl Notice {
    pub fn error(err: &LiveError) -> Self {
        Self::Error {
            code: err.code().to_string(),
            message: err.to_string(),
            recovery: err.recovery(),
        }
    }

    /// Wire event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::JoinedPresentation(_) => "joined-presentation",
            Self::PresentationNotLive { .. } => "presentation-not-live",
            Self::PresentationLive { .. } => "presentation-live",
            Self::PresentationStarted(_) => "presentation-started",
            Self::SlideChanged { .. } => "slide-changed",
            Self::SubmissionState { .. } => "submission-state",
            Self::ResponseSubmitted(_) => "response-submitted",
            Self::ResponseUpdated(_) => "response-updated",
            Self::QnaQuestionSubmitted(_) => "qna-question-submitted",
            Self::QnaUpdated(_) => "qna-updated",
            Self::GuessSubmitted(_) => "guess-submitted",
            Self::GuessUpdated(_) => "guess-updated",
            Self::GuessReset { .. } => "guess-reset",
            Self::QuizStarted { .. } => "quiz-started",
            Self::QuizAnswerSubmitted(_) => "quiz-answer-submitted",
            Self::QuizResultsUpdated(_) => "quiz-results-updated",
            Self::QuizEnded { .. } => "quiz-ended",
            Self::LeaderboardData { .. } => "leaderboard-data",
            Self::VoteRecorded { .. } => "vote-recorded",
            Self::ResponsesLocked { .. } => "responses-locked",
            Self::ParticipantListUpdated { .. } => "participant-list-updated",
            Self::PresentationEnded { .. } => "presentation-ended",
            Self::KickedByPresenter { .. } => "kicked-by-presenter",
            Self::Error { .. } => "error",
            Self::Pong { .. } => "pong",
        }
    }

    /// Frames that describe one slide's live state. A client that has
    /// already seen a newer generation drops these.
    pub fn is_slide_scoped(&self) -> bool {
        matches!(
            self,
            Self::SubmissionState { .. }
                | Self::ResponseUpdated(_)
                | Self::QnaUpdated(_)
                | Self::GuessUpdated(_)
                | Self::GuessReset { .. }
                | Self::QuizStarted { .. }
                | Self::QuizResultsUpdated(_)
                | Self::ResponsesLocked { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    /// The connection that issued the command.
    Sender,
    /// Every connection in the presentation's room.
    Room,
    Presenter,
    Participant(Uuid),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub to: Recipient,
    pub notice: Notice,
}

/// Transport work requested by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Close the participant's connection after its pending notices.
    Disconnect(Uuid),
    /// Call `expire_quiz(slide_id, generation)` after `after_ms`.
    ScheduleQuizClose { slide_id: Uuid, generation: u64, after_ms: u64 },
    CancelQuizTimer,
    /// The presentation is over; drop the room.
    Teardown,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Effects {
    pub dispatches: Vec<Dispatch>,
    pub actions: Vec<Action>,
}

impl Effects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&mut self, to: Recipient, notice: Notice) -> &mut Self {
        self.dispatches.push(Dispatch { to, notice });
        self
    }

    pub fn to_sender(&mut self, notice: Notice) -> &mut Self {
        self.send(Recipient::Sender, notice)
    }

    pub fn to_room(&mut self, notice: Notice) -> &mut Self {
        self.send(Recipient::Room, notice)
    }

    pub fn to_presenter(&mut self, notice: Notice) -> &mut Self {
        self.send(Recipient::Presenter, notice)
    }

    pub fn act(&mut self, action: Action) -> &mut Self {
        self.actions.push(action);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.dispatches.is_empty() && self.actions.is_empty()
    }

    /// Notices addressed to `to`, in order.
    pub fn for_recipient(&self, to: Recipient) -> impl Iterator<Item = &Notice> {
        self.dispatches.iter().filter(move |d| d.to == to).map(|d| &d.notice)
    }
}
