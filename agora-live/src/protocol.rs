//! JSON wire protocol.
//!
//! Text frames, one event each:
//! ```text
//! client → server   { "event": "submit-response", "data": { "slideId": …, "answer": … } }
//! server → client   { "event": "response-updated", "data": { … }, "generation": 7 }
//! ```
//!
//! `generation` is the presentation runtime's slide generation at the time
//! the frame was produced. Clients drop slide-scoped frames that are older
//! than the newest generation they have seen.

use agora_core::{Answer, Notice};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

fn answered() -> bool {
    true
}

/// Inbound event from a participant or presenter connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    JoinPresentation {
        access_code: String,
        /// Set on reconnect to re-attach to an existing record.
        #[serde(default)]
        participant_id: Option<Uuid>,
        /// Issued with the first `joined-presentation`; required with a known
        /// `participant_id`.
        #[serde(default)]
        resume_token: Option<Uuid>,
        #[serde(default)]
        participant_name: String,
    },
    SubmitResponse {
        #[serde(default)]
        presentation_id: Option<Uuid>,
        slide_id: Uuid,
        #[serde(default)]
        participant_id: Option<Uuid>,
        answer: Answer,
    },
    SubmitQnaQuestion {
        slide_id: Uuid,
        #[serde(default)]
        participant_id: Option<Uuid>,
        question: String,
    },
    SubmitGuess {
        slide_id: Uuid,
        #[serde(default)]
        participant_id: Option<Uuid>,
        guess: i64,
    },
    SubmitQuizAnswer {
        slide_id: Uuid,
        #[serde(default)]
        participant_id: Option<Uuid>,
        answer: usize,
    },
    VoteOpenEndedResponse {
        slide_id: Uuid,
        response_id: String,
    },
    RequestQnaState {
        slide_id: Uuid,
    },
    RequestLeaderboard {
        #[serde(default)]
        quiz_id: Option<Uuid>,
    },
    Ping,

    // Presenter commands.
    StartPresentation {
        #[serde(default)]
        access_code: Option<String>,
        #[serde(default)]
        presentation_id: Option<Uuid>,
        presenter_token: String,
    },
    ChangeSlide {
        index: usize,
    },
    NextSlide,
    PreviousSlide,
    EndPresentation,
    StartQuiz {
        slide_id: Uuid,
    },
    EndQuiz {
        slide_id: Uuid,
    },
    MarkQnaAnswered {
        slide_id: Uuid,
        question_id: String,
        #[serde(default = "answered")]
        answered: bool,
        #[serde(default)]
        answer_text: Option<String>,
    },
    SetQnaActiveQuestion {
        slide_id: Uuid,
        #[serde(default)]
        question_id: Option<String>,
    },
    ClearQnaQuestions {
        slide_id: Uuid,
    },
    UpdateQnaSettings {
        slide_id: Uuid,
        allow_multiple: bool,
    },
    ClearGuessResponses {
        slide_id: Uuid,
    },
    LockResponses {
        slide_id: Uuid,
        locked: bool,
    },
    KickParticipant {
        participant_id: Uuid,
    },
    AdmitParticipant {
        participant_id: Uuid,
    },
}

impl ClientEvent {
    /// Commands only the authenticated presenter connection may issue.
    /// `start-presentation` is excluded: it is how a connection proves it
    /// is the presenter.
    pub fn is_presenter_command(&self) -> bool {
        matches!(
            self,
            Self::ChangeSlide { .. }
                | Self::NextSlide
                | Self::PreviousSlide
                | Self::EndPresentation
                | Self::StartQuiz { .. }
                | Self::EndQuiz { .. }
                | Self::MarkQnaAnswered { .. }
                | Self::SetQnaActiveQuestion { .. }
                | Self::ClearQnaQuestions { .. }
                | Self::UpdateQnaSettings { .. }
                | Self::ClearGuessResponses { .. }
                | Self::LockResponses { .. }
                | Self::KickParticipant { .. }
                | Self::AdmitParticipant { .. }
        )
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }
}

#[derive(Serialize)]
struct FrameRef<'a> {
    #[serde(flatten)]
    notice: &'a Notice,
    generation: u64,
}

#[derive(Deserialize)]
struct Stamp {
    #[serde(default)]
    generation: u64,
}

/// Outbound notice stamped with the runtime generation.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub notice: Notice,
    pub generation: u64,
}

impl Frame {
    pub fn new(notice: Notice, generation: u64) -> Self {
        Self { notice, generation }
    }

    pub fn event_name(&self) -> &'static str {
        self.notice.event_name()
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        encode_notice(&self.notice, self.generation)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: serde_json::Value = serde_json::from_str(text).map_err(ProtocolError::Decode)?;
        let Stamp { generation } = Stamp::deserialize(&value).map_err(ProtocolError::Decode)?;
        let notice = Notice::deserialize(value).map_err(ProtocolError::Decode)?;
        Ok(Self { notice, generation })
    }
}

/// Encode without cloning the notice.
pub fn encode_notice(notice: &Notice, generation: u64) -> Result<String, ProtocolError> {
    serde_json::to_string(&FrameRef { notice, generation }).map_err(ProtocolError::Encode)
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Deserialization error: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Connection timeout")]
    Timeout,

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_event_shape() {
        let json = r#"{"event":"join-presentation","data":{"accessCode":"ABC123","participantName":"Ada"}}"#;
        let event = ClientEvent::decode(json).unwrap();
        assert_eq!(
            event,
            ClientEvent::JoinPresentation {
                access_code: "ABC123".into(),
                participant_id: None,
                resume_token: None,
                participant_name: "Ada".into(),
            }
        );
        assert!(!event.is_presenter_command());
    }

    #[test]
    fn test_submit_response_carries_tagged_answer() {
        let slide = Uuid::new_v4();
        let json = format!(
            r#"{{"event":"submit-response","data":{{"slideId":"{slide}","answer":{{"kind":"choice","value":["A"]}}}}}}"#
        );
        match ClientEvent::decode(&json).unwrap() {
            ClientEvent::SubmitResponse { slide_id, answer, participant_id, .. } => {
                assert_eq!(slide_id, slide);
                assert_eq!(answer, Answer::Choice(vec!["A".into()]));
                assert_eq!(participant_id, None);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_unit_events_need_no_data() {
        assert_eq!(ClientEvent::decode(r#"{"event":"ping"}"#).unwrap(), ClientEvent::Ping);
        let next = ClientEvent::decode(r#"{"event":"next-slide"}"#).unwrap();
        assert!(next.is_presenter_command());
    }

    #[test]
    fn test_mark_answered_defaults_to_true() {
        let json = format!(
            r#"{{"event":"mark-qna-answered","data":{{"slideId":"{}","questionId":"q"}}}}"#,
            Uuid::nil()
        );
        match ClientEvent::decode(&json).unwrap() {
            ClientEvent::MarkQnaAnswered { answered, answer_text, .. } => {
                assert!(answered);
                assert_eq!(answer_text, None);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        let err = ClientEvent::decode(r#"{"event":"delete-everything","data":{}}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));
    }

    #[test]
    fn test_frame_carries_generation() {
        let frame = Frame::new(Notice::GuessReset { slide_id: Uuid::nil() }, 4);
        let text = frame.encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["event"], "guess-reset");
        assert_eq!(value["generation"], 4);
        assert_eq!(value["data"]["slideId"], Uuid::nil().to_string());

        let back = Frame::decode(&text).unwrap();
        assert_eq!(back, frame);
        assert_eq!(back.event_name(), "guess-reset");
    }
}
