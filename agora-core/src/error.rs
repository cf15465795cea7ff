//! Error taxonomy for the live protocol.
//!
//! Every rejection a participant or presenter can receive is a [`LiveError`].
//! Errors are surfaced to the originating connection only; none of them is
//! allowed to take down the presentation (except [`LiveError::Internal`],
//! which terminates that single presentation's runtime).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What the client should do after a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Recovery {
    /// Fix the input and submit again.
    Retry,
    /// Nothing to do, the action already took effect earlier.
    AlreadyDone,
    /// The caller is not permitted to perform this action.
    NotAllowed,
    /// Not possible yet; wait for the presenter.
    Wait,
    /// The window for this action has passed.
    Expired,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LiveError {
    #[error("{what} not found")]
    NotFound { what: String },

    #[error("Presentation is not live yet. Waiting for presenter...")]
    NotLive,

    #[error("{0}")]
    Validation(String),

    #[error("Already submitted ({used}/{limit}) for this slide")]
    DuplicateSubmission { used: u32, limit: u32 },

    #[error("{0}")]
    Authorization(String),

    #[error("Time limit of {limit_ms}ms exceeded by {late_by_ms}ms")]
    Timeout { limit_ms: u64, late_by_ms: u64 },

    #[error("Session is full ({limit} participants)")]
    Capacity { limit: usize },

    #[error("{0}")]
    Closed(String),

    #[error("Internal state error: {0}")]
    Internal(String),
}

impl LiveError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Authorization(msg.into())
    }

    pub fn closed(msg: impl Into<String>) -> Self {
        Self::Closed(msg.into())
    }

    /// Stable machine-readable code, used as the wire `code` field.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not-found",
            Self::NotLive => "not-live",
            Self::Validation(_) => "validation",
            Self::DuplicateSubmission { .. } => "duplicate-submission",
            Self::Authorization(_) => "authorization",
            Self::Timeout { .. } => "timeout",
            Self::Capacity { .. } => "capacity",
            Self::Closed(_) => "closed",
            Self::Internal(_) => "internal",
        }
    }

    pub fn recovery(&self) -> Recovery {
        match self {
            Self::Validation(_) => Recovery::Retry,
            Self::DuplicateSubmission { .. } => Recovery::AlreadyDone,
            Self::NotFound { .. } | Self::Authorization(_) | Self::Capacity { .. } => {
                Recovery::NotAllowed
            }
            Self::NotLive | Self::Closed(_) => Recovery::Wait,
            Self::Timeout { .. } => Recovery::Expired,
            // The runtime is torn down; reconnecting is the only option.
            Self::Internal(_) => Recovery::Wait,
        }
    }

    /// Whether this error invalidates the presentation runtime.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}

pub type LiveResult<T> = Result<T, LiveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_distinguishes_retry_done_and_wait() {
        assert_eq!(LiveError::validation("bad").recovery(), Recovery::Retry);
        assert_eq!(
            LiveError::DuplicateSubmission { used: 1, limit: 1 }.recovery(),
            Recovery::AlreadyDone
        );
        assert_eq!(LiveError::NotLive.recovery(), Recovery::Wait);
        assert_eq!(
            LiveError::unauthorized("presenter only").recovery(),
            Recovery::NotAllowed
        );
        assert_eq!(
            LiveError::Timeout { limit_ms: 10_000, late_by_ms: 1_000 }.recovery(),
            Recovery::Expired
        );
    }

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(LiveError::not_found("Slide").code(), "not-found");
        assert_eq!(LiveError::NotLive.code(), "not-live");
        assert_eq!(LiveError::Capacity { limit: 3 }.code(), "capacity");
        assert_eq!(LiveError::Internal("x".into()).code(), "internal");
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(LiveError::not_found("Presentation").to_string(), "Presentation not found");
        assert_eq!(
            LiveError::DuplicateSubmission { used: 2, limit: 2 }.to_string(),
            "Already submitted (2/2) for this slide"
        );
        assert!(LiveError::Internal("x".into()).is_fatal());
        assert!(!LiveError::NotLive.is_fatal());
    }
}
