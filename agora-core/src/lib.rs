//! # agora-core: Live audience interaction domain
//!
//! Pure, synchronous state for one presentation: no sockets, no clocks.
//!
//! ## Architecture
//!
//! ```text
//!                ┌────────────────────────┐
//!   commands ──▸ │   LivePresentation     │ ──▸ Effects (notices + actions)
//!                └───┬────────┬────────┬──┘
//!                    │        │        │
//!          ┌─────────▼──┐ ┌───▼─────┐ ┌▼─────────────────┐
//!          │ Runtime    │ │Registry │ │ResponseAggregator│
//!          │ (status,   │ │(people, │ │(per-slide        │
//!          │  slide,    │ │ answers)│ │ reducers)        │
//!          │  quiz)     │ └─────────┘ └────────▲─────────┘
//!          └────────────┘                      │
//!                                  Slide Type Registry
//!                                  (shape, policy, reducer)
//! ```
//!
//! ## Modules
//!
//! - [`slide`]: Presentation / slide model and public views
//! - [`answer`]: Wire answers and their validated form
//! - [`registry`]: Per-type validation and resubmission policy
//! - [`aggregate`]: Order-independent reducers and snapshots
//! - [`session`]: Participants, reconnects, kicks
//! - [`runtime`]: NotLive → Live → Ended, slide pointer, quiz window
//! - [`notice`]: Outbound events and routing
//! - [`engine`]: Composition of the above per presentation

pub mod aggregate;
pub mod answer;
pub mod engine;
pub mod error;
pub mod notice;
pub mod registry;
pub mod runtime;
pub mod session;
pub mod slide;

pub use aggregate::{AggregateSnapshot, LeaderboardEntry, ResponseAggregator, Submission, Verdict};
pub use answer::{Answer, NormalizedAnswer};
pub use engine::LivePresentation;
pub use error::{LiveError, LiveResult, Recovery};
pub use notice::{Action, Dispatch, Effects, Notice, PresenterState, Receipt, Recipient, SessionState, SlideResults};
pub use registry::ResubmissionPolicy;
pub use runtime::{LiveStatus, PresentationRuntime, QuizWindow};
pub use session::{ParticipantRegistry, ParticipantStatus, RosterEntry};
pub use slide::{Presentation, PresentationInfo, PublicSlide, Slide, SlideKind};
