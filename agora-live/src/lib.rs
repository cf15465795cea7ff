//! # agora-live: Synchronization gateway for live presentations
//!
//! Connects participants and presenters to the per-presentation engines of
//! `agora-core` over WebSocket.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket       ┌─────────────┐
//! │ LiveClient  │ ◄─────────────────► │ LiveServer  │
//! │ (per user)  │     JSON frames     │ (gateway)   │
//! └─────────────┘                     └──────┬──────┘
//!                                            │ catalog lookup
//!                                     ┌──────▼────────┐
//!                                     │ RoomManager   │
//!                                     └──────┬────────┘
//!                                            │ one per presentation
//!                                     ┌──────▼────────┐
//!                                     │ Presentation- │── LivePresentation
//!                                     │ Room          │── BroadcastGroup
//!                                     └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: JSON wire protocol (`ClientEvent` in, `Frame` out)
//! - [`broadcast`]: Room fan-out with backpressure
//! - [`room`]: Rooms, effect routing, quiz timers
//! - [`catalog`]: Presentation lookup seam
//! - [`server`]: WebSocket gateway
//! - [`client`]: WebSocket client with stale frame filtering

pub mod broadcast;
pub mod catalog;
pub mod client;
pub mod protocol;
pub mod room;
pub mod server;

pub use broadcast::{Audience, BroadcastGroup, BroadcastStats, Envelope, Payload, PeerInfo, PeerRole};
pub use catalog::{CatalogError, MemoryCatalog, PresentationCatalog};
pub use client::{ConnectionState, GenerationFilter, LiveClient};
pub use protocol::{ClientEvent, Frame, ProtocolError};
pub use room::{now_ms, PresentationRoom, RoomManager, RoomState};
pub use server::{LiveServer, ServerConfig, ServerStats};
