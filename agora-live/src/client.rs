//! WebSocket client for the live gateway.
//!
//! Used by the integration tests and by tooling that drives a presentation
//! (load generators, presenter remotes). Provides:
//! - Connection lifecycle (connect, close)
//! - Typed event send / frame receive
//! - Generation filtering: slide-scoped frames older than the newest
//!   generation already seen are dropped

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{ClientEvent, Frame, ProtocolError};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Tracks the newest generation seen and decides whether a frame is stale.
#[derive(Debug, Default)]
pub struct GenerationFilter {
    newest: AtomicU64,
    dropped: AtomicU64,
}

impl GenerationFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` if the frame should reach the application.
    pub fn admit(&self, frame: &Frame) -> bool {
        let newest = self.newest.fetch_max(frame.generation, Ordering::AcqRel);
        if frame.generation < newest && frame.notice.is_slide_scoped() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        true
    }

    pub fn newest(&self) -> u64 {
        self.newest.load(Ordering::Acquire)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

pub struct LiveClient {
    server_url: String,
    state: Arc<RwLock<ConnectionState>>,
    filter: Arc<GenerationFilter>,
    outgoing_tx: Option<mpsc::Sender<String>>,
    incoming_rx: Option<mpsc::Receiver<Frame>>,
}

impl LiveClient {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            filter: Arc::new(GenerationFilter::new()),
            outgoing_tx: None,
            incoming_rx: None,
        }
    }

    /// Connect and spawn the reader and writer tasks.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let (ws_stream, _) = match tokio_tungstenite::connect_async(&self.server_url).await {
            Ok(ok) => ok,
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::WebSocket(e));
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward outgoing channel to WebSocket
        let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if ws_writer.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.send(Message::Close(None)).await;
        });

        // Reader task: decode frames and drop stale ones
        let (in_tx, in_rx) = mpsc::channel::<Frame>(1024);
        let state = self.state.clone();
        let filter = self.filter.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match Frame::decode(text.as_str()) {
                        Ok(frame) => {
                            if !filter.admit(&frame) {
                                log::trace!("Dropping stale {} (generation {})", frame.event_name(), frame.generation);
                                continue;
                            }
                            if in_tx.send(frame).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => log::warn!("Undecodable frame from server: {e}"),
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            *state.write().await = ConnectionState::Disconnected;
        });

        self.outgoing_tx = Some(out_tx);
        self.incoming_rx = Some(in_rx);
        *self.state.write().await = ConnectionState::Connected;
        Ok(())
    }

    pub async fn send(&self, event: &ClientEvent) -> Result<(), ProtocolError> {
        let text = event.encode()?;
        let tx = self.outgoing_tx.as_ref().ok_or(ProtocolError::ConnectionClosed)?;
        tx.send(text).await.map_err(|_| ProtocolError::ConnectionClosed)
    }

    /// Next frame; `None` once the server closed the connection.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.incoming_rx.as_mut()?.recv().await
    }

    pub async fn recv_timeout(&mut self, wait: Duration) -> Result<Frame, ProtocolError> {
        match tokio::time::timeout(wait, self.recv()).await {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => Err(ProtocolError::ConnectionClosed),
            Err(_) => Err(ProtocolError::Timeout),
        }
    }

    /// Skip frames until one named `event` arrives.
    pub async fn expect(&mut self, event: &str, wait: Duration) -> Result<Frame, ProtocolError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            let frame = self.recv_timeout(left).await?;
            if frame.event_name() == event {
                return Ok(frame);
            }
            log::trace!("Skipping {} while waiting for {event}", frame.event_name());
        }
    }

    /// Stop sending; the writer task closes the socket.
    pub fn close(&mut self) {
        self.outgoing_tx = None;
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn generation(&self) -> u64 {
        self.filter.newest()
    }

    pub fn dropped_frames(&self) -> u64 {
        self.filter.dropped()
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}
