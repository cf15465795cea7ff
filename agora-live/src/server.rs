//! WebSocket gateway with one room per presentation.
//!
//! Architecture:
//! ```text
//! Participant A ──┐
//! Participant B ──┼── PresentationRoom (presentation id) ── LivePresentation
//! Presenter     ──┘          │
//!                            └── BroadcastGroup ──┬──▸ Participant A
//!                                                 ├──▸ Participant B
//!                                                 └──▸ Presenter
//! ```
//!
//! A connection starts unbound. `join-presentation` binds it as a
//! participant, `start-presentation` with the presenter token binds it as the
//! presenter channel. Presenter commands are accepted only from the
//! connection currently bound as presenter; role claims in payloads are
//! never trusted.
//!
//! Errors are answered on the offending connection only. An internal error
//! ends the affected presentation's room and nothing else.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use agora_core::{Answer, Effects, LiveError, LiveResult, Notice, Presentation};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{MutexGuard, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use crate::broadcast::{Audience, Envelope, Payload, PeerInfo, PeerRole};
use crate::catalog::PresentationCatalog;
use crate::protocol::{encode_notice, ClientEvent};
use crate::room::{now_ms, PresentationRoom, RoomManager, RoomState};

/// Server configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Participants admitted per presentation; reconnects are not counted
    pub max_participants_per_room: usize,
    /// Broadcast channel capacity per room
    pub broadcast_capacity: usize,
    /// WebSocket ping interval in seconds
    pub heartbeat_interval_secs: u64,
    /// JSON file with the presentation catalog
    pub catalog_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            max_participants_per_room: 100,
            broadcast_capacity: 256,
            heartbeat_interval_secs: 30,
            catalog_path: None,
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: Option<String>, fallback: T) -> T {
    match raw {
        None => fallback,
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                log::warn!("Ignoring malformed {name}={raw:?}, keeping the default");
                fallback
            }
        },
    }
}

impl ServerConfig {
    /// Defaults overlaid with `AGORA_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: var("AGORA_BIND_ADDR")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.bind_addr),
            max_participants_per_room: parse_var(
                "AGORA_MAX_PARTICIPANTS",
                var("AGORA_MAX_PARTICIPANTS"),
                defaults.max_participants_per_room,
            ),
            broadcast_capacity: parse_var(
                "AGORA_BROADCAST_CAPACITY",
                var("AGORA_BROADCAST_CAPACITY"),
                defaults.broadcast_capacity,
            ),
            heartbeat_interval_secs: parse_var(
                "AGORA_HEARTBEAT_SECS",
                var("AGORA_HEARTBEAT_SECS"),
                defaults.heartbeat_interval_secs,
            ),
            catalog_path: var("AGORA_CATALOG")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .or(defaults.catalog_path),
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub rejected_messages: u64,
    pub active_rooms: usize,
}

struct Gateway {
    config: ServerConfig,
    catalog: Arc<dyn PresentationCatalog>,
    rooms: Arc<RoomManager>,
    stats: Arc<RwLock<ServerStats>>,
}

/// The live gateway server.
pub struct LiveServer {
    gateway: Arc<Gateway>,
}

impl LiveServer {
    pub fn new(config: ServerConfig, catalog: Arc<dyn PresentationCatalog>) -> Self {
        let rooms = Arc::new(RoomManager::new(config.broadcast_capacity));
        Self {
            gateway: Arc::new(Gateway {
                config,
                catalog,
                rooms,
                stats: Arc::new(RwLock::new(ServerStats::default())),
            }),
        }
    }

    /// Accept WebSocket connections until the listener fails.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.gateway.config.bind_addr).await?;
        log::info!("Live server listening on {}", self.gateway.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let gateway = self.gateway.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, gateway).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    pub async fn stats(&self) -> ServerStats {
        let mut stats = self.gateway.stats.read().await.clone();
        stats.active_rooms = self.gateway.rooms.room_count().await;
        stats
    }

    pub fn bind_addr(&self) -> &str {
        &self.gateway.config.bind_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.gateway.config
    }

    pub fn room_manager(&self) -> &Arc<RoomManager> {
        &self.gateway.rooms
    }
}

/// Per-connection binding.
struct Session {
    id: Uuid,
    room: Option<Arc<PresentationRoom>>,
    role: Option<PeerRole>,
    rx: Option<broadcast::Receiver<Arc<Envelope>>>,
}

impl Session {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            room: None,
            role: None,
            rx: None,
        }
    }

    fn room(&self) -> LiveResult<Arc<PresentationRoom>> {
        self.room
            .clone()
            .ok_or_else(|| LiveError::unauthorized("Join a presentation first"))
    }

    /// Bound participant id; a payload id naming someone else is refused.
    fn participant(&self, claimed: Option<Uuid>) -> LiveResult<Uuid> {
        match self.role {
            Some(PeerRole::Participant(pid)) => match claimed {
                Some(other) if other != pid => {
                    Err(LiveError::unauthorized("Cannot act on behalf of another participant"))
                }
                _ => Ok(pid),
            },
            Some(PeerRole::Presenter) => Err(LiveError::unauthorized("The presenter cannot submit responses")),
            None => Err(LiveError::unauthorized("Join a presentation first")),
        }
    }

    /// Subscribe to the room. Called with the room locked so the receiver
    /// starts exactly after the state the connection is about to be shown.
    async fn attach(&mut self, room: &Arc<PresentationRoom>, role: PeerRole) {
        if self.rx.is_none() {
            self.rx = Some(room.broadcast().add_peer(PeerInfo::new(self.id, role)).await);
        }
        self.room = Some(room.clone());
        self.role = Some(role);
    }

    fn participant_id(&self) -> Option<Uuid> {
        match self.role {
            Some(PeerRole::Participant(pid)) => Some(pid),
            _ => None,
        }
    }
}

/// Deliver `fx`, then drop the room from the manager if it was torn down.
async fn settle(
    gateway: &Gateway,
    room: &Arc<PresentationRoom>,
    mut state: MutexGuard<'_, RoomState>,
    sender: Option<Uuid>,
    fx: Effects,
) {
    let teardown = room.apply(&mut state, &gateway.rooms, sender, fx);
    drop(state);
    if teardown {
        gateway.rooms.remove(&room.id()).await;
    }
}

fn resolve(gateway: &Gateway, access_code: Option<&str>, id: Option<Uuid>) -> LiveResult<Presentation> {
    let found = match (id, access_code) {
        (Some(id), _) => gateway.catalog.by_id(id),
        (None, Some(code)) => gateway.catalog.by_access_code(code),
        (None, None) => return Err(LiveError::validation("Missing access code")),
    };
    found.ok_or_else(|| LiveError::not_found("Presentation"))
}

/// Run one client event. `Ok(Some(notice))` is a reply that bypasses the
/// room (it is not part of any presentation's state).
async fn dispatch(gateway: &Gateway, session: &mut Session, event: ClientEvent) -> LiveResult<Option<Notice>> {
    match event {
        ClientEvent::Ping => Ok(Some(Notice::Pong { server_time: now_ms() })),

        ClientEvent::JoinPresentation {
            access_code,
            participant_id,
            resume_token,
            participant_name,
        } => {
            if session.room.is_some() {
                return Err(LiveError::validation("Connection already joined a presentation"));
            }
            let presentation = resolve(gateway, Some(&access_code), None)?;
            let room = gateway
                .rooms
                .get_or_create(presentation, gateway.config.max_participants_per_room)
                .await?;
            let mut state = room.lock().await?;
            let (pid, fx) = state
                .engine
                .join(participant_id, resume_token, &participant_name, now_ms())?;
            session.attach(&room, PeerRole::Participant(pid)).await;
            if let Some(stale) = state.bind_participant(pid, session.id) {
                log::debug!("Participant {pid} moved from connection {stale} to {}", session.id);
                room.broadcast().close(Audience::Connection(stale));
            }
            settle(gateway, &room, state, Some(session.id), fx).await;
            Ok(None)
        }

        ClientEvent::StartPresentation {
            access_code,
            presentation_id,
            presenter_token,
        } => {
            let presentation = resolve(gateway, access_code.as_deref(), presentation_id)?;
            if let Some(bound) = &session.room {
                if bound.id() != presentation.id || session.participant_id().is_some() {
                    return Err(LiveError::validation("Connection already joined a presentation"));
                }
            }
            let room = gateway
                .rooms
                .get_or_create(presentation, gateway.config.max_participants_per_room)
                .await?;
            let mut state = room.lock().await?;
            let fx = state.engine.start(&presenter_token, now_ms())?;
            session.attach(&room, PeerRole::Presenter).await;
            if let Some(previous) = state.bind_presenter(session.id) {
                log::info!(
                    "Presenter channel of {} moved from connection {previous} to {}",
                    room.id(),
                    session.id
                );
            }
            settle(gateway, &room, state, Some(session.id), fx).await;
            Ok(None)
        }

        event if event.is_presenter_command() => {
            let room = session.room()?;
            let mut state = room.lock().await?;
            if session.role != Some(PeerRole::Presenter) || state.presenter() != Some(session.id) {
                return Err(LiveError::unauthorized("Only the presenter can do that"));
            }
            let engine = &mut state.engine;
            let fx = match event {
                ClientEvent::ChangeSlide { index } => engine.goto(index)?,
                ClientEvent::NextSlide => engine.advance()?,
                ClientEvent::PreviousSlide => engine.back()?,
                ClientEvent::EndPresentation => engine.end()?,
                ClientEvent::StartQuiz { slide_id } => engine.start_quiz(slide_id, now_ms())?,
                ClientEvent::EndQuiz { slide_id } => engine.end_quiz(slide_id)?,
                ClientEvent::MarkQnaAnswered {
                    slide_id,
                    question_id,
                    answered,
                    answer_text,
                } => engine.mark_qna_answered(slide_id, &question_id, answered, answer_text)?,
                ClientEvent::SetQnaActiveQuestion { slide_id, question_id } => {
                    engine.set_qna_active(slide_id, question_id.as_deref())?
                }
                ClientEvent::ClearQnaQuestions { slide_id } => engine.clear_qna(slide_id)?,
                ClientEvent::UpdateQnaSettings { slide_id, allow_multiple } => {
                    engine.update_qna_settings(slide_id, allow_multiple)?
                }
                ClientEvent::ClearGuessResponses { slide_id } => engine.clear_guess(slide_id)?,
                ClientEvent::LockResponses { slide_id, locked } => engine.lock_responses(slide_id, locked)?,
                ClientEvent::KickParticipant { participant_id } => engine.kick(participant_id)?,
                ClientEvent::AdmitParticipant { participant_id } => engine.admit(participant_id)?,
                other => {
                    return Err(LiveError::Internal(format!(
                        "presenter command {other:?} has no handler"
                    )))
                }
            };
            settle(gateway, &room, state, Some(session.id), fx).await;
            Ok(None)
        }

        event => {
            let room = session.room()?;
            let mut state = room.lock().await?;
            let now = now_ms();
            let fx = match event {
                ClientEvent::SubmitResponse {
                    presentation_id,
                    slide_id,
                    participant_id,
                    answer,
                } => {
                    if presentation_id.is_some_and(|id| id != room.id()) {
                        return Err(LiveError::not_found("Presentation"));
                    }
                    let pid = session.participant(participant_id)?;
                    state.engine.submit(pid, slide_id, answer, now)?
                }
                ClientEvent::SubmitQnaQuestion {
                    slide_id,
                    participant_id,
                    question,
                } => {
                    let pid = session.participant(participant_id)?;
                    state.engine.submit(pid, slide_id, Answer::Text(question), now)?
                }
                ClientEvent::SubmitGuess {
                    slide_id,
                    participant_id,
                    guess,
                } => {
                    let pid = session.participant(participant_id)?;
                    state.engine.submit(pid, slide_id, Answer::Number(guess), now)?
                }
                ClientEvent::SubmitQuizAnswer {
                    slide_id,
                    participant_id,
                    answer,
                } => {
                    let pid = session.participant(participant_id)?;
                    state.engine.submit(pid, slide_id, Answer::Option(answer), now)?
                }
                ClientEvent::VoteOpenEndedResponse { slide_id, response_id } => {
                    let pid = session.participant(None)?;
                    state.engine.vote(pid, slide_id, &response_id)?
                }
                ClientEvent::RequestQnaState { slide_id } => state.engine.qna_state(slide_id)?,
                ClientEvent::RequestLeaderboard { quiz_id } => state.engine.leaderboard(quiz_id)?,
                other => {
                    return Err(LiveError::Internal(format!("event {other:?} has no handler")));
                }
            };
            settle(gateway, &room, state, Some(session.id), fx).await;
            Ok(None)
        }
    }
}

/// Full state for a connection whose receiver lagged. The receiver is
/// replaced while the room is locked so nothing older than the snapshot is
/// delivered afterwards.
async fn resync(session: &mut Session) -> Option<String> {
    let room = session.room.clone()?;
    let state = room.lock().await.ok()?;
    session.rx = Some(room.broadcast().subscribe());
    let notice = match state.engine.resync(session.participant_id()) {
        Ok(notice) => notice,
        Err(e) => {
            log::warn!("Cannot resync connection {}: {e}", session.id);
            return None;
        }
    };
    match encode_notice(&notice, state.engine.generation()) {
        Ok(text) => Some(text),
        Err(e) => {
            log::error!("Failed to encode resync frame: {e}");
            None
        }
    }
}

/// Count the frames a lagging receiver skipped and replace them with one
/// full-state frame.
async fn recover_from_lag(session: &mut Session, skipped: u64) -> Option<String> {
    log::warn!("Connection {} lagged by {skipped} frames, resyncing", session.id);
    if let Some(room) = &session.room {
        room.broadcast().record_lag(skipped);
    }
    resync(session).await
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Handle a single WebSocket connection.
async fn handle_connection(stream: TcpStream, addr: SocketAddr, gateway: Arc<Gateway>) -> Result<(), BoxError> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let mut session = Session::new();

    log::info!("WebSocket connection {} established from {addr}", session.id);
    {
        let mut s = gateway.stats.write().await;
        s.total_connections += 1;
        s.active_connections += 1;
    }

    let result = pump(ws_stream, addr, &gateway, &mut session).await;

    // Cleanup: detach from the room.
    if let Some(room) = session.room.take() {
        room.broadcast().remove_peer(&session.id).await;
        if let Ok(mut state) = room.lock().await {
            let fx = match session.role {
                Some(PeerRole::Participant(pid)) if state.release_participant(pid, session.id) => {
                    log::info!("Participant {pid} disconnected from {}", room.id());
                    state.engine.disconnect(pid)
                }
                Some(PeerRole::Presenter) => {
                    if state.release_presenter(session.id) {
                        log::info!("Presenter disconnected from {}", room.id());
                    }
                    Effects::new()
                }
                _ => Effects::new(),
            };
            settle(&gateway, &room, state, None, fx).await;
        }
        if gateway.rooms.remove_if_empty(&room.id()).await {
            log::info!("Room {} removed (empty)", room.id());
        }
    }
    {
        let mut s = gateway.stats.write().await;
        s.active_connections = s.active_connections.saturating_sub(1);
    }

    result
}

/// Answer an event that failed. Returns the error frame to send, or `None`
/// when the failure tore the room down instead.
async fn reject(gateway: &Gateway, session: &Session, err: LiveError) -> Option<Notice> {
    gateway.stats.write().await.rejected_messages += 1;
    if err.is_fatal() {
        if let Some(room) = &session.room {
            let mut state = room.lock_unchecked().await;
            let teardown = room.fail(&mut state, &err);
            drop(state);
            if teardown {
                gateway.rooms.remove(&room.id()).await;
            }
            return None;
        }
    }
    Some(Notice::error(&err))
}

async fn pump(
    ws_stream: WebSocketStream<TcpStream>,
    addr: SocketAddr,
    gateway: &Gateway,
    session: &mut Session,
) -> Result<(), BoxError> {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let period = Duration::from_secs(gateway.config.heartbeat_interval_secs.max(1));
    let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        tokio::select! {
            // Incoming event
            msg = ws_receiver.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => text,
                        Err(_) => {
                            log::warn!("Dropping non UTF-8 binary frame from {addr}");
                            continue;
                        }
                    },
                    Some(Ok(Message::Ping(data))) => {
                        ws_sender.send(Message::Pong(data)).await?;
                        continue;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        log::info!("Connection closed from {addr}");
                        break;
                    }
                    Some(Err(e)) => {
                        log::error!("WebSocket error from {addr}: {e}");
                        break;
                    }
                    _ => continue,
                };
                {
                    let mut s = gateway.stats.write().await;
                    s.total_messages += 1;
                    s.total_bytes += text.len() as u64;
                }

                let outcome = match ClientEvent::decode(&text) {
                    Ok(event) => {
                        log::debug!("Connection {} sent {event:?}", session.id);
                        dispatch(gateway, session, event).await
                    }
                    Err(e) => {
                        log::warn!("Failed to decode message from {addr}: {e}");
                        Err(LiveError::validation(format!("Malformed event: {e}")))
                    }
                };
                let reply = match outcome {
                    Ok(None) => continue,
                    Ok(Some(notice)) => notice,
                    Err(err) => match reject(gateway, session, err).await {
                        Some(notice) => notice,
                        None => continue,
                    },
                };
                let generation = match &session.room {
                    Some(room) => room.lock_unchecked().await.engine.generation(),
                    None => 0,
                };
                let frame = encode_notice(&reply, generation)?;
                ws_sender.send(Message::Text(frame.into())).await?;
            }

            // Outgoing room frame
            envelope = async {
                match session.rx.as_mut() {
                    Some(rx) => rx.recv().await,
                    None => std::future::pending().await,
                }
            } => {
                match envelope {
                    Ok(envelope) => {
                        if !envelope.is_for(session.id) {
                            continue;
                        }
                        match &envelope.payload {
                            Payload::Text(text) => {
                                ws_sender.send(Message::Text(text.as_str().to_owned().into())).await?;
                            }
                            Payload::Close => {
                                log::debug!("Closing connection {} on request of its room", session.id);
                                ws_sender.send(Message::Close(None)).await?;
                                break;
                            }
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        if let Some(frame) = recover_from_lag(session, n).await {
                            ws_sender.send(Message::Text(frame.into())).await?;
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            _ = heartbeat.tick() => {
                ws_sender.send(Message::Ping(Vec::new().into())).await?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::protocol::Frame;
    use agora_core::{Slide, SlideKind};
    use tokio::sync::broadcast::error::TryRecvError;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        assert_eq!(config.max_participants_per_room, 100);
        assert_eq!(config.broadcast_capacity, 256);
        assert_eq!(config.heartbeat_interval_secs, 30);
        assert!(config.catalog_path.is_none());
    }

    #[test]
    fn test_config_from_vars() {
        let config = ServerConfig::from_vars(|name| match name {
            "AGORA_BIND_ADDR" => Some("0.0.0.0:8080".into()),
            "AGORA_MAX_PARTICIPANTS" => Some("50".into()),
            "AGORA_HEARTBEAT_SECS" => Some("not-a-number".into()),
            "AGORA_CATALOG" => Some("/srv/decks.json".into()),
            _ => None,
        });
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.max_participants_per_room, 50);
        assert_eq!(config.broadcast_capacity, 256);
        assert_eq!(config.heartbeat_interval_secs, 30);
        assert_eq!(config.catalog_path, Some(PathBuf::from("/srv/decks.json")));
    }

    #[test]
    fn test_server_creation() {
        let server = LiveServer::new(ServerConfig::default(), Arc::new(MemoryCatalog::new()));
        assert_eq!(server.bind_addr(), "127.0.0.1:9090");
    }

    #[tokio::test]
    async fn test_server_stats_initial() {
        let server = LiveServer::new(ServerConfig::default(), Arc::new(MemoryCatalog::new()));
        let stats = server.stats().await;
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.total_messages, 0);
        assert_eq!(stats.rejected_messages, 0);
        assert_eq!(stats.active_rooms, 0);
    }

    #[test]
    fn test_session_refuses_impersonation() {
        let mut session = Session::new();
        assert!(session.participant(None).is_err());

        let me = Uuid::new_v4();
        session.role = Some(PeerRole::Participant(me));
        assert_eq!(session.participant(None), Ok(me));
        assert_eq!(session.participant(Some(me)), Ok(me));
        assert!(matches!(
            session.participant(Some(Uuid::new_v4())),
            Err(LiveError::Authorization(_))
        ));

        session.role = Some(PeerRole::Presenter);
        assert!(session.participant(None).is_err());
    }

    #[tokio::test]
    async fn test_lagged_connection_gets_full_state() {
        let slide = Slide::new(
            "Pick",
            SlideKind::MultipleChoice { options: vec!["A".into(), "B".into()], allow_multiple: false },
        );
        let slide_id = slide.id;
        let presentation = Presentation {
            id: Uuid::new_v4(),
            title: "Deck".into(),
            access_code: "LAG001".into(),
            presenter_token: "secret".into(),
            slides: vec![slide],
        };
        let rooms = Arc::new(RoomManager::new(2));
        let room = rooms.get_or_create(presentation, 10).await.unwrap();
        let mut session = Session::new();
        {
            let mut state = room.lock().await.unwrap();
            let fx = state.engine.start("secret", 0).unwrap();
            room.apply(&mut state, &rooms, None, fx);
            let (pid, fx) = state.engine.join(None, None, "Slow", 1).unwrap();
            session.attach(&room, PeerRole::Participant(pid)).await;
            state.bind_participant(pid, session.id);
            room.apply(&mut state, &rooms, Some(session.id), fx);
            for n in 0..5 {
                let (other, _) = state.engine.join(None, None, &format!("Fast {n}"), 2).unwrap();
                let fx = state.engine.submit(other, slide_id, Answer::Choice(vec!["A".into()]), 3).unwrap();
                room.apply(&mut state, &rooms, None, fx);
            }
        }

        let rx = session.rx.as_mut().unwrap();
        let Err(RecvError::Lagged(skipped)) = rx.recv().await else {
            panic!("expected the receiver to lag");
        };
        let text = recover_from_lag(&mut session, skipped).await.unwrap();
        let frame = Frame::decode(&text).unwrap();
        let Notice::JoinedPresentation(state) = frame.notice else {
            panic!("expected joined-presentation");
        };
        assert!(state.rejoined);
        assert_eq!(state.aggregate_snapshot.map(|s| s.votes_for("A")), Some(5));

        assert!(matches!(session.rx.as_mut().unwrap().try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(room.broadcast().stats().await.messages_dropped, skipped);
    }
}
