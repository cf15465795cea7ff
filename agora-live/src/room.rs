//! Presentation rooms.
//!
//! ```text
//!   connection ──▸ PresentationRoom ──────────────────────────────────┐
//!                   │ Mutex<RoomState>                                │
//!                   │   LivePresentation (engine)                     │
//!                   │   presenter connection, participant → connection│
//!                   │   quiz timer                                    │
//!                   └─ BroadcastGroup ──▸ every connection of the room│
//! ```
//!
//! All commands of a presentation run under the room's mutex, and every
//! resulting frame is pushed into the broadcast channel before the mutex is
//! released, so frame order on the wire follows state order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agora_core::{Action, Effects, LiveError, LivePresentation, LiveResult, Notice, Presentation, Recipient};
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tokio::task::AbortHandle;
use uuid::Uuid;

use crate::broadcast::{Audience, BroadcastGroup};
use crate::protocol::encode_notice;

/// Wall clock in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub struct RoomState {
    pub engine: LivePresentation,
    presenter: Option<Uuid>,
    participants: HashMap<Uuid, Uuid>,
    quiz_timer: Option<AbortHandle>,
}

impl RoomState {
    fn new(engine: LivePresentation) -> Self {
        Self {
            engine,
            presenter: None,
            participants: HashMap::new(),
            quiz_timer: None,
        }
    }

    pub fn presenter(&self) -> Option<Uuid> {
        self.presenter
    }

    /// Make `connection_id` the presenter channel; returns the replaced one.
    pub fn bind_presenter(&mut self, connection_id: Uuid) -> Option<Uuid> {
        self.presenter.replace(connection_id).filter(|old| *old != connection_id)
    }

    pub fn release_presenter(&mut self, connection_id: Uuid) -> bool {
        if self.presenter == Some(connection_id) {
            self.presenter = None;
            return true;
        }
        false
    }

    /// Route a participant's notices to `connection_id`; returns the
    /// connection it replaces (a stale socket of the same participant).
    pub fn bind_participant(&mut self, participant_id: Uuid, connection_id: Uuid) -> Option<Uuid> {
        self.participants
            .insert(participant_id, connection_id)
            .filter(|old| *old != connection_id)
    }

    /// Forget the mapping if it still points at `connection_id`.
    pub fn release_participant(&mut self, participant_id: Uuid, connection_id: Uuid) -> bool {
        if self.participants.get(&participant_id) == Some(&connection_id) {
            self.participants.remove(&participant_id);
            return true;
        }
        false
    }

    pub fn connection_of(&self, participant_id: Uuid) -> Option<Uuid> {
        self.participants.get(&participant_id).copied()
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.quiz_timer.take() {
            timer.abort();
        }
    }
}

pub struct PresentationRoom {
    id: Uuid,
    state: Mutex<RoomState>,
    broadcast: BroadcastGroup,
    closed: AtomicBool,
}

impl PresentationRoom {
    pub fn new(engine: LivePresentation, broadcast_capacity: usize) -> Self {
        Self {
            id: engine.id(),
            state: Mutex::new(RoomState::new(engine)),
            broadcast: BroadcastGroup::new(broadcast_capacity),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn broadcast(&self) -> &BroadcastGroup {
        &self.broadcast
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Lock the room for one command. A torn down room rejects commands.
    pub async fn lock(&self) -> LiveResult<MutexGuard<'_, RoomState>> {
        let state = self.state.lock().await;
        if self.is_closed() {
            return Err(LiveError::closed("Presentation has ended"));
        }
        Ok(state)
    }

    /// Lock even a torn down room, to read its final state.
    pub async fn lock_unchecked(&self) -> MutexGuard<'_, RoomState> {
        self.state.lock().await
    }

    /// Deliver `fx` and carry out its actions. `sender` is the connection
    /// that issued the command, if any. Returns `true` when the room was
    /// torn down and must be dropped from the manager.
    pub fn apply(
        self: &Arc<Self>,
        state: &mut RoomState,
        rooms: &Arc<RoomManager>,
        sender: Option<Uuid>,
        fx: Effects,
    ) -> bool {
        let generation = state.engine.generation();
        for dispatch in &fx.dispatches {
            let audience = match dispatch.to {
                Recipient::Room => Some(Audience::Everyone),
                Recipient::Sender => sender.map(Audience::Connection),
                Recipient::Presenter => state.presenter.map(Audience::Connection),
                Recipient::Participant(pid) => state.connection_of(pid).map(Audience::Connection),
            };
            let Some(audience) = audience else {
                log::trace!(
                    "No connection for {:?}, dropping {}",
                    dispatch.to,
                    dispatch.notice.event_name()
                );
                continue;
            };
            match encode_notice(&dispatch.notice, generation) {
                Ok(text) => {
                    let reached = self.broadcast.deliver(audience, Arc::new(text));
                    log::trace!(
                        "{} → {audience:?} ({reached} receivers)",
                        dispatch.notice.event_name()
                    );
                }
                Err(e) => log::error!("Failed to encode {}: {e}", dispatch.notice.event_name()),
            }
        }

        let mut teardown = false;
        for action in fx.actions {
            match action {
                Action::Disconnect(pid) => {
                    if let Some(connection) = state.participants.remove(&pid) {
                        self.broadcast.close(Audience::Connection(connection));
                    }
                }
                Action::ScheduleQuizClose {
                    slide_id,
                    generation,
                    after_ms,
                } => {
                    state.cancel_timer();
                    state.quiz_timer = Some(self.spawn_quiz_timer(rooms.clone(), slide_id, generation, after_ms));
                }
                Action::CancelQuizTimer => state.cancel_timer(),
                Action::Teardown => teardown = true,
            }
        }
        if teardown {
            self.close(state);
        }
        teardown
    }

    fn spawn_quiz_timer(
        self: &Arc<Self>,
        rooms: Arc<RoomManager>,
        slide_id: Uuid,
        generation: u64,
        after_ms: u64,
    ) -> AbortHandle {
        let room = self.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(after_ms)).await;
            let Ok(mut state) = room.lock().await else {
                return;
            };
            state.quiz_timer = None;
            let teardown = match state.engine.expire_quiz(slide_id, generation) {
                Ok(fx) => room.apply(&mut state, &rooms, None, fx),
                Err(e) => room.fail(&mut state, &e),
            };
            drop(state);
            if teardown {
                rooms.remove(&room.id).await;
            }
        });
        task.abort_handle()
    }

    /// Handle an error raised while running a command. Recoverable errors
    /// are the caller's to report; an internal error ends this room only.
    /// Returns `true` when the room was torn down.
    pub fn fail(&self, state: &mut RoomState, err: &LiveError) -> bool {
        if !err.is_fatal() {
            log::debug!("Presentation {} rejected a command: {err}", self.id);
            return false;
        }
        log::error!("Presentation {} hit an internal error, tearing down: {err}", self.id);
        let notice = Notice::PresentationEnded {
            presentation_id: self.id,
            message: "This presentation stopped unexpectedly".to_string(),
        };
        match encode_notice(&notice, state.engine.generation()) {
            Ok(text) => {
                self.broadcast.deliver(Audience::Everyone, Arc::new(text));
            }
            Err(e) => log::error!("Failed to encode presentation-ended: {e}"),
        }
        self.close(state);
        true
    }

    fn close(&self, state: &mut RoomState) {
        state.cancel_timer();
        state.participants.clear();
        state.presenter = None;
        self.closed.store(true, Ordering::Release);
        self.broadcast.close(Audience::Everyone);
        log::info!("Room {} closed", self.id);
    }
}

/// Maps presentation ids to rooms.
pub struct RoomManager {
    rooms: Arc<RwLock<HashMap<Uuid, Arc<PresentationRoom>>>>,
    broadcast_capacity: usize,
}

impl RoomManager {
    pub fn new(broadcast_capacity: usize) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            broadcast_capacity,
        }
    }

    /// Room for `presentation`, loading a fresh runtime when none is open.
    pub async fn get_or_create(
        &self,
        presentation: Presentation,
        max_participants: usize,
    ) -> LiveResult<Arc<PresentationRoom>> {
        let id = presentation.id;
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(&id).filter(|r| !r.is_closed()) {
                return Ok(room.clone());
            }
        }

        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(&id).filter(|r| !r.is_closed()) {
            return Ok(room.clone());
        }
        let engine = LivePresentation::new(presentation, Some(max_participants))?;
        let room = Arc::new(PresentationRoom::new(engine, self.broadcast_capacity));
        rooms.insert(id, room.clone());
        log::info!("Opened room for presentation {id}");
        Ok(room)
    }

    pub async fn get(&self, id: &Uuid) -> Option<Arc<PresentationRoom>> {
        self.rooms.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &Uuid) -> bool {
        let mut rooms = self.rooms.write().await;
        match rooms.get(id) {
            Some(room) if room.is_closed() => rooms.remove(id).is_some(),
            _ => false,
        }
    }

    /// Drop a closed room once its last connection has gone.
    pub async fn remove_if_empty(&self, id: &Uuid) -> bool {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(id) {
            if room.is_closed() && room.broadcast().peer_count().await == 0 {
                rooms.remove(id);
                return true;
            }
        }
        false
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn active_presentations(&self) -> Vec<Uuid> {
        self.rooms.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::{Payload, PeerInfo, PeerRole};
    use crate::protocol::Frame;
    use agora_core::{Slide, SlideKind};

    fn presentation() -> Presentation {
        Presentation {
            id: Uuid::new_v4(),
            title: "Deck".into(),
            access_code: "ROOM42".into(),
            presenter_token: "secret".into(),
            slides: vec![Slide::new(
                "Pick",
                SlideKind::MultipleChoice { options: vec!["A".into(), "B".into()], allow_multiple: false },
            )],
        }
    }

    async fn next_frame(rx: &mut tokio::sync::broadcast::Receiver<Arc<crate::broadcast::Envelope>>) -> Frame {
        let env = rx.recv().await.unwrap();
        match &env.payload {
            Payload::Text(text) => Frame::decode(text).unwrap(),
            Payload::Close => panic!("unexpected close"),
        }
    }

    #[tokio::test]
    async fn test_room_manager_get_or_create() {
        let manager = RoomManager::new(16);
        let p = presentation();
        let a = manager.get_or_create(p.clone(), 10).await.unwrap();
        let b = manager.get_or_create(p, 10).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(manager.room_count().await, 1);
    }

    #[tokio::test]
    async fn test_open_rooms_are_not_removed() {
        let manager = RoomManager::new(16);
        let p = presentation();
        let room = manager.get_or_create(p.clone(), 10).await.unwrap();
        assert!(!manager.remove_if_empty(&p.id).await);
        assert!(!manager.remove(&p.id).await);
        assert_eq!(manager.active_presentations().await, vec![room.id()]);
    }

    #[tokio::test]
    async fn test_apply_routes_sender_and_room() {
        let manager = Arc::new(RoomManager::new(16));
        let room = manager.get_or_create(presentation(), 10).await.unwrap();
        let presenter = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut presenter_rx = room.broadcast().add_peer(PeerInfo::new(presenter, PeerRole::Presenter)).await;

        let mut state = room.lock().await.unwrap();
        state.bind_presenter(presenter);
        let fx = state.engine.start("secret", now_ms()).unwrap();
        assert!(!room.apply(&mut state, &manager, Some(presenter), fx));
        drop(state);

        let live = next_frame(&mut presenter_rx).await;
        assert_eq!(live.event_name(), "presentation-live");
        assert_eq!(live.generation, 1);
        let env = presenter_rx.recv().await.unwrap();
        assert!(env.is_for(presenter));
        assert!(!env.is_for(other));
    }

    #[tokio::test]
    async fn test_end_tears_down_and_closes_everyone() {
        let manager = Arc::new(RoomManager::new(16));
        let p = presentation();
        let room = manager.get_or_create(p.clone(), 10).await.unwrap();
        let mut rx = room.broadcast().add_peer(PeerInfo::new(Uuid::new_v4(), PeerRole::Presenter)).await;

        let mut state = room.lock().await.unwrap();
        state.engine.start("secret", now_ms()).unwrap();
        let fx = state.engine.end().unwrap();
        assert!(room.apply(&mut state, &manager, None, fx));
        drop(state);

        assert_eq!(next_frame(&mut rx).await.event_name(), "presentation-ended");
        assert_eq!(rx.recv().await.unwrap().payload, Payload::Close);
        assert!(room.lock().await.is_err());
        assert!(manager.remove(&p.id).await);

        // A later join opens a fresh runtime.
        let fresh = manager.get_or_create(p, 10).await.unwrap();
        assert!(!Arc::ptr_eq(&room, &fresh));
    }

    #[tokio::test]
    async fn test_internal_error_tears_down_room_only() {
        let manager = Arc::new(RoomManager::new(16));
        let a = manager.get_or_create(presentation(), 10).await.unwrap();
        let b = manager.get_or_create(presentation(), 10).await.unwrap();

        let mut state = a.lock().await.unwrap();
        assert!(!a.fail(&mut state, &LiveError::validation("bad input")));
        assert!(a.fail(&mut state, &LiveError::Internal("corrupt".into())));
        drop(state);

        assert!(a.is_closed());
        assert!(!b.is_closed());
        assert!(b.lock().await.is_ok());
    }

    #[test]
    fn test_participant_binding() {
        let engine = LivePresentation::new(presentation(), None).unwrap();
        let mut state = RoomState::new(engine);
        let pid = Uuid::new_v4();
        let (c1, c2) = (Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(state.bind_participant(pid, c1), None);
        assert_eq!(state.bind_participant(pid, c2), Some(c1));
        assert!(!state.release_participant(pid, c1));
        assert_eq!(state.connection_of(pid), Some(c2));
        assert!(state.release_participant(pid, c2));
        assert_eq!(state.connection_of(pid), None);
    }
}
