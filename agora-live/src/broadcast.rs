//! Room fan-out with backpressure.
//!
//! Uses one tokio broadcast channel per presentation. Every outbound frame of
//! a room, including frames addressed to a single connection, goes through
//! the same channel so each connection observes one ordered stream; a
//! connection skips envelopes addressed to someone else.
//!
//! Each receiver buffers up to `capacity` envelopes. A receiver that falls
//! further behind gets `Lagged` and must be resynchronised with full state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

/// What a connection is inside its room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    Participant(Uuid),
    Presenter,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub connection_id: Uuid,
    pub role: PeerRole,
}

impl PeerInfo {
    pub fn new(connection_id: Uuid, role: PeerRole) -> Self {
        Self { connection_id, role }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Everyone,
    Connection(Uuid),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Pre-encoded text frame.
    Text(Arc<String>),
    /// Close the connection once everything before this has been sent.
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub audience: Audience,
    pub payload: Payload,
}

impl Envelope {
    pub fn is_for(&self, connection_id: Uuid) -> bool {
        match self.audience {
            Audience::Everyone => true,
            Audience::Connection(id) => id == connection_id,
        }
    }
}

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub active_peers: usize,
}

struct AtomicBroadcastStats {
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

impl AtomicBroadcastStats {
    fn new() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        }
    }
}

/// Broadcast group for a single presentation room.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Arc<Envelope>>,
    peers: Arc<RwLock<HashMap<Uuid, PeerInfo>>>,
    capacity: usize,
    atomic_stats: Arc<AtomicBroadcastStats>,
}

impl BroadcastGroup {
    /// `capacity` is how many envelopes a receiver may fall behind before
    /// it lags.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            peers: Arc::new(RwLock::new(HashMap::new())),
            capacity,
            atomic_stats: Arc::new(AtomicBroadcastStats::new()),
        }
    }

    /// Register a connection and return its receiver. Only envelopes sent
    /// after this call are observed.
    pub async fn add_peer(&self, info: PeerInfo) -> broadcast::Receiver<Arc<Envelope>> {
        let mut peers = self.peers.write().await;
        peers.insert(info.connection_id, info);
        self.sender.subscribe()
    }

    pub async fn remove_peer(&self, connection_id: &Uuid) -> Option<PeerInfo> {
        let mut peers = self.peers.write().await;
        peers.remove(connection_id)
    }

    /// Returns the number of receivers the envelope reached.
    pub fn send(&self, envelope: Envelope) -> usize {
        let count = self.sender.send(Arc::new(envelope)).unwrap_or(0);
        self.atomic_stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    pub fn deliver(&self, audience: Audience, text: Arc<String>) -> usize {
        self.send(Envelope {
            audience,
            payload: Payload::Text(text),
        })
    }

    pub fn close(&self, audience: Audience) -> usize {
        self.send(Envelope {
            audience,
            payload: Payload::Close,
        })
    }

    /// Account for envelopes a lagging receiver skipped.
    pub fn record_lag(&self, skipped: u64) {
        self.atomic_stats.messages_dropped.fetch_add(skipped, Ordering::Relaxed);
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn peers(&self) -> Vec<PeerInfo> {
        self.peers.read().await.values().cloned().collect()
    }

    pub async fn has_peer(&self, connection_id: &Uuid) -> bool {
        self.peers.read().await.contains_key(connection_id)
    }

    pub async fn stats(&self) -> BroadcastStats {
        let peers = self.peers.read().await;
        BroadcastStats {
            messages_sent: self.atomic_stats.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.atomic_stats.messages_dropped.load(Ordering::Relaxed),
            active_peers: peers.len(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fresh receiver, used to restart a lagging connection.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Envelope>> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participant() -> PeerInfo {
        PeerInfo::new(Uuid::new_v4(), PeerRole::Participant(Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_broadcast_group_add_remove() {
        let group = BroadcastGroup::new(16);
        let peer = participant();
        let id = peer.connection_id;

        let _rx = group.add_peer(peer).await;
        assert_eq!(group.peer_count().await, 1);
        assert!(group.has_peer(&id).await);

        group.remove_peer(&id).await;
        assert_eq!(group.peer_count().await, 0);
        assert!(!group.has_peer(&id).await);
    }

    #[tokio::test]
    async fn test_fan_out_reaches_every_receiver() {
        let group = BroadcastGroup::new(16);
        let mut rx1 = group.add_peer(participant()).await;
        let mut rx2 = group.add_peer(participant()).await;
        let mut rx3 = group.add_peer(PeerInfo::new(Uuid::new_v4(), PeerRole::Presenter)).await;

        let count = group.deliver(Audience::Everyone, Arc::new("hello".into()));
        assert_eq!(count, 3);

        for rx in [&mut rx1, &mut rx2, &mut rx3] {
            let env = rx.recv().await.unwrap();
            assert_eq!(env.payload, Payload::Text(Arc::new("hello".into())));
        }
    }

    #[tokio::test]
    async fn test_addressed_envelopes_are_filtered_by_receiver() {
        let group = BroadcastGroup::new(16);
        let alice = participant();
        let bob = participant();
        let mut rx = group.add_peer(alice.clone()).await;
        let _bob_rx = group.add_peer(bob.clone()).await;

        group.deliver(Audience::Connection(bob.connection_id), Arc::new("for bob".into()));
        group.close(Audience::Connection(alice.connection_id));

        let first = rx.recv().await.unwrap();
        assert!(!first.is_for(alice.connection_id));
        let second = rx.recv().await.unwrap();
        assert!(second.is_for(alice.connection_id));
        assert_eq!(second.payload, Payload::Close);
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_only_new_envelopes() {
        let group = BroadcastGroup::new(16);
        let _early = group.add_peer(participant()).await;
        group.deliver(Audience::Everyone, Arc::new("old".into()));

        let mut late = group.add_peer(participant()).await;
        group.deliver(Audience::Everyone, Arc::new("new".into()));
        let env = late.recv().await.unwrap();
        assert_eq!(env.payload, Payload::Text(Arc::new("new".into())));
    }

    #[tokio::test]
    async fn test_lagging_receiver_reports_skipped() {
        let group = BroadcastGroup::new(2);
        let mut rx = group.add_peer(participant()).await;
        for i in 0..5 {
            group.deliver(Audience::Everyone, Arc::new(format!("{i}")));
        }
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(n)) => {
                group.record_lag(n);
                assert_eq!(n, 3);
            }
            other => panic!("expected lag, got {other:?}"),
        }
        let stats = group.stats().await;
        assert_eq!(stats.messages_sent, 5);
        assert_eq!(stats.messages_dropped, 3);
        assert_eq!(stats.active_peers, 1);
    }

    #[tokio::test]
    async fn test_broadcast_capacity() {
        let group = BroadcastGroup::new(32);
        assert_eq!(group.capacity(), 32);
    }
}
