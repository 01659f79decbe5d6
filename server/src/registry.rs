//! Connection sessions and the process-wide client registry.
//!
//! A [`ClientSession`] owns one client's socket write half behind an async
//! lock, so concurrent broadcasts and direct replies never interleave
//! partial frames. The [`ClientRegistry`] maps live player ids to sessions
//! and is mutated only on connect, disconnect and broadcast-failure pruning;
//! everything that iterates it works on a snapshot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use log::debug;
use shared::protocol::PlayerState;
use shared::{write_message, Color, Message, PLAYER_PALETTE};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, RwLock};

/// One connected player's outbound half and liveness state.
///
/// Exactly one session exists per connected player; the registry entry holds
/// the only long-lived reference besides the connection task itself.
pub struct ClientSession {
    id: u32,
    color: Color,
    writer: Mutex<OwnedWriteHalf>,
    alive: AtomicBool,
    departed: AtomicBool,
}

impl ClientSession {
    pub fn new(id: u32, color: Color, writer: OwnedWriteHalf) -> Self {
        Self {
            id,
            color,
            writer: Mutex::new(writer),
            alive: AtomicBool::new(true),
            departed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn color(&self) -> Color {
        self.color
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn mark_dead(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    /// Returns true exactly once, for whichever caller gets to run the
    /// session's disconnect cleanup.
    pub fn begin_departure(&self) -> bool {
        !self.departed.swap(true, Ordering::SeqCst)
    }

    /// Writes one message under the session's exclusive write lock.
    ///
    /// Any transport error marks the session dead and returns false; errors
    /// never propagate to the caller. A session already marked dead is
    /// skipped without touching the socket.
    pub async fn send(&self, message: &Message) -> bool {
        if !self.is_alive() {
            return false;
        }
        let mut writer = self.writer.lock().await;
        match write_message(&mut *writer, message).await {
            Ok(()) => true,
            Err(e) => {
                self.mark_dead();
                debug!("write to client {} failed: {}", self.id, e);
                false
            }
        }
    }
}

/// Mapping of player id to active session, plus each player's last known
/// runtime state for late-joiner replay.
///
/// Identity assignment lives here too: ids come from a monotonic counter and
/// are never reused while the process runs; colors are drawn round-robin
/// from the shared palette.
pub struct ClientRegistry {
    sessions: RwLock<HashMap<u32, Arc<ClientSession>>>,
    states: RwLock<HashMap<u32, PlayerState>>,
    next_id: AtomicU32,
    next_color: AtomicUsize,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            states: RwLock::new(HashMap::new()),
            next_id: AtomicU32::new(1),
            next_color: AtomicUsize::new(0),
        }
    }

    /// Assigns a fresh player id and the next palette color.
    pub fn allocate_identity(&self) -> (u32, Color) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let color_index = self.next_color.fetch_add(1, Ordering::SeqCst);
        (id, PLAYER_PALETTE[color_index % PLAYER_PALETTE.len()])
    }

    pub async fn insert(&self, session: Arc<ClientSession>) {
        self.sessions.write().await.insert(session.id(), session);
    }

    /// Removes a session and its cached state. Removing an id that is
    /// already gone is a no-op, so disconnect cleanup stays idempotent.
    pub async fn remove(&self, id: u32) -> Option<Arc<ClientSession>> {
        self.states.write().await.remove(&id);
        self.sessions.write().await.remove(&id)
    }

    pub async fn get(&self, id: u32) -> Option<Arc<ClientSession>> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// Clones the current session set. Broadcast and replay iterate this
    /// snapshot so entries can be removed concurrently without racing the
    /// iteration.
    pub async fn snapshot(&self) -> Vec<Arc<ClientSession>> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Records a player's latest runtime state, overwriting the previous one.
    pub async fn record_state(&self, state: PlayerState) {
        self.states.write().await.insert(state.player_id, state);
    }

    pub async fn last_state(&self, id: u32) -> Option<PlayerState> {
        self.states.read().await.get(&id).copied()
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds a real loopback session plus the peer end of its socket. Used by
/// unit tests across the crate.
#[cfg(test)]
pub(crate) async fn loopback_session(
    id: u32,
    color: Color,
) -> (Arc<ClientSession>, tokio::net::TcpStream) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let peer = tokio::net::TcpStream::connect(addr).await.unwrap();
    let (accepted, _) = listener.accept().await.unwrap();
    let (_, writer) = accepted.into_split();
    (Arc::new(ClientSession::new(id, color, writer)), peer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_identity_allocation_is_sequential() {
        let registry = ClientRegistry::new();
        let (id1, _) = registry.allocate_identity();
        let (id2, _) = registry.allocate_identity();
        let (id3, _) = registry.allocate_identity();

        assert_eq!(id1, 1);
        assert_eq!(id2, 2);
        assert_eq!(id3, 3);
    }

    #[test]
    fn test_palette_wraps_round_robin() {
        let registry = ClientRegistry::new();
        let first_cycle: Vec<Color> = (0..PLAYER_PALETTE.len())
            .map(|_| registry.allocate_identity().1)
            .collect();

        assert_eq!(first_cycle, PLAYER_PALETTE.to_vec());

        // The next allocation wraps back to the first color
        let (_, wrapped) = registry.allocate_identity();
        assert_eq!(wrapped, PLAYER_PALETTE[0]);
    }

    #[tokio::test]
    async fn test_insert_remove_lifecycle() {
        let registry = ClientRegistry::new();
        let (session, _peer) = loopback_session(1, PLAYER_PALETTE[0]).await;

        registry.insert(Arc::clone(&session)).await;
        assert_eq!(registry.len().await, 1);
        assert!(registry.get(1).await.is_some());

        let removed = registry.remove(1).await;
        assert!(removed.is_some());
        assert!(registry.is_empty().await);

        // Second removal of the same id is a no-op
        assert!(registry.remove(1).await.is_none());
    }

    #[tokio::test]
    async fn test_snapshot_reflects_membership() {
        let registry = ClientRegistry::new();
        let (a, _peer_a) = loopback_session(1, PLAYER_PALETTE[0]).await;
        let (b, _peer_b) = loopback_session(2, PLAYER_PALETTE[1]).await;

        registry.insert(a).await;
        registry.insert(b).await;

        let mut ids: Vec<u32> = registry.snapshot().await.iter().map(|s| s.id()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2]);

        registry.remove(1).await;
        let ids: Vec<u32> = registry.snapshot().await.iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec![2]);
    }

    #[tokio::test]
    async fn test_state_recording_overwrites() {
        let registry = ClientRegistry::new();
        let color = PLAYER_PALETTE[0];

        registry
            .record_state(PlayerState {
                player_id: 1,
                x: 10.0,
                y: 20.0,
                crouching: false,
                scale_y: 1.0,
                color,
            })
            .await;
        registry
            .record_state(PlayerState {
                player_id: 1,
                x: 50.0,
                y: 60.0,
                crouching: true,
                scale_y: 0.5,
                color,
            })
            .await;

        let state = registry.last_state(1).await.unwrap();
        assert_eq!(state.x, 50.0);
        assert!(state.crouching);
        assert!(registry.last_state(2).await.is_none());
    }

    #[tokio::test]
    async fn test_send_writes_a_frame_to_the_peer() {
        let (session, mut peer) = loopback_session(1, PLAYER_PALETTE[0]).await;

        assert!(session.send(&Message::Disconnect(7)).await);

        let mut len_buf = [0u8; 4];
        peer.read_exact(&mut len_buf).await.unwrap();
        let mut frame = vec![0u8; u32::from_be_bytes(len_buf) as usize];
        peer.read_exact(&mut frame).await.unwrap();

        assert_eq!(Message::decode(&frame).unwrap(), Message::Disconnect(7));
    }

    #[tokio::test]
    async fn test_send_to_dead_session_is_skipped() {
        let (session, _peer) = loopback_session(1, PLAYER_PALETTE[0]).await;

        session.mark_dead();
        assert!(!session.send(&Message::StartGame).await);
    }

    #[tokio::test]
    async fn test_departure_runs_exactly_once() {
        let (session, _peer) = loopback_session(1, PLAYER_PALETTE[0]).await;

        assert!(session.begin_departure());
        assert!(!session.begin_departure());
        assert!(!session.begin_departure());
    }
}
