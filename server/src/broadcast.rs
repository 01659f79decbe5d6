//! Message fan-out over the client registry.
//!
//! Broadcasting iterates a snapshot of the registry and only prunes failed
//! sessions after the iteration completes: every peer registered at
//! broadcast start either receives the message or is removed, never both
//! skipped and left registered. One dead or slow peer cannot fail delivery
//! to the others.

use std::sync::Arc;

use log::warn;
use shared::Message;

use crate::registry::ClientRegistry;

pub struct Broadcaster {
    registry: Arc<ClientRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self { registry }
    }

    /// Sends to every registered session except `exclude`, then prunes the
    /// sessions whose send failed.
    pub async fn broadcast(&self, message: &Message, exclude: Option<u32>) {
        let sessions = self.registry.snapshot().await;
        let mut failed = Vec::new();

        for session in sessions {
            if Some(session.id()) == exclude {
                continue;
            }
            if !session.send(message).await {
                failed.push(session.id());
            }
        }

        self.prune(failed).await;
    }

    /// Same discipline as [`broadcast`](Self::broadcast) over an explicit
    /// target list, used for room-scoped messages. Targets that are no
    /// longer registered are skipped silently; their cleanup already ran.
    pub async fn send_to(&self, targets: &[u32], message: &Message, exclude: Option<u32>) {
        let mut failed = Vec::new();

        for &id in targets {
            if Some(id) == exclude {
                continue;
            }
            if let Some(session) = self.registry.get(id).await {
                if !session.send(message).await {
                    failed.push(id);
                }
            }
        }

        self.prune(failed).await;
    }

    /// Direct reply to one peer, with the same prune-on-failure behavior.
    pub async fn send_to_one(&self, id: u32, message: &Message) {
        if let Some(session) = self.registry.get(id).await {
            if !session.send(message).await {
                self.prune(vec![id]).await;
            }
        }
    }

    async fn prune(&self, failed: Vec<u32>) {
        for id in failed {
            if self.registry.remove(id).await.is_some() {
                warn!("pruned unreachable client {}", id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::loopback_session;
    use shared::read_message;
    use shared::PLAYER_PALETTE;
    use tokio::time::{timeout, Duration};

    async fn expect_message(peer: &mut tokio::net::TcpStream) -> Message {
        timeout(Duration::from_secs(1), read_message(peer))
            .await
            .expect("timed out waiting for message")
            .unwrap()
            .expect("peer closed unexpectedly")
    }

    async fn expect_silence(peer: &mut tokio::net::TcpStream) {
        let result = timeout(Duration::from_millis(200), read_message(peer)).await;
        assert!(result.is_err(), "expected no message, got {:?}", result);
    }

    #[tokio::test]
    async fn test_broadcast_excludes_exactly_the_sender() {
        let registry = Arc::new(ClientRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));

        let (a, mut peer_a) = loopback_session(1, PLAYER_PALETTE[0]).await;
        let (b, mut peer_b) = loopback_session(2, PLAYER_PALETTE[1]).await;
        let (c, mut peer_c) = loopback_session(3, PLAYER_PALETTE[2]).await;
        registry.insert(a).await;
        registry.insert(b).await;
        registry.insert(c).await;

        broadcaster.broadcast(&Message::Disconnect(1), Some(1)).await;

        assert_eq!(expect_message(&mut peer_b).await, Message::Disconnect(1));
        assert_eq!(expect_message(&mut peer_c).await, Message::Disconnect(1));
        expect_silence(&mut peer_a).await;
    }

    #[tokio::test]
    async fn test_broadcast_prunes_dead_sessions() {
        let registry = Arc::new(ClientRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));

        let (a, mut peer_a) = loopback_session(1, PLAYER_PALETTE[0]).await;
        let (b, _peer_b) = loopback_session(2, PLAYER_PALETTE[1]).await;
        registry.insert(a).await;
        registry.insert(Arc::clone(&b)).await;

        // Simulates a send failure detected earlier on this session
        b.mark_dead();

        broadcaster.broadcast(&Message::StartGame, None).await;

        // Live peer got the message, dead peer was removed from the registry
        assert_eq!(expect_message(&mut peer_a).await, Message::StartGame);
        assert!(registry.get(2).await.is_none());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_send_to_targets_only_listed_members() {
        let registry = Arc::new(ClientRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));

        let (a, mut peer_a) = loopback_session(1, PLAYER_PALETTE[0]).await;
        let (b, mut peer_b) = loopback_session(2, PLAYER_PALETTE[1]).await;
        let (c, mut peer_c) = loopback_session(3, PLAYER_PALETTE[2]).await;
        registry.insert(a).await;
        registry.insert(b).await;
        registry.insert(c).await;

        broadcaster
            .send_to(&[1, 2], &Message::ReturnToRoom, Some(2))
            .await;

        assert_eq!(expect_message(&mut peer_a).await, Message::ReturnToRoom);
        expect_silence(&mut peer_b).await;
        expect_silence(&mut peer_c).await;
    }

    #[tokio::test]
    async fn test_send_to_skips_unregistered_targets() {
        let registry = Arc::new(ClientRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));

        let (a, mut peer_a) = loopback_session(1, PLAYER_PALETTE[0]).await;
        registry.insert(a).await;

        // Target 9 was never registered; delivery to 1 still happens
        broadcaster.send_to(&[9, 1], &Message::LeaveRoom, None).await;
        assert_eq!(expect_message(&mut peer_a).await, Message::LeaveRoom);
    }

    #[tokio::test]
    async fn test_send_to_one_prunes_on_failure() {
        let registry = Arc::new(ClientRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));

        let (a, _peer_a) = loopback_session(1, PLAYER_PALETTE[0]).await;
        registry.insert(Arc::clone(&a)).await;
        a.mark_dead();

        broadcaster.send_to_one(1, &Message::StartGame).await;
        assert!(registry.get(1).await.is_none());
    }
}
