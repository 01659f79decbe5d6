//! Per-connection worker: handshake, framed read loop, dispatch, cleanup.
//!
//! Each accepted socket gets one task running [`run_session`]. The task owns
//! the read half; the write half lives inside the registered
//! [`ClientSession`](crate::registry::ClientSession) so broadcasts from other
//! workers can reach this peer. Termination by orderly close, decode failure
//! or transport error all funnel into the same idempotent cleanup.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use shared::protocol::Init;
use shared::{read_message, Message};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::broadcast::Broadcaster;
use crate::game::RoundEngine;
use crate::registry::{ClientRegistry, ClientSession};

/// Shared server state handed to every connection task. Constructed once at
/// startup and injected; nothing here is a process-wide singleton.
pub struct SessionContext {
    pub registry: Arc<ClientRegistry>,
    pub broadcaster: Arc<Broadcaster>,
    pub engine: Arc<RoundEngine>,
    /// Read-idle limit reclaiming half-open sockets; None leaves reads
    /// unbounded.
    pub idle_timeout: Option<Duration>,
}

/// Runs one client connection to completion. Never returns an error; every
/// failure is scoped to this connection and ends in cleanup.
pub async fn run_session(stream: TcpStream, addr: SocketAddr, ctx: Arc<SessionContext>) {
    if let Err(e) = stream.set_nodelay(true) {
        warn!("failed to set nodelay for {}: {}", addr, e);
    }
    let (mut reader, writer) = stream.into_split();

    let (id, color) = ctx.registry.allocate_identity();
    let session = Arc::new(ClientSession::new(id, color, writer));
    info!("client {} connected from {}", id, addr);

    // Tell the new peer who they are, then replay every currently known
    // peer individually so a late joiner converges to the live set.
    session
        .send(&Message::Init(Init {
            player_id: id,
            color,
        }))
        .await;
    for peer in ctx.registry.snapshot().await {
        if !session.is_alive() {
            break;
        }
        session
            .send(&Message::Init(Init {
                player_id: peer.id(),
                color: peer.color(),
            }))
            .await;
        if let Some(state) = ctx.registry.last_state(peer.id()).await {
            session.send(&Message::PlayerState(state)).await;
        }
    }

    if !session.is_alive() {
        info!("client {} dropped during handshake", id);
        return;
    }
    ctx.registry.insert(Arc::clone(&session)).await;

    loop {
        let next = match ctx.idle_timeout {
            Some(limit) => match timeout(limit, read_message(&mut reader)).await {
                Ok(result) => result,
                Err(_) => {
                    info!("client {} idle for {:?}, closing", id, limit);
                    break;
                }
            },
            None => read_message(&mut reader).await,
        };

        match next {
            Ok(Some(message)) => {
                if !session.is_alive() {
                    break;
                }
                dispatch(message, &session, &ctx).await;
            }
            Ok(None) => {
                debug!("client {} closed the connection", id);
                break;
            }
            Err(e) => {
                warn!("client {}: terminating on protocol error: {}", id, e);
                break;
            }
        }
    }

    cleanup(&session, &ctx).await;
}

/// Routes one inbound message. Identity-bearing fields are overwritten with
/// the session's own id before any relay; clients cannot speak for others.
async fn dispatch(message: Message, session: &Arc<ClientSession>, ctx: &Arc<SessionContext>) {
    let id = session.id();
    match message {
        Message::PlayerState(mut state) => {
            state.player_id = id;
            state.color = session.color();
            ctx.registry.record_state(state).await;
            ctx.broadcaster
                .broadcast(&Message::PlayerState(state), Some(id))
                .await;
        }
        Message::PlatformState(update) => {
            ctx.broadcaster
                .broadcast(&Message::PlatformState(update), Some(id))
                .await;
        }
        Message::CreateRoomRequest(request) => {
            ctx.engine
                .create_room(id, request.max_players, request.visibility, request.total_rounds)
                .await;
        }
        Message::JoinRoomRequest(code) => ctx.engine.join_room(id, &code).await,
        Message::JoinRandomRoomRequest => ctx.engine.join_random(id).await,
        Message::LeaveRoom => ctx.engine.remove_from_room(id).await,
        Message::PlayerReady(ready) => ctx.engine.set_ready(id, ready).await,
        Message::StartGame => ctx.engine.start_game(id).await,
        Message::Selection(selection) => ctx.engine.claim_object(id, selection.object_id).await,
        Message::Placement(placement) => ctx.engine.apply_placement(id, placement).await,
        Message::Finish(_) => ctx.engine.record_result(id, false).await,
        Message::Fail(_) => ctx.engine.record_result(id, true).await,
        other => {
            warn!("client {} sent unexpected {:?} message", id, other.kind());
        }
    }
}

/// Tears one session down: registry removal, room departure with its
/// RoomUpdate, and a single Disconnect broadcast. Safe to reach from any
/// termination path; only the first caller does work.
async fn cleanup(session: &Arc<ClientSession>, ctx: &Arc<SessionContext>) {
    if !session.begin_departure() {
        return;
    }
    session.mark_dead();
    let id = session.id();

    ctx.registry.remove(id).await;
    ctx.engine.remove_from_room(id).await;
    ctx.broadcaster
        .broadcast(&Message::Disconnect(id), Some(id))
        .await;
    info!("client {} disconnected", id);
}
