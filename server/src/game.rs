//! Round progression for active rooms.
//!
//! A running game walks each round through three phases: Selecting (every
//! member claims one catalog object), Placing (members position their
//! objects; unconfirmed placements are live previews), Racing (clients race,
//! the server records finish order). Round scores come from finish order,
//! accumulate into totals, and after the configured number of rounds the
//! room returns to the lobby.
//!
//! All state mutation happens synchronously on [`Room`] under the room table
//! lock; the async [`RoundEngine`] applies one mutation, snapshots the
//! member list and produced messages, releases the lock and only then
//! touches the network.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::{debug, info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use shared::protocol::{PhaseChange, Placement, RoundResult, ScoreUpdate, Selection};
use shared::{
    catalog_templates, Color, GameObject, Message, ObjectKind, Phase, PlatformRecord, RoomState,
};
use tokio::sync::RwLock;

use crate::broadcast::Broadcaster;
use crate::rooms::{Room, RoomTable};

/// Per-round engine state carried by every room. Reset when a round begins.
pub struct RoundState {
    pub phase: Phase,
    pub catalog: Vec<GameObject>,
    /// Claimed catalog entries: object id to claiming player.
    pub claims: HashMap<u32, u32>,
    /// Server-authored base layout broadcast at round start.
    pub layout: Vec<PlatformRecord>,
    /// Committed placements forming this round's level.
    pub placements: Vec<Placement>,
    /// Players whose placement is committed this round.
    pub placed: HashSet<u32>,
    pub finish_order: Vec<u32>,
    pub failed: HashSet<u32>,
    pub round_scores: HashMap<u32, u32>,
}

impl RoundState {
    pub fn new() -> Self {
        Self {
            phase: Phase::Selecting,
            catalog: Vec::new(),
            claims: HashMap::new(),
            layout: Vec::new(),
            placements: Vec::new(),
            placed: HashSet::new(),
            finish_order: Vec::new(),
            failed: HashSet::new(),
            round_scores: HashMap::new(),
        }
    }
}

impl Default for RoundState {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a produced message should go within the room.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// Every current member.
    Room,
    /// Every member except the given player (relay semantics).
    RoomExcept(u32),
    /// Exactly one player (responses and rejections).
    One(u32),
}

/// A message plus its delivery target, produced under the table lock and
/// sent after it is released.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub target: Target,
    pub message: Message,
}

impl Outbound {
    fn room(message: Message) -> Self {
        Self {
            target: Target::Room,
            message,
        }
    }

    fn except(player: u32, message: Message) -> Self {
        Self {
            target: Target::RoomExcept(player),
            message,
        }
    }

    fn one(player: u32, message: Message) -> Self {
        Self {
            target: Target::One(player),
            message,
        }
    }
}

/// Points for finishing at `rank` (0-based) among `member_count` racers.
/// Strictly decreasing in rank; failures and non-finishers score zero.
fn award_points(member_count: usize, rank: usize) -> u32 {
    (member_count.saturating_sub(rank) as u32) * 10
}

/// Rolls the server-authored obstacle layout for one round: the preloaded
/// base platforms plus a handful of random fillers.
fn roll_layout(base: &[PlatformRecord]) -> Vec<PlatformRecord> {
    let mut rng = rand::thread_rng();
    let mut layout = base.to_vec();

    let widths = [64u32, 96, 128, 160];
    let count = rng.gen_range(4..=8);
    for _ in 0..count {
        let deadly = rng.gen_ratio(1, 5);
        let mut platform = PlatformRecord::new(
            rng.gen_range(0.0..1200.0),
            rng.gen_range(100.0..600.0),
            *widths.choose(&mut rng).unwrap_or(&96),
            24,
            if deadly {
                Color::new(200, 40, 40)
            } else {
                Color::new(110, 110, 110)
            },
        );
        if deadly {
            platform.kind = ObjectKind::Death;
        }
        layout.push(platform);
    }
    layout
}

impl Room {
    /// Moves a Ready room into its first round. Caller validates host and
    /// room state.
    pub(crate) fn begin_game(&mut self, base_layout: &[PlatformRecord]) -> Vec<Outbound> {
        self.state = RoomState::Playing;
        self.current_round = 1;
        self.total_scores.clear();
        info!(
            "room {}: game started ({} rounds, {} players)",
            self.code,
            self.total_rounds,
            self.members.len()
        );

        let mut out = vec![Outbound::room(Message::RoomUpdate(self.info()))];
        out.extend(self.begin_round(base_layout));
        out
    }

    fn begin_round(&mut self, base_layout: &[PlatformRecord]) -> Vec<Outbound> {
        self.round = RoundState::new();
        self.round.catalog = catalog_templates();
        self.round.layout = roll_layout(base_layout);
        debug!("room {}: round {} selecting", self.code, self.current_round);

        vec![
            Outbound::room(Message::PhaseChange(PhaseChange {
                phase: Phase::Selecting,
                round: self.current_round,
            })),
            Outbound::room(Message::RandomPlatforms(self.round.layout.clone())),
            Outbound::room(Message::ObjectCatalog(self.round.catalog.clone())),
        ]
    }

    /// Handles a member's claim on one catalog entry. A claim on an object
    /// already held by another player is rejected back to the requester
    /// only; an accepted claim is announced to the whole room.
    pub(crate) fn claim_object(&mut self, player: u32, object_id: u32) -> Vec<Outbound> {
        if self.round.phase != Phase::Selecting || !self.is_member(player) {
            return Vec::new();
        }
        if self.round.claims.values().any(|p| *p == player) {
            debug!("room {}: player {} already claimed an object", self.code, player);
            return Vec::new();
        }

        if let Some(&owner) = self.round.claims.get(&object_id) {
            return vec![Outbound::one(
                player,
                Message::Selection(Selection {
                    object_id,
                    player_id: owner,
                    accepted: false,
                }),
            )];
        }

        let Some(object) = self.round.catalog.iter_mut().find(|o| o.id == object_id) else {
            return vec![Outbound::one(
                player,
                Message::Selection(Selection {
                    object_id,
                    player_id: player,
                    accepted: false,
                }),
            )];
        };

        object.selected = true;
        self.round.claims.insert(object_id, player);
        let mut out = vec![Outbound::room(Message::Selection(Selection {
            object_id,
            player_id: player,
            accepted: true,
        }))];

        if self.everyone_claimed() {
            self.round.phase = Phase::Placing;
            debug!("room {}: round {} placing", self.code, self.current_round);
            out.push(Outbound::room(Message::PhaseChange(PhaseChange {
                phase: Phase::Placing,
                round: self.current_round,
            })));
        }
        out
    }

    fn everyone_claimed(&self) -> bool {
        self.members
            .iter()
            .all(|m| self.round.claims.values().any(|p| p == m))
    }

    /// Applies a placement message. Unconfirmed placements are live cursor
    /// previews relayed without committing anything; confirmed placements
    /// enter the round layout once per player.
    pub(crate) fn apply_placement(&mut self, player: u32, mut placement: Placement) -> Vec<Outbound> {
        if self.round.phase != Phase::Placing || !self.is_member(player) {
            return Vec::new();
        }
        // The server owns the sender identity on relayed messages
        placement.player_id = player;

        if !placement.confirmed {
            return vec![Outbound::except(player, Message::Placement(placement))];
        }
        if self.round.placed.contains(&player) {
            debug!("room {}: duplicate commit from player {}", self.code, player);
            return Vec::new();
        }

        self.round.placed.insert(player);
        self.round.placements.push(placement.clone());
        let mut out = vec![Outbound::except(player, Message::Placement(placement))];

        if self.round.placed.len() >= self.members.len() {
            self.round.phase = Phase::Racing;
            debug!("room {}: round {} racing", self.code, self.current_round);
            out.push(Outbound::room(Message::PhaseChange(PhaseChange {
                phase: Phase::Racing,
                round: self.current_round,
            })));
        }
        out
    }

    /// Records one member reaching the goal or falling out of bounds. Each
    /// member is scored at most once per round; the round ends when every
    /// member has a result.
    pub(crate) fn record_result(
        &mut self,
        player: u32,
        fell: bool,
        base_layout: &[PlatformRecord],
    ) -> Vec<Outbound> {
        if self.round.phase != Phase::Racing || !self.is_member(player) {
            return Vec::new();
        }
        if self.round.finish_order.contains(&player) || self.round.failed.contains(&player) {
            return Vec::new();
        }

        let mut out = Vec::new();
        if fell {
            self.round.failed.insert(player);
            out.push(Outbound::except(player, Message::Fail(player)));
        } else {
            let rank = self.round.finish_order.len();
            let points = award_points(self.members.len(), rank);
            self.round.finish_order.push(player);
            self.round.round_scores.insert(player, points);
            out.push(Outbound::except(player, Message::Finish(player)));
            out.push(Outbound::room(Message::ScoreUpdate(ScoreUpdate {
                player_id: player,
                points,
            })));
        }

        if self.race_complete() {
            out.extend(self.finish_round(base_layout));
        }
        out
    }

    fn race_complete(&self) -> bool {
        self.round.finish_order.len() + self.round.failed.len() >= self.members.len()
    }

    fn finish_round(&mut self, base_layout: &[PlatformRecord]) -> Vec<Outbound> {
        // Every member appears in both maps, zero-scored if they never finished
        for member in &self.members {
            self.round.round_scores.entry(*member).or_insert(0);
            self.total_scores.entry(*member).or_insert(0);
        }
        for (player, points) in &self.round.round_scores {
            *self.total_scores.entry(*player).or_insert(0) += points;
        }

        let result = RoundResult {
            round_scores: self.round.round_scores.clone(),
            total_scores: self.total_scores.clone(),
            finish_order: self.round.finish_order.clone(),
            current_round: self.current_round,
            total_rounds: self.total_rounds,
        };
        info!(
            "room {}: round {}/{} finished, order {:?}",
            self.code, self.current_round, self.total_rounds, result.finish_order
        );
        let mut out = vec![Outbound::room(Message::RoundEnd(result))];

        if self.current_round >= self.total_rounds {
            self.state = RoomState::Waiting;
            self.current_round = 0;
            self.round = RoundState::new();
            for flag in self.ready.values_mut() {
                *flag = false;
            }
            info!("room {}: game over, returning to lobby", self.code);
            out.push(Outbound::room(Message::ReturnToRoom));
            out.push(Outbound::room(Message::RoomUpdate(self.info())));
        } else {
            self.current_round += 1;
            out.extend(self.begin_round(base_layout));
        }
        out
    }

    /// Re-evaluates the running round after a member left: their claims are
    /// released and any phase waiting only on them advances.
    pub(crate) fn drop_member_from_round(
        &mut self,
        player: u32,
        base_layout: &[PlatformRecord],
    ) -> Vec<Outbound> {
        if self.state != RoomState::Playing {
            return Vec::new();
        }

        let released: Vec<u32> = self
            .round
            .claims
            .iter()
            .filter(|(_, p)| **p == player)
            .map(|(object_id, _)| *object_id)
            .collect();
        for object_id in released {
            self.round.claims.remove(&object_id);
            if let Some(object) = self.round.catalog.iter_mut().find(|o| o.id == object_id) {
                object.selected = false;
            }
        }
        self.round.placed.remove(&player);
        self.round.finish_order.retain(|p| *p != player);
        self.round.failed.remove(&player);
        self.round.round_scores.remove(&player);
        self.total_scores.remove(&player);

        let mut out = Vec::new();
        match self.round.phase {
            Phase::Selecting if self.everyone_claimed() => {
                self.round.phase = Phase::Placing;
                out.push(Outbound::room(Message::PhaseChange(PhaseChange {
                    phase: Phase::Placing,
                    round: self.current_round,
                })));
            }
            Phase::Placing if self.round.placed.len() >= self.members.len() => {
                self.round.phase = Phase::Racing;
                out.push(Outbound::room(Message::PhaseChange(PhaseChange {
                    phase: Phase::Racing,
                    round: self.current_round,
                })));
            }
            Phase::Racing if self.race_complete() => {
                out.extend(self.finish_round(base_layout));
            }
            _ => {}
        }
        out
    }
}

/// Async front of the room table: every operation locks the table, applies
/// one mutation, then broadcasts the produced messages to a member snapshot
/// taken under the same guard.
pub struct RoundEngine {
    rooms: Arc<RwLock<RoomTable>>,
    broadcaster: Arc<Broadcaster>,
    default_rounds: u32,
    base_layout: Vec<PlatformRecord>,
}

impl RoundEngine {
    pub fn new(
        rooms: Arc<RwLock<RoomTable>>,
        broadcaster: Arc<Broadcaster>,
        default_rounds: u32,
        base_layout: Vec<PlatformRecord>,
    ) -> Self {
        Self {
            rooms,
            broadcaster,
            default_rounds,
            base_layout,
        }
    }

    async fn dispatch(&self, members: &[u32], outbounds: Vec<Outbound>) {
        for outbound in outbounds {
            match outbound.target {
                Target::Room => self.broadcaster.send_to(members, &outbound.message, None).await,
                Target::RoomExcept(player) => {
                    self.broadcaster
                        .send_to(members, &outbound.message, Some(player))
                        .await
                }
                Target::One(player) => {
                    self.broadcaster.send_to_one(player, &outbound.message).await
                }
            }
        }
    }

    pub async fn create_room(
        &self,
        player: u32,
        max_players: u8,
        visibility: shared::RoomVisibility,
        total_rounds: u32,
    ) {
        let rounds = if total_rounds == 0 {
            self.default_rounds
        } else {
            total_rounds
        };

        let result = {
            let mut table = self.rooms.write().await;
            table.create_room(player, max_players, visibility, rounds)
        };

        match result {
            Ok(info) => {
                let response = shared::protocol::CreateRoomResponse {
                    success: true,
                    code: info.code.clone(),
                    message: String::new(),
                };
                let members = info.members.clone();
                self.broadcaster
                    .send_to_one(player, &Message::CreateRoomResponse(response))
                    .await;
                self.broadcaster
                    .send_to(&members, &Message::RoomUpdate(info), None)
                    .await;
            }
            Err(message) => {
                let response = shared::protocol::CreateRoomResponse {
                    success: false,
                    code: String::new(),
                    message,
                };
                self.broadcaster
                    .send_to_one(player, &Message::CreateRoomResponse(response))
                    .await;
            }
        }
    }

    pub async fn join_room(&self, player: u32, code: &str) {
        let result = {
            let mut table = self.rooms.write().await;
            table.join_room(player, code)
        };
        self.answer_join(player, result).await;
    }

    pub async fn join_random(&self, player: u32) {
        let result = {
            let mut table = self.rooms.write().await;
            table.join_random_public(player)
        };
        self.answer_join(player, result).await;
    }

    async fn answer_join(&self, player: u32, result: Result<shared::RoomInfo, String>) {
        match result {
            Ok(info) => {
                let response = shared::protocol::JoinRoomResponse {
                    success: true,
                    message: String::new(),
                    room: Some(info.clone()),
                };
                let members = info.members.clone();
                self.broadcaster
                    .send_to_one(player, &Message::JoinRoomResponse(response))
                    .await;
                self.broadcaster
                    .send_to(&members, &Message::RoomUpdate(info), None)
                    .await;
            }
            Err(message) => {
                let response = shared::protocol::JoinRoomResponse {
                    success: false,
                    message,
                    room: None,
                };
                self.broadcaster
                    .send_to_one(player, &Message::JoinRoomResponse(response))
                    .await;
            }
        }
    }

    /// Removes a player from their room on leave or disconnect, notifying
    /// the remaining members and re-evaluating a running round.
    pub async fn remove_from_room(&self, player: u32) {
        let (info, members, outbounds) = {
            let mut table = self.rooms.write().await;
            let Some(outcome) = table.leave_room(player) else {
                return;
            };
            if outcome.room_deleted {
                return;
            }

            let mut outbounds = Vec::new();
            if outcome.was_playing {
                if let Some(room) = table.get_mut(&outcome.code) {
                    outbounds = room.drop_member_from_round(player, &self.base_layout);
                }
            }
            let info = outcome.info;
            let members = info
                .as_ref()
                .map(|i| i.members.clone())
                .unwrap_or_default();
            (info, members, outbounds)
        };

        if let Some(info) = info {
            self.broadcaster
                .send_to(&members, &Message::RoomUpdate(info), None)
                .await;
        }
        self.dispatch(&members, outbounds).await;
    }

    pub async fn set_ready(&self, player: u32, ready: bool) {
        let info = {
            let mut table = self.rooms.write().await;
            table.set_ready(player, ready)
        };
        if let Some(info) = info {
            let members = info.members.clone();
            self.broadcaster
                .send_to(&members, &Message::RoomUpdate(info), None)
                .await;
        }
    }

    /// Starts the game if and only if the request came from the host of a
    /// Ready room. Anything else is rejected without touching room state.
    pub async fn start_game(&self, player: u32) {
        let (members, outbounds) = {
            let mut table = self.rooms.write().await;
            let Some(room) = table.room_of_player_mut(player) else {
                warn!("start request from player {} who is in no room", player);
                return;
            };
            if room.host != player {
                warn!(
                    "room {}: rejected start request from non-host player {}",
                    room.code, player
                );
                return;
            }
            if room.state != RoomState::Ready {
                warn!(
                    "room {}: rejected start request, room is {:?}",
                    room.code, room.state
                );
                return;
            }
            let outbounds = room.begin_game(&self.base_layout);
            (room.members.clone(), outbounds)
        };
        self.dispatch(&members, outbounds).await;
    }

    pub async fn claim_object(&self, player: u32, object_id: u32) {
        let (members, outbounds) = {
            let mut table = self.rooms.write().await;
            let Some(room) = table.room_of_player_mut(player) else {
                return;
            };
            let outbounds = room.claim_object(player, object_id);
            (room.members.clone(), outbounds)
        };
        self.dispatch(&members, outbounds).await;
    }

    pub async fn apply_placement(&self, player: u32, placement: Placement) {
        let (members, outbounds) = {
            let mut table = self.rooms.write().await;
            let Some(room) = table.room_of_player_mut(player) else {
                return;
            };
            let outbounds = room.apply_placement(player, placement);
            (room.members.clone(), outbounds)
        };
        self.dispatch(&members, outbounds).await;
    }

    pub async fn record_result(&self, player: u32, fell: bool) {
        let (members, outbounds) = {
            let mut table = self.rooms.write().await;
            let Some(room) = table.room_of_player_mut(player) else {
                return;
            };
            let outbounds = room.record_result(player, fell, &self.base_layout);
            (room.members.clone(), outbounds)
        };
        self.dispatch(&members, outbounds).await;
    }
}
