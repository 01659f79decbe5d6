//! Room lifecycle and the player-to-room mapping.
//!
//! [`RoomTable`] is a plain synchronous structure; the server wraps it in a
//! single `RwLock` and every operation completes under one guard, so the
//! invariants (unique codes among live rooms, one room per player, no
//! membership beyond capacity, no empty room left dangling) hold under any
//! interleaving of connection tasks.

use std::collections::HashMap;

use log::info;
use rand::seq::SliceRandom;
use rand::Rng;
use shared::{RoomInfo, RoomState, RoomVisibility};

use crate::game::RoundState;

/// One active room. Created with its host as sole member, destroyed the
/// moment the member list empties.
pub struct Room {
    pub code: String,
    pub host: u32,
    /// Insertion order is join order.
    pub members: Vec<u32>,
    pub ready: HashMap<u32, bool>,
    pub max_players: u8,
    pub visibility: RoomVisibility,
    pub state: RoomState,
    pub current_round: u32,
    pub total_rounds: u32,
    /// Cumulative scores across the rounds of the running game.
    pub total_scores: HashMap<u32, u32>,
    /// State of the round in progress; meaningful only while Playing.
    pub round: RoundState,
}

impl Room {
    pub fn new(
        code: String,
        host: u32,
        max_players: u8,
        visibility: RoomVisibility,
        total_rounds: u32,
    ) -> Self {
        Self {
            code,
            host,
            members: vec![host],
            ready: HashMap::from([(host, false)]),
            max_players,
            visibility,
            state: RoomState::Waiting,
            current_round: 0,
            total_rounds,
            total_scores: HashMap::new(),
            round: RoundState::new(),
        }
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= self.max_players as usize
    }

    pub fn is_member(&self, player: u32) -> bool {
        self.members.contains(&player)
    }

    pub fn all_ready(&self) -> bool {
        self.members
            .iter()
            .all(|m| self.ready.get(m).copied().unwrap_or(false))
    }

    /// Snapshot for the wire; `ready` runs parallel to `members`.
    pub fn info(&self) -> RoomInfo {
        RoomInfo {
            code: self.code.clone(),
            host: self.host,
            members: self.members.clone(),
            ready: self
                .members
                .iter()
                .map(|m| self.ready.get(m).copied().unwrap_or(false))
                .collect(),
            max_players: self.max_players,
            visibility: self.visibility,
            state: self.state,
            current_round: self.current_round,
            total_rounds: self.total_rounds,
        }
    }
}

/// What `leave_room` did, so the caller knows whom to notify.
pub struct LeaveOutcome {
    pub code: String,
    pub room_deleted: bool,
    /// Snapshot after the leave; None when the room was deleted.
    pub info: Option<RoomInfo>,
    /// Whether the room was mid-game when the player left.
    pub was_playing: bool,
}

/// All active rooms plus the player-to-room mapping.
pub struct RoomTable {
    rooms: HashMap<String, Room>,
    memberships: HashMap<u32, String>,
}

impl RoomTable {
    pub fn new() -> Self {
        Self {
            rooms: HashMap::new(),
            memberships: HashMap::new(),
        }
    }

    /// Creates a room with `host` as its sole member and returns the
    /// snapshot. The 4-digit code is drawn and retested against active
    /// codes until unique; a code frees up for reuse once its room dies.
    pub fn create_room(
        &mut self,
        host: u32,
        max_players: u8,
        visibility: RoomVisibility,
        total_rounds: u32,
    ) -> Result<RoomInfo, String> {
        if self.memberships.contains_key(&host) {
            return Err("Already in a room".to_string());
        }
        if max_players == 0 {
            return Err("Room needs at least one player slot".to_string());
        }
        if total_rounds == 0 {
            return Err("Game needs at least one round".to_string());
        }

        let code = self.generate_code();
        let room = Room::new(code.clone(), host, max_players, visibility, total_rounds);
        let snapshot = room.info();
        self.rooms.insert(code.clone(), room);
        self.memberships.insert(host, code.clone());
        info!("player {} created room {}", host, code);
        Ok(snapshot)
    }

    fn generate_code(&self) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let code = format!("{:04}", rng.gen_range(0..10_000));
            if !self.rooms.contains_key(&code) {
                return code;
            }
        }
    }

    /// Appends `player` to the room behind `code`. Fails on unknown code,
    /// a room that already left the lobby, or a full room.
    pub fn join_room(&mut self, player: u32, code: &str) -> Result<RoomInfo, String> {
        if self.memberships.contains_key(&player) {
            return Err("Already in a room".to_string());
        }
        let room = self
            .rooms
            .get_mut(code)
            .ok_or_else(|| "Room not found".to_string())?;
        if room.state != RoomState::Waiting {
            return Err("Game already starting".to_string());
        }
        if room.is_full() {
            return Err("Room is full".to_string());
        }

        room.members.push(player);
        room.ready.insert(player, false);
        self.memberships.insert(player, code.to_string());
        info!("player {} joined room {}", player, code);
        Ok(self.rooms[code].info())
    }

    /// Joins a uniformly random room among {public, waiting, not full}.
    /// The randomness spreads load; with zero candidates this fails
    /// immediately instead of blocking.
    pub fn join_random_public(&mut self, player: u32) -> Result<RoomInfo, String> {
        if self.memberships.contains_key(&player) {
            return Err("Already in a room".to_string());
        }

        let candidates: Vec<String> = self
            .rooms
            .values()
            .filter(|room| {
                room.visibility == RoomVisibility::Public
                    && room.state == RoomState::Waiting
                    && !room.is_full()
            })
            .map(|room| room.code.clone())
            .collect();

        match candidates.choose(&mut rand::thread_rng()) {
            Some(code) => self.join_room(player, code),
            None => Err("No open public rooms".to_string()),
        }
    }

    /// Removes `player` from their room, deleting the room if it empties
    /// and promoting the oldest remaining member when the host left.
    pub fn leave_room(&mut self, player: u32) -> Option<LeaveOutcome> {
        let code = self.memberships.remove(&player)?;
        let room = self.rooms.get_mut(&code)?;
        let was_playing = room.state == RoomState::Playing;

        room.members.retain(|m| *m != player);
        room.ready.remove(&player);

        if room.members.is_empty() {
            self.rooms.remove(&code);
            info!("room {} deleted (last player {} left)", code, player);
            return Some(LeaveOutcome {
                code,
                room_deleted: true,
                info: None,
                was_playing,
            });
        }

        if room.host == player {
            room.host = room.members[0];
            info!("room {}: host left, promoted player {}", code, room.host);
        }
        // A departing unready member can complete the remaining set
        if room.state == RoomState::Waiting && room.all_ready() {
            room.state = RoomState::Ready;
        }

        let info = room.info();
        info!("player {} left room {}", player, code);
        Some(LeaveOutcome {
            code,
            room_deleted: false,
            info: Some(info),
            was_playing,
        })
    }

    /// Sets a member's ready flag. The room advances Waiting to Ready once
    /// every member is ready; clearing the flag after that point is ignored
    /// since room state never moves backwards before a game.
    pub fn set_ready(&mut self, player: u32, ready: bool) -> Option<RoomInfo> {
        let code = self.memberships.get(&player)?;
        let room = self.rooms.get_mut(code)?;
        if room.state == RoomState::Playing {
            return None;
        }
        if room.state == RoomState::Ready && !ready {
            return None;
        }

        room.ready.insert(player, ready);
        if room.state == RoomState::Waiting && room.all_ready() {
            room.state = RoomState::Ready;
        }
        Some(room.info())
    }

    pub fn get(&self, code: &str) -> Option<&Room> {
        self.rooms.get(code)
    }

    pub fn get_mut(&mut self, code: &str) -> Option<&mut Room> {
        self.rooms.get_mut(code)
    }

    pub fn player_room_code(&self, player: u32) -> Option<&String> {
        self.memberships.get(&player)
    }

    pub fn room_of_player(&self, player: u32) -> Option<&Room> {
        self.rooms.get(self.memberships.get(&player)?)
    }

    pub fn room_of_player_mut(&mut self, player: u32) -> Option<&mut Room> {
        let code = self.memberships.get(&player)?.clone();
        self.rooms.get_mut(&code)
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

impl Default for RoomTable {
    fn default() -> Self {
        Self::new()
    }
}
