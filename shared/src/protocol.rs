//! Wire protocol between clients and the session server.
//!
//! Every message travels as one length-prefixed frame:
//!
//! `[u32 BE payload length] [u8 protocol version] [u8 message kind] [bincode body]`
//!
//! The kind byte lets a receiver dispatch without any external context, and
//! the length prefix bounds how much a single frame may read. Each frame is
//! encoded and decoded in isolation; there is no cross-message state.
//!
//! Two bodies (`Placement` and `ObjectCatalog`) also accept the older,
//! shorter layout that predates platform rotation and kinds. Absent fields
//! decode to rotation 0, kind `Normal` and zero motion parameters.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::objects::{Color, GameObject, LegacyGameObject, PlatformRecord};

/// Current wire protocol revision. Revision 1 frames lacked rotation and
/// object kinds; their bodies are still decoded via the legacy fallback.
pub const PROTOCOL_VERSION: u8 = 2;

/// Upper bound on a single frame's payload. Larger length prefixes are
/// treated as protocol corruption and terminate the connection.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Errors produced while encoding, decoding or framing messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame length {len} exceeds limit {max}")]
    FrameTooLarge { len: usize, max: usize },
    #[error("frame too short to carry version and kind")]
    TruncatedHeader,
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),
    #[error("unknown message kind {0}")]
    UnknownKind(u8),
    #[error("malformed {kind:?} body: {source}")]
    MalformedBody {
        kind: MessageKind,
        source: bincode::Error,
    },
}

/// Wire tag identifying a message's kind. The numeric values are part of the
/// protocol and must never be reassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Init = 0,
    PlayerState = 1,
    PlatformState = 2,
    ObjectCatalog = 3,
    Selection = 4,
    Placement = 5,
    PhaseChange = 6,
    RandomPlatforms = 7,
    Finish = 8,
    Fail = 9,
    ScoreUpdate = 10,
    RoundEnd = 11,
    Disconnect = 12,
    CreateRoomRequest = 13,
    CreateRoomResponse = 14,
    JoinRoomRequest = 15,
    JoinRoomResponse = 16,
    JoinRandomRoomRequest = 17,
    RoomUpdate = 18,
    PlayerReady = 19,
    StartGame = 20,
    ReturnToRoom = 21,
    LeaveRoom = 22,
}

impl MessageKind {
    fn from_byte(byte: u8) -> Option<Self> {
        use MessageKind::*;
        Some(match byte {
            0 => Init,
            1 => PlayerState,
            2 => PlatformState,
            3 => ObjectCatalog,
            4 => Selection,
            5 => Placement,
            6 => PhaseChange,
            7 => RandomPlatforms,
            8 => Finish,
            9 => Fail,
            10 => ScoreUpdate,
            11 => RoundEnd,
            12 => Disconnect,
            13 => CreateRoomRequest,
            14 => CreateRoomResponse,
            15 => JoinRoomRequest,
            16 => JoinRoomResponse,
            17 => JoinRandomRoomRequest,
            18 => RoomUpdate,
            19 => PlayerReady,
            20 => StartGame,
            21 => ReturnToRoom,
            22 => LeaveRoom,
            _ => return None,
        })
    }
}

/// Identity and display color assigned to a peer at connect.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Init {
    pub player_id: u32,
    pub color: Color,
}

/// A player's transient runtime state, overwritten on every update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    pub player_id: u32,
    pub x: f32,
    pub y: f32,
    pub crouching: bool,
    pub scale_y: f32,
    pub color: Color,
}

/// Position update for a movable hazard or platform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlatformState {
    pub object_id: u32,
    pub x: f32,
    pub y: f32,
}

/// A player's claim on one catalog entry. Clients send only `object_id`;
/// the server fills `player_id` and `accepted` when answering or relaying.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub object_id: u32,
    pub player_id: u32,
    pub accepted: bool,
}

/// A positioned instance of a catalog object. `confirmed: false` marks a
/// live preview that must not be committed into the round layout.
///
/// `object` sits last so that [`LegacyPlacement`] is a wire prefix of this
/// layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub player_id: u32,
    pub x: f32,
    pub y: f32,
    pub confirmed: bool,
    pub object: GameObject,
}

/// Older wire layout of [`Placement`]; see [`LegacyGameObject`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyPlacement {
    pub player_id: u32,
    pub x: f32,
    pub y: f32,
    pub confirmed: bool,
    pub object: LegacyGameObject,
}

impl From<LegacyPlacement> for Placement {
    fn from(old: LegacyPlacement) -> Self {
        Self {
            player_id: old.player_id,
            x: old.x,
            y: old.y,
            confirmed: old.confirmed,
            object: old.object.into(),
        }
    }
}

/// Sub-stage of an active round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Selecting,
    Placing,
    Racing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseChange {
    pub phase: Phase,
    pub round: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreUpdate {
    pub player_id: u32,
    pub points: u32,
}

/// Scores and finish order of a completed round. Immutable once broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundResult {
    pub round_scores: HashMap<u32, u32>,
    pub total_scores: HashMap<u32, u32>,
    pub finish_order: Vec<u32>,
    pub current_round: u32,
    pub total_rounds: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomVisibility {
    Private,
    Public,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomState {
    Waiting,
    Ready,
    Playing,
}

/// Snapshot of a room as broadcast to its members. `ready` runs parallel to
/// `members`, which is ordered by join time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub code: String,
    pub host: u32,
    pub members: Vec<u32>,
    pub ready: Vec<bool>,
    pub max_players: u8,
    pub visibility: RoomVisibility,
    pub state: RoomState,
    pub current_round: u32,
    pub total_rounds: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRoomRequest {
    pub max_players: u8,
    pub visibility: RoomVisibility,
    /// Zero asks the server for its configured default.
    pub total_rounds: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRoomResponse {
    pub success: bool,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRoomResponse {
    pub success: bool,
    pub message: String,
    pub room: Option<RoomInfo>,
}

/// A typed wire message. The variant order mirrors [`MessageKind`].
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Init(Init),
    PlayerState(PlayerState),
    PlatformState(PlatformState),
    ObjectCatalog(Vec<GameObject>),
    Selection(Selection),
    Placement(Placement),
    PhaseChange(PhaseChange),
    RandomPlatforms(Vec<PlatformRecord>),
    Finish(u32),
    Fail(u32),
    ScoreUpdate(ScoreUpdate),
    RoundEnd(RoundResult),
    Disconnect(u32),
    CreateRoomRequest(CreateRoomRequest),
    CreateRoomResponse(CreateRoomResponse),
    JoinRoomRequest(String),
    JoinRoomResponse(JoinRoomResponse),
    JoinRandomRoomRequest,
    RoomUpdate(RoomInfo),
    PlayerReady(bool),
    StartGame,
    ReturnToRoom,
    LeaveRoom,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Init(_) => MessageKind::Init,
            Message::PlayerState(_) => MessageKind::PlayerState,
            Message::PlatformState(_) => MessageKind::PlatformState,
            Message::ObjectCatalog(_) => MessageKind::ObjectCatalog,
            Message::Selection(_) => MessageKind::Selection,
            Message::Placement(_) => MessageKind::Placement,
            Message::PhaseChange(_) => MessageKind::PhaseChange,
            Message::RandomPlatforms(_) => MessageKind::RandomPlatforms,
            Message::Finish(_) => MessageKind::Finish,
            Message::Fail(_) => MessageKind::Fail,
            Message::ScoreUpdate(_) => MessageKind::ScoreUpdate,
            Message::RoundEnd(_) => MessageKind::RoundEnd,
            Message::Disconnect(_) => MessageKind::Disconnect,
            Message::CreateRoomRequest(_) => MessageKind::CreateRoomRequest,
            Message::CreateRoomResponse(_) => MessageKind::CreateRoomResponse,
            Message::JoinRoomRequest(_) => MessageKind::JoinRoomRequest,
            Message::JoinRoomResponse(_) => MessageKind::JoinRoomResponse,
            Message::JoinRandomRoomRequest => MessageKind::JoinRandomRoomRequest,
            Message::RoomUpdate(_) => MessageKind::RoomUpdate,
            Message::PlayerReady(_) => MessageKind::PlayerReady,
            Message::StartGame => MessageKind::StartGame,
            Message::ReturnToRoom => MessageKind::ReturnToRoom,
            Message::LeaveRoom => MessageKind::LeaveRoom,
        }
    }

    /// Encodes the message into a frame payload: version, kind, bincode body.
    /// The length prefix is written separately by [`write_message`].
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let kind = self.kind();
        let body = match self {
            Message::Init(init) => bincode::serialize(init),
            Message::PlayerState(state) => bincode::serialize(state),
            Message::PlatformState(state) => bincode::serialize(state),
            Message::ObjectCatalog(objects) => bincode::serialize(objects),
            Message::Selection(selection) => bincode::serialize(selection),
            Message::Placement(placement) => bincode::serialize(placement),
            Message::PhaseChange(change) => bincode::serialize(change),
            Message::RandomPlatforms(platforms) => bincode::serialize(platforms),
            Message::Finish(player_id) => bincode::serialize(player_id),
            Message::Fail(player_id) => bincode::serialize(player_id),
            Message::ScoreUpdate(update) => bincode::serialize(update),
            Message::RoundEnd(result) => bincode::serialize(result),
            Message::Disconnect(player_id) => bincode::serialize(player_id),
            Message::CreateRoomRequest(request) => bincode::serialize(request),
            Message::CreateRoomResponse(response) => bincode::serialize(response),
            Message::JoinRoomRequest(code) => bincode::serialize(code),
            Message::JoinRoomResponse(response) => bincode::serialize(response),
            Message::JoinRandomRoomRequest => Ok(Vec::new()),
            Message::RoomUpdate(info) => bincode::serialize(info),
            Message::PlayerReady(ready) => bincode::serialize(ready),
            Message::StartGame => Ok(Vec::new()),
            Message::ReturnToRoom => Ok(Vec::new()),
            Message::LeaveRoom => Ok(Vec::new()),
        }
        .map_err(|source| ProtocolError::MalformedBody { kind, source })?;

        let mut frame = Vec::with_capacity(2 + body.len());
        frame.push(PROTOCOL_VERSION);
        frame.push(kind as u8);
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Decodes a frame payload produced by [`Message::encode`] or an older
    /// peer. Never panics on malformed input.
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        if frame.len() < 2 {
            return Err(ProtocolError::TruncatedHeader);
        }
        let version = frame[0];
        if version == 0 || version > PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }
        let kind =
            MessageKind::from_byte(frame[1]).ok_or(ProtocolError::UnknownKind(frame[1]))?;
        let body = &frame[2..];

        let malformed = |source| ProtocolError::MalformedBody { kind, source };
        Ok(match kind {
            MessageKind::Init => Message::Init(bincode::deserialize(body).map_err(malformed)?),
            MessageKind::PlayerState => {
                Message::PlayerState(bincode::deserialize(body).map_err(malformed)?)
            }
            MessageKind::PlatformState => {
                Message::PlatformState(bincode::deserialize(body).map_err(malformed)?)
            }
            MessageKind::ObjectCatalog => Message::ObjectCatalog(decode_catalog(body, kind)?),
            MessageKind::Selection => {
                Message::Selection(bincode::deserialize(body).map_err(malformed)?)
            }
            MessageKind::Placement => Message::Placement(decode_placement(body, kind)?),
            MessageKind::PhaseChange => {
                Message::PhaseChange(bincode::deserialize(body).map_err(malformed)?)
            }
            MessageKind::RandomPlatforms => {
                Message::RandomPlatforms(bincode::deserialize(body).map_err(malformed)?)
            }
            MessageKind::Finish => Message::Finish(bincode::deserialize(body).map_err(malformed)?),
            MessageKind::Fail => Message::Fail(bincode::deserialize(body).map_err(malformed)?),
            MessageKind::ScoreUpdate => {
                Message::ScoreUpdate(bincode::deserialize(body).map_err(malformed)?)
            }
            MessageKind::RoundEnd => {
                Message::RoundEnd(bincode::deserialize(body).map_err(malformed)?)
            }
            MessageKind::Disconnect => {
                Message::Disconnect(bincode::deserialize(body).map_err(malformed)?)
            }
            MessageKind::CreateRoomRequest => {
                Message::CreateRoomRequest(bincode::deserialize(body).map_err(malformed)?)
            }
            MessageKind::CreateRoomResponse => {
                Message::CreateRoomResponse(bincode::deserialize(body).map_err(malformed)?)
            }
            MessageKind::JoinRoomRequest => {
                Message::JoinRoomRequest(bincode::deserialize(body).map_err(malformed)?)
            }
            MessageKind::JoinRoomResponse => {
                Message::JoinRoomResponse(bincode::deserialize(body).map_err(malformed)?)
            }
            MessageKind::JoinRandomRoomRequest => Message::JoinRandomRoomRequest,
            MessageKind::RoomUpdate => {
                Message::RoomUpdate(bincode::deserialize(body).map_err(malformed)?)
            }
            MessageKind::PlayerReady => {
                Message::PlayerReady(bincode::deserialize(body).map_err(malformed)?)
            }
            MessageKind::StartGame => Message::StartGame,
            MessageKind::ReturnToRoom => Message::ReturnToRoom,
            MessageKind::LeaveRoom => Message::LeaveRoom,
        })
    }
}

/// Decodes a placement body, falling back to the legacy layout when the
/// current one runs out of bytes. The current layout is tried first, so a
/// modern body can never be misread as a legacy one.
fn decode_placement(body: &[u8], kind: MessageKind) -> Result<Placement, ProtocolError> {
    match bincode::deserialize::<Placement>(body) {
        Ok(placement) => Ok(placement),
        Err(current_err) => bincode::deserialize::<LegacyPlacement>(body)
            .map(Placement::from)
            .map_err(|_| ProtocolError::MalformedBody {
                kind,
                source: current_err,
            }),
    }
}

/// Same fallback rule as [`decode_placement`] for whole catalogs.
fn decode_catalog(body: &[u8], kind: MessageKind) -> Result<Vec<GameObject>, ProtocolError> {
    match bincode::deserialize::<Vec<GameObject>>(body) {
        Ok(objects) => Ok(objects),
        Err(current_err) => bincode::deserialize::<Vec<LegacyGameObject>>(body)
            .map(|objects| objects.into_iter().map(GameObject::from).collect())
            .map_err(|_| ProtocolError::MalformedBody {
                kind,
                source: current_err,
            }),
    }
}

/// Writes one length-prefixed frame. Flushes so small latency-sensitive
/// updates leave immediately.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let frame = message.encode()?;
    if frame.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len: frame.len(),
            max: MAX_FRAME_LEN,
        });
    }
    writer.write_all(&(frame.len() as u32).to_be_bytes()).await?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame, blocking until it is complete.
///
/// Returns `Ok(None)` on orderly closure (EOF at a frame boundary). EOF in
/// the middle of a frame, an oversized length prefix and any decode failure
/// are errors; the caller is expected to terminate the session.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Message>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }

    let mut frame = vec![0u8; len];
    reader.read_exact(&mut frame).await?;
    Message::decode(&frame).map(Some)
}
