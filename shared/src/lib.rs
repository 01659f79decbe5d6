//! Types shared between the session server, game clients and the map tools:
//! the wire protocol, catalog/platform records and the persisted map format.

pub mod map;
pub mod objects;
pub mod protocol;

pub use map::MapConfig;
pub use objects::{catalog_templates, Color, GameObject, ObjectKind, PlatformRecord};
pub use protocol::{
    read_message, write_message, Message, MessageKind, Phase, PlayerState, ProtocolError,
    RoomInfo, RoomState, RoomVisibility, MAX_FRAME_LEN, PROTOCOL_VERSION,
};

pub const DEFAULT_PORT: u16 = 7878;
pub const DEFAULT_TOTAL_ROUNDS: u32 = 3;
pub const DEFAULT_MAX_PLAYERS: u8 = 4;

/// Fixed display palette. Colors are handed out round-robin at connect, so
/// identities stay visually distinct until the palette wraps.
pub const PLAYER_PALETTE: [Color; 8] = [
    Color::new(230, 60, 60),
    Color::new(60, 120, 230),
    Color::new(60, 200, 90),
    Color::new(240, 200, 40),
    Color::new(200, 80, 220),
    Color::new(60, 200, 220),
    Color::new(240, 140, 40),
    Color::new(150, 90, 220),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_palette_colors_are_distinct() {
        for (i, a) in PLAYER_PALETTE.iter().enumerate() {
            for b in PLAYER_PALETTE.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }
}
