//! Catalog objects and platform records shared by the server, clients and
//! the map editing tools.

use serde::{Deserialize, Serialize};

/// RGB display color assigned to players and platform objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Behavior tag of a catalog object or placed platform.
///
/// Older peers only ever produced `Normal` platforms and omit the tag on the
/// wire entirely; the codec fills it in during decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ObjectKind {
    #[default]
    Normal,
    Death,
    Eraser,
    MovingH,
    MovingV,
    Bounce,
    Turret,
    Rotating,
}

impl ObjectKind {
    /// Whether instances of this kind carry meaningful motion/firing
    /// parameters (`speed`, `range`, `fire_rate`).
    pub fn is_dynamic(self) -> bool {
        matches!(
            self,
            ObjectKind::MovingH | ObjectKind::MovingV | ObjectKind::Turret | ObjectKind::Rotating
        )
    }
}

/// One selectable entry of the per-round object catalog.
///
/// Field order matters on the wire: everything after `selected` was added in
/// a later protocol revision, and [`LegacyGameObject`] is exactly the prefix
/// an older peer produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameObject {
    pub id: u32,
    pub width: u32,
    pub height: u32,
    pub color: Color,
    pub selected: bool,
    pub rotation: f32,
    pub kind: ObjectKind,
    pub speed: f32,
    pub range: f32,
    pub fire_rate: f32,
}

impl GameObject {
    pub fn new(id: u32, width: u32, height: u32, color: Color) -> Self {
        Self {
            id,
            width,
            height,
            color,
            selected: false,
            rotation: 0.0,
            kind: ObjectKind::Normal,
            speed: 0.0,
            range: 0.0,
            fire_rate: 0.0,
        }
    }
}

/// Older wire layout of [`GameObject`], predating rotation, kinds and the
/// motion parameters. Kept only so the codec can decode frames from peers
/// and recordings that still use it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyGameObject {
    pub id: u32,
    pub width: u32,
    pub height: u32,
    pub color: Color,
    pub selected: bool,
}

impl From<LegacyGameObject> for GameObject {
    fn from(old: LegacyGameObject) -> Self {
        Self {
            id: old.id,
            width: old.width,
            height: old.height,
            color: old.color,
            selected: old.selected,
            rotation: 0.0,
            kind: ObjectKind::Normal,
            speed: 0.0,
            range: 0.0,
            fire_rate: 0.0,
        }
    }
}

/// A platform definition as persisted in map files and in server-authored
/// round layouts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformRecord {
    pub x: f32,
    pub y: f32,
    pub width: u32,
    pub height: u32,
    pub color: Color,
    pub rotation: f32,
    pub kind: ObjectKind,
}

impl PlatformRecord {
    pub fn new(x: f32, y: f32, width: u32, height: u32, color: Color) -> Self {
        Self {
            x,
            y,
            width,
            height,
            color,
            rotation: 0.0,
            kind: ObjectKind::Normal,
        }
    }
}

/// The fixed set of object templates offered each selection phase. Ids match
/// the template's index in the returned catalog; `selected` starts false.
pub fn catalog_templates() -> Vec<GameObject> {
    let mut catalog = vec![
        GameObject::new(0, 96, 24, Color::new(120, 120, 120)),
        GameObject::new(1, 160, 24, Color::new(90, 90, 90)),
        GameObject {
            kind: ObjectKind::Death,
            ..GameObject::new(2, 64, 24, Color::new(200, 40, 40))
        },
        GameObject {
            kind: ObjectKind::Eraser,
            ..GameObject::new(3, 48, 48, Color::new(240, 240, 240))
        },
        GameObject {
            kind: ObjectKind::MovingH,
            speed: 80.0,
            range: 160.0,
            ..GameObject::new(4, 96, 24, Color::new(60, 120, 200))
        },
        GameObject {
            kind: ObjectKind::MovingV,
            speed: 60.0,
            range: 120.0,
            ..GameObject::new(5, 96, 24, Color::new(60, 200, 120))
        },
        GameObject {
            kind: ObjectKind::Bounce,
            ..GameObject::new(6, 64, 24, Color::new(230, 160, 30))
        },
        GameObject {
            kind: ObjectKind::Turret,
            range: 300.0,
            fire_rate: 1.5,
            ..GameObject::new(7, 32, 32, Color::new(150, 60, 180))
        },
        GameObject {
            kind: ObjectKind::Rotating,
            speed: 45.0,
            ..GameObject::new(8, 128, 16, Color::new(200, 200, 60))
        },
    ];

    // Ids must equal catalog position so selection lookups stay O(1) client side.
    for (index, object) in catalog.iter_mut().enumerate() {
        object.id = index as u32;
    }
    catalog
}
