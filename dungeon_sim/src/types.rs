// Core types shared across the simulation.
//
// Grid coordinates (`MapCoord`), compass directions, the height and access
// lattices used by collision, motion kinds, scheduler priorities, arena
// handles for entities and tiles, and compact ids for data-table rows.
//
// Conventions: x grows East, y grows South. `MapCoord` orders by y then x so
// that "every cell in map order" iteration matches row-major storage in
// `world.rs`.
//
// See also: `world.rs` (grid storage), `entity.rs` (motion state),
// `scheduler.rs` (uses `Priority`).
//
// **Critical constraint: determinism.** Every ordering defined here is total
// and value-based. Nothing compares pointers or hashes.

use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use std::cmp::Ordering;
use std::fmt;

/// Transit offsets are measured in thousandths of a square.
pub const FULL_SQUARE: i32 = 1000;

/// Offset at which a moving entity counts as being in its destination cell.
pub const HALFWAY: i32 = 500;

// ---------------------------------------------------------------------------
// Spatial types
// ---------------------------------------------------------------------------

/// A square on the dungeon grid. `MapCoord::NULL` is the "nowhere" sentinel
/// and is never `valid` on any map.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MapCoord {
    pub x: i32,
    pub y: i32,
}

impl MapCoord {
    pub const NULL: MapCoord = MapCoord { x: -2, y: -2 };

    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn is_null(self) -> bool {
        self == Self::NULL
    }

    /// The neighbouring square one step in `dir`.
    pub fn displace(self, dir: MapDirection) -> Self {
        let (dx, dy) = dir.delta();
        Self::new(self.x + dx, self.y + dy)
    }

    pub fn neighbours(self) -> [MapCoord; 4] {
        MapDirection::ALL.map(|d| self.displace(d))
    }
}

impl Default for MapCoord {
    fn default() -> Self {
        Self::NULL
    }
}

impl Ord for MapCoord {
    fn cmp(&self, other: &Self) -> Ordering {
        self.y.cmp(&other.y).then_with(|| self.x.cmp(&other.x))
    }
}

impl PartialOrd for MapCoord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for MapCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "(null)")
        } else {
            write!(f, "({}, {})", self.x, self.y)
        }
    }
}

/// Half-open rectangle `[left, right) x [bottom, top)` used for random
/// square selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapRect {
    pub left: i32,
    pub bottom: i32,
    pub right: i32,
    pub top: i32,
}

impl MapRect {
    pub fn is_empty(&self) -> bool {
        self.left >= self.right || self.bottom >= self.top
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MapDirection {
    North,
    East,
    South,
    West,
}

impl MapDirection {
    pub const ALL: [MapDirection; 4] = [
        MapDirection::North,
        MapDirection::East,
        MapDirection::South,
        MapDirection::West,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(i: usize) -> Self {
        Self::ALL[i % 4]
    }

    pub fn opposite(self) -> Self {
        Self::from_index(self.index() + 2)
    }

    pub fn clockwise(self) -> Self {
        Self::from_index(self.index() + 1)
    }

    pub fn anticlockwise(self) -> Self {
        Self::from_index(self.index() + 3)
    }

    fn delta(self) -> (i32, i32) {
        match self {
            MapDirection::North => (0, -1),
            MapDirection::East => (1, 0),
            MapDirection::South => (0, 1),
            MapDirection::West => (-1, 0),
        }
    }
}

/// Collision layer. Entities only collide with entities at the same height.
///
/// Missiles are direction-qualified so that two missiles flying in opposite
/// directions can pass through each other. Tiles do not distinguish missile
/// directions: every `Missiles(_)` height reads the same access slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MapHeight {
    Walking,
    Flying,
    Missiles(MapDirection),
}

/// Number of per-height access slots a tile stores.
pub const ACCESS_SLOTS: usize = 3;

impl MapHeight {
    /// Index into a tile's access array.
    pub fn access_slot(self) -> usize {
        match self {
            MapHeight::Walking => 0,
            MapHeight::Flying => 1,
            MapHeight::Missiles(_) => 2,
        }
    }
}

/// How freely an entity may enter a square. Ordered, so the effective
/// access of a stack of tiles is the minimum over the stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MapAccess {
    Blocked,
    /// Can be partially entered (doors, chests) but not occupied.
    Approach,
    Clear,
}

// ---------------------------------------------------------------------------
// Motion and scheduling
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MotionType {
    #[default]
    NotMoving,
    /// Full move into the square ahead.
    Move,
    /// Partial move toward the square ahead, stopping at the approach offset.
    Approach,
    /// Reverse of an approach, back to the base square.
    Withdraw,
}

/// Tie-break for tasks scheduled at the same virtual time. Higher runs first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Normal,
    High,
}

// ---------------------------------------------------------------------------
// Handles and compact ids
// ---------------------------------------------------------------------------

new_key_type! {
    /// Generation-checked handle to an entity. Stale after the entity is
    /// destroyed, even if its slot is reused.
    pub struct EntityId;

    /// Generation-checked handle to a registered tile. One tile may be
    /// placed in several cells; tile identity is this handle.
    pub struct TileId;
}

macro_rules! compact_id {
    ($(#[$meta:meta])* $name:ident, $repr:ty) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub $repr);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

compact_id!(
    /// Row in the item type table (`GameConfig::item_types`).
    ItemTypeId,
    u16
);
compact_id!(
    /// Row in the monster type table (`GameConfig::monster_types`).
    MonsterTypeId,
    u16
);
compact_id!(PlayerId, u32);

/// Who is responsible for a mutation. Carried through sweeps and hooks so
/// that damage and kills can be credited.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Originator {
    #[default]
    Environment,
    Player(PlayerId),
    Monster,
}
