// Tiles: the static furniture of a square (floor, wall, door, chest, corpse).
//
// A tile contributes an access value per height slot, an items policy, a
// stacking depth and an optional hit-point pool. Behavior is composition, not
// subclassing: each scripted reaction (walk-over, approach, withdraw,
// activate, hit, destroy) is an optional `Action` in `TileHooks`. A door is
// just a tile whose access is flipped by its activate action.
//
// Tiles are registered once in the tile arena and then placed into cells by
// `TileId`. The same tile may sit in many cells; a tile with per-square state
// (a door) should be registered once per square.
//
// See also: `world.rs` (depth-sorted cell stacks), `sim.rs` (`add_tile`,
// `rm_tile`, `set_tile_access`, `damage_tile`), `dispatch.rs` (hook firing).

use crate::dispatch::ActionRef;
use crate::types::{ACCESS_SLOTS, MapAccess, MapHeight};
use serde::{Deserialize, Serialize};

/// What a tile does to items on its square.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemsMode {
    #[default]
    Allowed,
    /// Items may not rest here; existing ones are swept elsewhere.
    Blocked,
    /// Items landing here are destroyed.
    Destroy,
}

#[derive(Clone, Debug, Default)]
pub struct TileHooks {
    pub walk_over: Option<ActionRef>,
    pub approach: Option<ActionRef>,
    pub withdraw: Option<ActionRef>,
    pub activate: Option<ActionRef>,
    pub hit: Option<ActionRef>,
    pub destroy: Option<ActionRef>,
}

#[derive(Clone, Debug)]
pub struct Tile {
    pub name: String,
    /// Stacking key. Cell stacks are kept in descending depth order; a new
    /// tile goes after every tile of greater or equal depth.
    pub depth: i32,
    pub(crate) access: [MapAccess; ACCESS_SLOTS],
    pub(crate) items: ItemsMode,
    /// Remaining hit points. Zero or below means indestructible.
    pub hit_points: i32,
    pub hooks: TileHooks,
}

impl Tile {
    /// A clear, item-friendly, indestructible tile.
    pub fn new(name: impl Into<String>, depth: i32) -> Self {
        Self {
            name: name.into(),
            depth,
            access: [MapAccess::Clear; ACCESS_SLOTS],
            items: ItemsMode::Allowed,
            hit_points: 0,
            hooks: TileHooks::default(),
        }
    }

    /// Set the same access at every height.
    pub fn with_access(mut self, access: MapAccess) -> Self {
        self.access = [access; ACCESS_SLOTS];
        self
    }

    pub fn with_height_access(mut self, height: MapHeight, access: MapAccess) -> Self {
        self.access[height.access_slot()] = access;
        self
    }

    pub fn with_items(mut self, mode: ItemsMode) -> Self {
        self.items = mode;
        self
    }

    pub fn with_hit_points(mut self, hp: i32) -> Self {
        self.hit_points = hp;
        self
    }

    pub fn with_hooks(mut self, hooks: TileHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn access(&self, height: MapHeight) -> MapAccess {
        self.access[height.access_slot()]
    }

    pub fn items_mode(&self) -> ItemsMode {
        self.items
    }

    pub fn allows_items(&self) -> bool {
        self.items == ItemsMode::Allowed
    }

    pub fn destroys_items(&self) -> bool {
        self.items == ItemsMode::Destroy
    }

    /// Walls, doors and anything with a hit reaction. Bare floors are not
    /// targettable.
    pub fn targettable(&self) -> bool {
        self.access(MapHeight::Walking) != MapAccess::Clear || self.hooks.hit.is_some()
    }
}
