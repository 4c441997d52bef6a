// Data-driven game configuration.
//
// Every tunable number the simulation reads lives in `GameConfig`, loaded
// from JSON when a game instance is created. The struct is
// `#[serde(default)]`, so a JSON document only needs the keys it overrides.
// Replicas of the same game must be built from identical configs.
//
// The item and monster tables are plain data rows (`ItemTypeData`,
// `MonsterTypeData`) addressed by `ItemTypeId` / `MonsterTypeId` index.
// Scripted behavior attached to item types (drop and walk-over actions) is
// registered at runtime on the sim, since actions are not data.
//
// See also: `sim.rs` which owns the config, `item.rs` for `ItemTypeData`,
// `spawner.rs` for `MonsterTypeData`.
//
// **Critical constraint: determinism.** Config values feed straight into
// motion timing and spawn rolls. All integer; no floats.

use crate::error::SimResult;
use crate::item::ItemTypeData;
use crate::spawner::MonsterTypeData;
use crate::types::{ItemTypeId, MapHeight, MonsterTypeId};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    // --- Motion ---
    /// Milliseconds for a speed-100 entity to cross one full square.
    pub walk_time: i64,
    /// How far (in thousandths of a square) an approach reaches.
    pub approach_offset: i32,
    /// Pause before a reversed motion resumes.
    pub turn_delay: u64,

    // --- Consistency sweeps ---
    /// Damage dealt to a creature left inside a square that closed on it.
    pub door_closed_damage: i32,

    // --- Displaced items ---
    /// Delay between displaced-item placement runs.
    pub item_replacement_interval: u64,
    /// Random-square placement attempts per run.
    pub replacement_attempts_per_run: u32,
    /// Failed tries after which an important item evicts whatever sits on
    /// its chosen square.
    pub important_item_tries: u32,

    // --- Item respawn / check ---
    /// Period of the item-respawn census.
    pub item_respawn_interval: u64,
    /// Delay before a missing item is re-created. Negative disables respawn.
    pub item_respawn_delay: i64,
    /// Period of the required-item check.
    pub item_check_interval: u64,
    /// Item types the respawn census tracks.
    pub respawn_item_types: Vec<ItemTypeId>,

    // --- Spawner ---
    pub monster_interval: u64,
    /// Squares around each player creature eligible for monster generation.
    pub monster_radius: i32,
    /// Percent chance that a corpse decays or reanimates on a generation roll.
    pub zombie_chance: i32,
    /// Percent chance that a (non-zombie) generator tile produces a monster.
    pub bat_chance: i32,
    pub monster_generation_attempts: u32,
    pub necromancy_attempts: u32,
    /// `None` means no total cap.
    pub total_monster_limit: Option<u32>,

    // --- Dispatch ---
    /// Maximum nesting of hook actions triggered from inside hook actions.
    pub max_dispatch_depth: u32,
    /// Script failures reported before further reports are suppressed.
    pub max_script_error_reports: u32,

    // --- Data tables ---
    pub item_types: Vec<ItemTypeData>,
    pub monster_types: Vec<MonsterTypeData>,
}

impl GameConfig {
    /// Parse a config from JSON. Missing keys take their default values.
    pub fn from_json(json: &str) -> SimResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn item_type(&self, id: ItemTypeId) -> Option<&ItemTypeData> {
        self.item_types.get(id.0 as usize)
    }

    pub fn monster_type(&self, id: MonsterTypeId) -> Option<&MonsterTypeData> {
        self.monster_types.get(id.0 as usize)
    }
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            walk_time: 1000,
            approach_offset: 250,
            turn_delay: 150,
            door_closed_damage: 2,
            item_replacement_interval: 1000,
            replacement_attempts_per_run: 20,
            important_item_tries: 10,
            item_respawn_interval: 1000,
            item_respawn_delay: 60_000,
            item_check_interval: 2000,
            respawn_item_types: vec![ItemTypeId(0)],
            monster_interval: 500,
            monster_radius: 10,
            zombie_chance: 10,
            bat_chance: 20,
            monster_generation_attempts: 5,
            necromancy_attempts: 60,
            total_monster_limit: None,
            max_dispatch_depth: 32,
            max_script_error_reports: 10,
            item_types: vec![
                ItemTypeData {
                    name: "potion".into(),
                    max_stack: 1,
                    fragile: true,
                },
                ItemTypeData {
                    name: "dagger".into(),
                    max_stack: 8,
                    fragile: false,
                },
                ItemTypeData {
                    name: "key".into(),
                    max_stack: 1,
                    fragile: false,
                },
            ],
            monster_types: vec![
                MonsterTypeData {
                    name: "zombie".into(),
                    height: MapHeight::Walking,
                    speed: 50,
                    hit_points: 3,
                    limit: None,
                },
                MonsterTypeData {
                    name: "vampire bat".into(),
                    height: MapHeight::Flying,
                    speed: 120,
                    hit_points: 1,
                    limit: Some(5),
                },
            ],
        }
    }
}
