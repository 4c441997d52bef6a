// Lock-step replica harness for the dungeon simulation.
//
// A `ReplayScript` is a JSON document describing a dungeon (size, seed,
// config, tile palette) and a list of host commands. `Replica` builds a
// fresh `SimContext` from the script and applies the commands one by one,
// recording a JSON world snapshot after every `advance`. Running several
// replicas of the same script, each on its own rayon worker, must yield
// identical snapshot traces: that is the property remote peers rely on to
// stay in sync from identical input streams.
//
// Commands refer to tiles by palette name and to creatures by the order in
// which the script spawned them, so a script is independent of the handles
// a particular replica hands out. A command that names an unknown tile or
// creature is skipped with a warning, the same way the sim itself ignores
// impossible requests.
//
// See also: `tests/lockstep.rs` for the scenarios.

use std::collections::BTreeMap;

use dungeon_sim::config::GameConfig;
use dungeon_sim::entity::Entity;
use dungeon_sim::error::SimResult;
use dungeon_sim::item::Item;
use dungeon_sim::sim::SimContext;
use dungeon_sim::spawner::SpawnRule;
use dungeon_sim::tile::{ItemsMode, Tile};
use dungeon_sim::types::*;
use rayon::prelude::*;
use serde::Deserialize;
use tracing::{debug, warn};

/// One entry of the tile palette.
#[derive(Clone, Debug, Deserialize)]
pub struct TileSpec {
    pub name: String,
    #[serde(default)]
    pub depth: i32,
    #[serde(default = "clear")]
    pub access: MapAccess,
    #[serde(default)]
    pub items: ItemsMode,
    #[serde(default)]
    pub hit_points: i32,
}

fn clear() -> MapAccess {
    MapAccess::Clear
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ReplayCommand {
    AddTile {
        x: i32,
        y: i32,
        tile: String,
    },
    RmTile {
        x: i32,
        y: i32,
        tile: String,
    },
    SetAccess {
        x: i32,
        y: i32,
        tile: String,
        access: MapAccess,
    },
    DamageTile {
        x: i32,
        y: i32,
        tile: String,
        amount: i32,
    },
    AddItem {
        x: i32,
        y: i32,
        item_type: u16,
        count: i32,
    },
    Displace {
        item_type: u16,
        count: i32,
    },
    Spawn {
        x: i32,
        y: i32,
        facing: MapDirection,
        speed: i32,
        hit_points: i32,
        #[serde(default)]
        player: Option<u32>,
    },
    Move {
        creature: usize,
        motion: MotionType,
    },
    Flip {
        creature: usize,
    },
    Damage {
        creature: usize,
        amount: i32,
    },
    Missile {
        x: i32,
        y: i32,
        facing: MapDirection,
        speed: i32,
        damage: i32,
    },
    RequireItems {
        item_type: u16,
        count: i32,
    },
    /// Make every placement of `tile` a generator of `monster`.
    Generator {
        tile: String,
        monster: u16,
    },
    StartBackground,
    Advance {
        ms: u64,
    },
}

#[derive(Clone, Debug, Deserialize)]
pub struct ReplayScript {
    pub width: i32,
    pub height: i32,
    pub seed: u64,
    #[serde(default)]
    pub config: GameConfig,
    #[serde(default)]
    pub tiles: Vec<TileSpec>,
    pub commands: Vec<ReplayCommand>,
}

impl ReplayScript {
    pub fn from_json(json: &str) -> SimResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Same script, different seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// One game instance driven by a script.
pub struct Replica {
    sim: SimContext,
    tiles: BTreeMap<String, TileId>,
    creatures: Vec<Option<EntityId>>,
}

impl Replica {
    pub fn new(script: &ReplayScript) -> Self {
        let mut sim = SimContext::new(script.config.clone(), script.width, script.height, script.seed);
        let tiles = script
            .tiles
            .iter()
            .map(|spec| {
                let tile = Tile::new(spec.name.clone(), spec.depth)
                    .with_access(spec.access)
                    .with_items(spec.items)
                    .with_hit_points(spec.hit_points);
                (spec.name.clone(), sim.register_tile(tile))
            })
            .collect();
        Self {
            sim,
            tiles,
            creatures: Vec::new(),
        }
    }

    pub fn sim(&self) -> &SimContext {
        &self.sim
    }

    fn tile(&self, name: &str) -> Option<TileId> {
        let found = self.tiles.get(name).copied();
        if found.is_none() {
            warn!(name, "script names an unknown tile");
        }
        found
    }

    fn creature(&self, index: usize) -> Option<EntityId> {
        let found = self.creatures.get(index).copied().flatten();
        if found.is_none() {
            warn!(index, "script names an unknown creature");
        }
        found
    }

    /// Apply one command. Returns the snapshot taken after an `Advance`.
    pub fn apply(&mut self, command: &ReplayCommand) -> SimResult<Option<String>> {
        let env = Originator::Environment;
        match command {
            ReplayCommand::AddTile { x, y, tile } => {
                if let Some(t) = self.tile(tile) {
                    self.sim.add_tile(MapCoord::new(*x, *y), t, env);
                }
            }
            ReplayCommand::RmTile { x, y, tile } => {
                if let Some(t) = self.tile(tile) {
                    self.sim.rm_tile(MapCoord::new(*x, *y), t, env);
                }
            }
            ReplayCommand::SetAccess { x, y, tile, access } => {
                if let Some(t) = self.tile(tile) {
                    self.sim
                        .set_tile_access(MapCoord::new(*x, *y), t, None, *access, env);
                }
            }
            ReplayCommand::DamageTile { x, y, tile, amount } => {
                if let Some(t) = self.tile(tile) {
                    self.sim.damage_tile(MapCoord::new(*x, *y), t, *amount, env);
                }
            }
            ReplayCommand::AddItem {
                x,
                y,
                item_type,
                count,
            } => {
                let item = self.make_item(*item_type, *count);
                if self.sim.add_item(MapCoord::new(*x, *y), item).is_err() {
                    debug!(x, y, "square already holds an item");
                }
            }
            ReplayCommand::Displace { item_type, count } => {
                let item = self.make_item(*item_type, *count);
                self.sim.add_displaced_item(item);
            }
            ReplayCommand::Spawn {
                x,
                y,
                facing,
                speed,
                hit_points,
                player,
            } => {
                let mut entity = Entity::creature(MapHeight::Walking, *speed, *hit_points);
                if let Some(c) = entity.as_creature_mut() {
                    c.player = player.map(PlayerId);
                }
                let id = self.sim.spawn_entity(entity, MapCoord::new(*x, *y), *facing);
                self.creatures.push(id);
            }
            ReplayCommand::Move { creature, motion } => {
                if let Some(id) = self.creature(*creature) {
                    self.sim.move_entity(id, *motion);
                }
            }
            ReplayCommand::Flip { creature } => {
                if let Some(id) = self.creature(*creature) {
                    self.sim.flip_motion(id);
                }
            }
            ReplayCommand::Damage { creature, amount } => {
                if let Some(id) = self.creature(*creature) {
                    self.sim.damage_creature(id, *amount, env);
                }
            }
            ReplayCommand::Missile {
                x,
                y,
                facing,
                speed,
                damage,
            } => {
                self.sim
                    .launch_missile(MapCoord::new(*x, *y), *facing, *speed, *damage, env);
            }
            ReplayCommand::RequireItems { item_type, count } => {
                self.sim.set_required_items(ItemTypeId(*item_type), *count);
            }
            ReplayCommand::Generator { tile, monster } => {
                if let Some(t) = self.tile(tile) {
                    let rule = SpawnRule::Generate {
                        monster: MonsterTypeId(*monster),
                        zombie_mode: false,
                    };
                    self.sim.set_spawn_rule(t, rule);
                }
            }
            ReplayCommand::StartBackground => self.sim.start_background_tasks(),
            ReplayCommand::Advance { ms } => {
                let target = self.sim.gvt() + ms;
                self.sim.advance_to(target);
                return Ok(Some(self.sim.snapshot_json()?));
            }
        }
        Ok(None)
    }

    fn make_item(&self, item_type: u16, count: i32) -> Item {
        let item_type = ItemTypeId(item_type);
        let max_stack = self
            .sim
            .config
            .item_type(item_type)
            .map_or(1, |t| t.max_stack);
        Item::new(item_type, count, max_stack)
    }
}

/// Run `script` on a fresh replica and return its snapshot trace.
pub fn run_replica(script: &ReplayScript) -> SimResult<Vec<String>> {
    let mut replica = Replica::new(script);
    let mut trace = Vec::new();
    for command in &script.commands {
        if let Some(snapshot) = replica.apply(command)? {
            trace.push(snapshot);
        }
    }
    Ok(trace)
}

/// Run `count` independent replicas of `script` in parallel.
pub fn run_lockstep(script: &ReplayScript, count: usize) -> SimResult<Vec<Vec<String>>> {
    (0..count)
        .into_par_iter()
        .map(|_| run_replica(script))
        .collect()
}

/// Index of the first snapshot at which any trace differs from the first.
pub fn first_divergence(traces: &[Vec<String>]) -> Option<usize> {
    let (reference, rest) = traces.split_first()?;
    rest.iter()
        .filter_map(|trace| {
            let mismatch = reference.iter().zip(trace).position(|(a, b)| a != b);
            let shorter = reference.len().min(trace.len());
            mismatch.or((reference.len() != trace.len()).then_some(shorter))
        })
        .min()
}
