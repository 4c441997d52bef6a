// Simulation context and task loop.
//
// `SimContext` is one game instance. It owns everything the simulation
// touches: the scheduler and GVT, the dungeon map (tiles, items, entities,
// displaced queue), the PRNG, the config, the spawner and respawn state,
// hook registries and the observer list. Nothing is global. Tasks, hooks
// and actions all receive the context by `&mut`, so any number of
// instances can coexist in one process, each on its own thread.
//
// ## Time
//
// All progress is driven by `advance_to(target)`. It pops due tasks in
// `(time, priority, sequence)` order, sets GVT to each task's time and runs
// it. Tasks scheduled while running are picked up in the same call if they
// fall due. A task that returns an error is logged and dropped; the queue
// and GVT stay valid. Afterwards GVT rests at `target` and the events
// emitted since the last call are returned in a `StepResult`.
//
// ## Mutation API
//
// Host-facing world mutations live here and in the sibling files that
// extend `impl SimContext`:
// - tiles: `add_tile`, `rm_tile`, `clear_tiles`, `set_tile_access`,
//   `set_tile_items_mode`, `damage_tile`, `activate_tile`, `hit_tile`
//   (this file)
// - items: `add_item`, `remove_item` (this file), `drop_item`
//   (`placement.rs`), `add_displaced_item` (`respawn.rs`)
// - creatures: `damage_creature` (this file)
// - entities and motion: `motion.rs`
// - sweeps: `sweep.rs`
//
// Every mutation is a silent no-op when it cannot apply, returning `false`
// or `None`. Hooks fire after the change is in place.
//
// ## Snapshots
//
// `snapshot()` captures the observable world state (GVT, tiles by name,
// items, entities, displaced queue) as plain serde data. It is used to
// compare replicas, and is never loaded back.
//
// See also: `scheduler.rs`, `world.rs`, `dispatch.rs`, `motion.rs`,
// `config.rs`.
//
// **Critical constraint: determinism.** Two contexts built from the same
// config and seed, given the same sequence of calls, produce identical
// snapshots. Nothing here reads wall-clock time or OS entropy.

use crate::config::GameConfig;
use crate::dispatch::{ActionContext, DispatchState, SimEvent, SimEventKind, WorldObserver};
use crate::entity::{Entity, Motion};
use crate::error::SimResult;
use crate::item::{DisplacedItem, Item, ItemTypeHooks};
use crate::placement::DropParams;
use crate::respawn::RespawnState;
use crate::scheduler::{Scheduler, TaskKind};
use crate::spawner::Spawner;
use crate::tile::{ItemsMode, Tile};
use crate::types::*;
use crate::world::DungeonMap;
use dungeon_prng::DungeonRng;
use serde::Serialize;
use tracing::{debug, warn};

/// Events emitted since the previous step.
#[derive(Clone, Debug, Default)]
pub struct StepResult {
    pub events: Vec<SimEvent>,
}

pub struct SimContext {
    pub config: GameConfig,
    pub(crate) scheduler: Scheduler,
    pub(crate) map: DungeonMap,
    pub(crate) rng: DungeonRng,
    pub(crate) item_hooks: Vec<ItemTypeHooks>,
    pub(crate) spawner: Spawner,
    pub(crate) respawn: RespawnState,
    pub(crate) dispatch: DispatchState,
    pub(crate) event_log: Vec<SimEvent>,
    pub(crate) observers: Vec<Box<dyn WorldObserver + Send>>,
}

impl SimContext {
    /// Create an empty `width` x `height` dungeon at GVT 0.
    pub fn new(config: GameConfig, width: i32, height: i32, seed: u64) -> Self {
        let map = DungeonMap::new(width, height, config.approach_offset);
        let item_hooks = vec![ItemTypeHooks::default(); config.item_types.len()];
        Self {
            config,
            scheduler: Scheduler::new(),
            map,
            rng: DungeonRng::new(seed),
            item_hooks,
            spawner: Spawner::default(),
            respawn: RespawnState::default(),
            dispatch: DispatchState::default(),
            event_log: Vec::new(),
            observers: Vec::new(),
        }
    }

    pub fn from_json(json: &str, width: i32, height: i32, seed: u64) -> SimResult<Self> {
        Ok(Self::new(GameConfig::from_json(json)?, width, height, seed))
    }

    pub fn gvt(&self) -> u64 {
        self.scheduler.gvt()
    }

    pub fn map(&self) -> &DungeonMap {
        &self.map
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// The instance's generator, for scripted actions that need dice.
    pub fn rng(&mut self) -> &mut DungeonRng {
        &mut self.rng
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.map.entity(id)
    }

    /// `DungeonMap::access` at the current GVT.
    pub fn access(&self, mc: MapCoord, height: MapHeight, ignore: Option<EntityId>) -> MapAccess {
        self.map.access(mc, height, ignore, self.gvt())
    }

    /// `DungeonMap::target_creature` at the current GVT.
    pub fn target_creature(&self, attacker: EntityId, allow_both: bool) -> Option<EntityId> {
        self.map.target_creature(attacker, allow_both, self.gvt())
    }

    pub fn set_item_hooks(&mut self, item_type: ItemTypeId, hooks: ItemTypeHooks) {
        let idx = item_type.0 as usize;
        if idx >= self.item_hooks.len() {
            self.item_hooks.resize(idx + 1, ItemTypeHooks::default());
        }
        self.item_hooks[idx] = hooks;
    }

    // -----------------------------------------------------------------------
    // Task loop
    // -----------------------------------------------------------------------

    /// Schedule the periodic item and monster tasks. Call once the level has
    /// been built: the first item census counts what is there.
    pub fn start_background_tasks(&mut self) {
        self.start_item_tasks();
        let next = self.gvt() + self.config.monster_interval;
        self.scheduler
            .add_task(TaskKind::MonsterGeneration, Priority::Low, next);
    }

    /// Run every task due at or before `target`, then rest GVT at `target`.
    pub fn advance_to(&mut self, target: u64) -> StepResult {
        while let Some(task) = self.scheduler.pop_due(target) {
            debug!(time = task.time, sequence = task.sequence, kind = ?task.kind, "running task");
            if let Err(err) = self.run_task(task.kind) {
                warn!(gvt = self.gvt(), error = %err, "task failed and was dropped");
            }
        }
        self.scheduler.settle_at(target);
        StepResult {
            events: self.drain_events(),
        }
    }

    pub fn drain_events(&mut self) -> Vec<SimEvent> {
        std::mem::take(&mut self.event_log)
    }

    fn run_task(&mut self, kind: TaskKind) -> SimResult<()> {
        match kind {
            TaskKind::MotionComplete {
                entity,
                arrival_time,
            } => self.finish_motion(entity, arrival_time)?,
            TaskKind::ItemReplacement => self.run_item_replacement(),
            TaskKind::ItemRespawnCensus => self.run_respawn_census(),
            TaskKind::RespawnItem { item_type } => self.respawn_item(item_type),
            TaskKind::ItemCheck => self.run_item_check(),
            TaskKind::MonsterGeneration => self.run_monster_task(),
            TaskKind::RunAction { action, context } => {
                self.dispatch_action(&action, &context);
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Tiles
    // -----------------------------------------------------------------------

    pub fn register_tile(&mut self, tile: Tile) -> TileId {
        self.map.register_tile(tile)
    }

    pub fn tile(&self, id: TileId) -> Option<&Tile> {
        self.map.tile(id)
    }

    /// Place `tile` on `mc`. If the square's items are no longer welcome they
    /// are swept (or destroyed); creatures already standing there walk over
    /// the new tile.
    pub fn add_tile(&mut self, mc: MapCoord, tile: TileId, _originator: Originator) -> bool {
        let Some(t) = self.map.tile(tile) else {
            return false;
        };
        let (destroys, blocks) = (t.destroys_items(), !t.allows_items());
        let allowed_before = !self.map.blocks_items(mc);
        if !self.map.insert_tile(mc, tile) {
            return false;
        }
        self.on_add_tile(mc, tile);
        if destroys {
            self.remove_item(mc);
        } else if blocks && allowed_before {
            self.sweep_items(mc);
        }
        true
    }

    /// Remove one placement of `tile` from `mc`.
    pub fn rm_tile(&mut self, mc: MapCoord, tile: TileId, _originator: Originator) -> bool {
        if !self.map.remove_tile(mc, tile) {
            return false;
        }
        self.on_rm_tile(mc, tile);
        true
    }

    /// Remove every tile from `mc`. Returns how many went.
    pub fn clear_tiles(&mut self, mc: MapCoord, _originator: Originator) -> usize {
        let removed = self.map.take_all_tiles(mc);
        for &tile in &removed {
            self.on_rm_tile(mc, tile);
        }
        removed.len()
    }

    /// Change a tile's access, at one height or all of them, and sweep the
    /// creatures on `mc` to match.
    pub fn set_tile_access(
        &mut self,
        mc: MapCoord,
        tile: TileId,
        height: Option<MapHeight>,
        access: MapAccess,
        originator: Originator,
    ) -> bool {
        let Some(t) = self.map.tile_mut(tile) else {
            return false;
        };
        match height {
            Some(h) => t.access[h.access_slot()] = access,
            None => t.access = [access; ACCESS_SLOTS],
        }
        self.emit(SimEventKind::TileChanged { pos: mc, tile });
        self.sweep_creatures(mc, height, originator);
        true
    }

    pub fn set_tile_items_mode(&mut self, mc: MapCoord, tile: TileId, mode: ItemsMode) -> bool {
        let Some(t) = self.map.tile_mut(tile) else {
            return false;
        };
        t.items = mode;
        self.emit(SimEventKind::TileChanged { pos: mc, tile });
        if mode != ItemsMode::Allowed {
            self.sweep_items(mc);
        }
        true
    }

    /// Apply damage to a destructible tile. At zero hit points the tile is
    /// removed, its destroy hook runs, and a fragile item on the square
    /// breaks. Returns whether the tile was destroyed.
    pub fn damage_tile(&mut self, mc: MapCoord, tile: TileId, amount: i32, originator: Originator) -> bool {
        if !self.map.tiles_at(mc).contains(&tile) {
            return false;
        }
        let Some(t) = self.map.tile_mut(tile) else {
            return false;
        };
        if t.hit_points <= 0 {
            return false;
        }
        t.hit_points -= amount;
        if t.hit_points > 0 {
            return false;
        }
        debug!(%mc, name = %t.name, "tile destroyed");
        if !self.rm_tile(mc, tile, originator) {
            return false;
        }
        self.fire_tile_destroy(mc, tile, originator);
        let fragile = self
            .map
            .item(mc)
            .and_then(|i| self.config.item_type(i.item_type))
            .is_some_and(|t| t.fragile);
        if fragile {
            self.remove_item(mc);
        }
        true
    }

    /// Run the activate hook of the topmost tile on `mc` that has one, if
    /// the action says it is possible. Returns whether a hook ran cleanly.
    pub fn activate_tile(&mut self, mc: MapCoord, actor: Option<EntityId>, success: bool) -> bool {
        let found = self.map.tiles_at(mc).iter().find_map(|t| {
            let action = self.map.tile(*t)?.hooks.activate.clone()?;
            Some((*t, action))
        });
        let Some((tile, action)) = found else {
            return false;
        };
        let mut ctx = ActionContext::at(mc).with_tile(tile);
        ctx.success = success;
        if let Some(actor) = actor {
            ctx.actor = Some(actor);
            ctx.originator = self.originator_of(actor);
        }
        if !self.action_possible(&action, &ctx) {
            return false;
        }
        self.dispatch_action(&action, &ctx)
    }

    /// Run `tile`'s hit hook, as when a weapon or missile strikes it. Does
    /// nothing unless the tile is on `mc`.
    pub fn hit_tile(&mut self, mc: MapCoord, tile: TileId, actor: Option<EntityId>) -> bool {
        if !self.map.tiles_at(mc).contains(&tile) {
            return false;
        }
        self.fire_tile_hit(mc, tile, actor)
    }

    // -----------------------------------------------------------------------
    // Items
    // -----------------------------------------------------------------------

    /// Put `item` directly on an empty square. If a tile there refuses it,
    /// it is swept or destroyed straight away.
    pub fn add_item(&mut self, mc: MapCoord, item: Item) -> Result<(), Item> {
        let snapshot = item.clone();
        self.map.put_item(mc, item)?;
        self.emit(SimEventKind::ItemAdded {
            pos: mc,
            item: snapshot,
        });
        self.sweep_items(mc);
        Ok(())
    }

    pub fn remove_item(&mut self, mc: MapCoord) -> Option<Item> {
        let item = self.map.take_item(mc)?;
        self.emit(SimEventKind::ItemRemoved {
            pos: mc,
            item: item.clone(),
        });
        Some(item)
    }

    // -----------------------------------------------------------------------
    // Creatures
    // -----------------------------------------------------------------------

    /// Subtract hit points. At zero the creature dies. Returns whether it
    /// died.
    pub fn damage_creature(&mut self, id: EntityId, amount: i32, originator: Originator) -> bool {
        let Some(c) = self.map.entity_mut(id).and_then(Entity::as_creature_mut) else {
            return false;
        };
        c.hit_points -= amount;
        let hit_points = c.hit_points;
        self.emit(SimEventKind::CreatureDamaged {
            entity: id,
            amount,
            hit_points,
        });
        if hit_points > 0 {
            return false;
        }
        self.kill_creature(id, originator);
        true
    }

    /// Drop everything carried around the body, release the spawner slot,
    /// then remove and free the creature.
    fn kill_creature(&mut self, id: EntityId, originator: Originator) {
        let Some(e) = self.map.entity_mut(id) else {
            return;
        };
        let pos = e.pos;
        let Some(c) = e.as_creature_mut() else {
            return;
        };
        let carried = std::mem::take(&mut c.carried);
        let monster = c.monster_type;
        debug!(?id, ?originator, "creature died");
        self.emit(SimEventKind::CreatureDied {
            entity: id,
            originator,
        });
        for item in carried {
            let rest = match pos {
                Some(p) => self
                    .drop_item(p, item, DropParams::nonlocal(MapDirection::North))
                    .err(),
                None => Some(item),
            };
            if let Some(rest) = rest {
                self.add_displaced_item(rest);
            }
        }
        if let Some(monster) = monster {
            self.spawner.subtract(monster);
        }
        self.destroy_entity(id);
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    pub fn snapshot(&self) -> WorldSnapshot {
        let cells = self
            .map
            .coords()
            .filter_map(|mc| {
                let tiles: Vec<String> = self
                    .map
                    .tiles_at(mc)
                    .iter()
                    .filter_map(|t| self.map.tile(*t))
                    .map(|t| t.name.clone())
                    .collect();
                let item = self.map.item(mc).cloned();
                (!tiles.is_empty() || item.is_some()).then_some(CellSnapshot {
                    pos: mc,
                    tiles,
                    item,
                })
            })
            .collect();
        let entities = self
            .map
            .entities()
            .map(|(id, e)| EntitySnapshot {
                id,
                pos: e.pos,
                facing: e.facing,
                height: e.height,
                approaching: e.approaching,
                motion: e.motion,
                hit_points: e.as_creature().map(|c| c.hit_points),
            })
            .collect();
        WorldSnapshot {
            gvt: self.gvt(),
            cells,
            entities,
            displaced: self.map.displaced().iter().cloned().collect(),
            monsters: self.spawner.total(),
        }
    }

    pub fn snapshot_json(&self) -> SimResult<String> {
        Ok(serde_json::to_string(&self.snapshot())?)
    }
}

/// Observable state of a game instance at one GVT.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WorldSnapshot {
    pub gvt: u64,
    /// Squares holding at least one tile or an item, in map order.
    pub cells: Vec<CellSnapshot>,
    pub entities: Vec<EntitySnapshot>,
    pub displaced: Vec<DisplacedItem>,
    pub monsters: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CellSnapshot {
    pub pos: MapCoord,
    /// Tile names in stack order.
    pub tiles: Vec<String>,
    pub item: Option<Item>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub pos: Option<MapCoord>,
    pub facing: MapDirection,
    pub height: MapHeight,
    pub approaching: bool,
    pub motion: Motion,
    pub hit_points: Option<i32>,
}
