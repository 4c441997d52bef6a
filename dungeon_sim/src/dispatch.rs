// Hook dispatch: the bridge between world mutations and scripted actions.
//
// The scripting runtime is external. All the sim needs from it is the
// `Action` capability: `execute` against the sim plus a context, and
// `possible` as a side-effect-free query. Tiles and item types hold
// `ActionRef`s in their hook slots; named hooks can also be registered on
// the sim and fired with `run_hook`.
//
// Ordering contract: every hook fires strictly after the structural change
// that triggered it is visible in the world, synchronously, before the
// mutating call returns. Hooks may mutate the world again, so dispatch is
// reentrant. Nesting is bounded by `max_dispatch_depth`: a dispatch that
// would exceed it is skipped with a warning (`SimError::DispatchDepthExceeded`).
//
// Script failures never propagate out of a hook. They are logged with
// `tracing::warn!`, recorded as a `ScriptFailed` event, and counted; after
// `max_script_error_reports` reports further ones are only counted.
//
// Observation: every mutation emits a `SimEvent`, which is appended to the
// sim's event log (drained by `advance_to`) and forwarded to any registered
// `WorldObserver`s. Observers are notification-only and cannot veto.
//
// See also: `tile.rs` (`TileHooks`), `item.rs` (`ItemTypeHooks`), `motion.rs`
// (motion-change and reposition notifications), `sim.rs` (tile mutations).
//
// **Critical constraint: determinism.** Hooks fire in tile-stack order and
// entity-index order. Named hooks are looked up by name, never iterated.

use crate::entity::{Entity, EntityKind};
use crate::error::{ScriptError, SimError, SimResult};
use crate::item::Item;
use crate::scheduler::TaskKind;
use crate::sim::SimContext;
use crate::tile::TileHooks;
use crate::types::*;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

// ---------------------------------------------------------------------------
// Action capability
// ---------------------------------------------------------------------------

/// References handed to an action. Every field is optional except the
/// originator; which ones are set depends on the hook.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActionContext {
    pub actor: Option<EntityId>,
    pub victim: Option<EntityId>,
    pub item: Option<ItemTypeId>,
    pub tile: Option<TileId>,
    pub pos: Option<MapCoord>,
    pub originator: Originator,
    /// For activations: whether the triggering control succeeded.
    pub success: bool,
}

impl ActionContext {
    pub fn at(pos: MapCoord) -> Self {
        Self {
            pos: Some(pos),
            ..Self::default()
        }
    }

    pub fn with_actor(mut self, actor: EntityId) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn with_tile(mut self, tile: TileId) -> Self {
        self.tile = Some(tile);
        self
    }

    pub fn with_originator(mut self, originator: Originator) -> Self {
        self.originator = originator;
        self
    }
}

/// A scripted behavior. Implemented by the embedding scripting layer, and by
/// the combinators below.
pub trait Action: fmt::Debug + Send + Sync {
    fn execute(&self, sim: &mut SimContext, ctx: &ActionContext) -> Result<(), ScriptError>;

    fn possible(&self, _sim: &SimContext, _ctx: &ActionContext) -> bool {
        true
    }
}

pub type ActionRef = Arc<dyn Action>;

type ExecFn = dyn Fn(&mut SimContext, &ActionContext) -> Result<(), ScriptError> + Send + Sync;
type PossibleFn = dyn Fn(&SimContext, &ActionContext) -> bool + Send + Sync;

/// An action backed by a closure.
pub struct FnAction {
    name: String,
    exec: Box<ExecFn>,
    possible: Option<Box<PossibleFn>>,
}

impl FnAction {
    pub fn new(
        name: impl Into<String>,
        exec: impl Fn(&mut SimContext, &ActionContext) -> Result<(), ScriptError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            exec: Box::new(exec),
            possible: None,
        }
    }

    pub fn with_possible(
        mut self,
        possible: impl Fn(&SimContext, &ActionContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.possible = Some(Box::new(possible));
        self
    }

    pub fn into_ref(self) -> ActionRef {
        Arc::new(self)
    }
}

impl fmt::Debug for FnAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FnAction").field(&self.name).finish()
    }
}

impl Action for FnAction {
    fn execute(&self, sim: &mut SimContext, ctx: &ActionContext) -> Result<(), ScriptError> {
        (self.exec)(sim, ctx)
    }

    fn possible(&self, sim: &SimContext, ctx: &ActionContext) -> bool {
        self.possible.as_ref().is_none_or(|p| p(sim, ctx))
    }
}

/// Runs each action in order, stopping at the first failure. Possible only
/// if every member is.
#[derive(Debug, Default)]
pub struct ListAction(pub Vec<ActionRef>);

impl Action for ListAction {
    fn execute(&self, sim: &mut SimContext, ctx: &ActionContext) -> Result<(), ScriptError> {
        for action in &self.0 {
            action.execute(sim, ctx)?;
        }
        Ok(())
    }

    fn possible(&self, sim: &SimContext, ctx: &ActionContext) -> bool {
        self.0.iter().all(|a| a.possible(sim, ctx))
    }
}

/// Runs one action picked by weight from the sim's generator.
#[derive(Debug, Default)]
pub struct RandomAction {
    choices: Vec<(u32, ActionRef)>,
}

impl RandomAction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, weight: u32, action: ActionRef) -> Self {
        self.choices.push((weight, action));
        self
    }
}

impl Action for RandomAction {
    fn execute(&self, sim: &mut SimContext, ctx: &ActionContext) -> Result<(), ScriptError> {
        let weights: Vec<u32> = self.choices.iter().map(|(w, _)| *w).collect();
        match sim.rng.pick_weighted(&weights) {
            Some(i) => self.choices[i].1.execute(sim, ctx),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Observation
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SimEvent {
    pub gvt: u64,
    pub kind: SimEventKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum SimEventKind {
    EntityAdded { entity: EntityId, pos: MapCoord },
    EntityRemoved { entity: EntityId, pos: MapCoord },
    EntityRepositioned { entity: EntityId, pos: MapCoord },
    MotionChanged { entity: EntityId, motion: MotionType },
    MotionFlipped { entity: EntityId, facing: MapDirection },
    FacingChanged { entity: EntityId, facing: MapDirection },
    TileAdded { pos: MapCoord, tile: TileId },
    TileRemoved { pos: MapCoord, tile: TileId },
    /// A placed tile's access or items mode changed.
    TileChanged { pos: MapCoord, tile: TileId },
    /// Also emitted when a drop merges into an existing stack; `item` is the
    /// cell's contents afterwards.
    ItemAdded { pos: MapCoord, item: Item },
    ItemRemoved { pos: MapCoord, item: Item },
    ItemRespawned { pos: MapCoord, item_type: ItemTypeId },
    CreatureDamaged { entity: EntityId, amount: i32, hit_points: i32 },
    CreatureDied { entity: EntityId, originator: Originator },
    ScriptFailed { message: String },
}

/// Receives every event as it happens. Rendering and sound layers hang off
/// this.
pub trait WorldObserver {
    fn observe(&mut self, event: &SimEvent);
}

// ---------------------------------------------------------------------------
// Dispatch state
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub(crate) struct DispatchState {
    depth: u32,
    script_errors: u32,
    named_hooks: FxHashMap<String, ActionRef>,
}

impl SimContext {
    pub(crate) fn emit(&mut self, kind: SimEventKind) {
        let event = SimEvent {
            gvt: self.gvt(),
            kind,
        };
        for observer in &mut self.observers {
            observer.observe(&event);
        }
        self.event_log.push(event);
    }

    pub fn add_observer(&mut self, observer: Box<dyn WorldObserver + Send>) {
        self.observers.push(observer);
    }

    /// Total script failures seen, including suppressed reports.
    pub fn script_error_count(&self) -> u32 {
        self.dispatch.script_errors
    }

    /// Execute an action under the depth cap. Errors are returned, not
    /// reported; hook firing goes through `dispatch_action`, which reports.
    pub fn run_action(&mut self, action: &ActionRef, ctx: &ActionContext) -> SimResult<()> {
        let limit = self.config.max_dispatch_depth;
        if self.dispatch.depth >= limit {
            return Err(SimError::DispatchDepthExceeded { limit });
        }
        self.dispatch.depth += 1;
        let result = action.execute(self, ctx);
        self.dispatch.depth -= 1;
        result.map_err(SimError::from)
    }

    pub fn action_possible(&self, action: &ActionRef, ctx: &ActionContext) -> bool {
        action.possible(self, ctx)
    }

    /// Run an action at a dispatch boundary: any failure is reported and
    /// swallowed. Returns whether the action completed.
    pub(crate) fn dispatch_action(&mut self, action: &ActionRef, ctx: &ActionContext) -> bool {
        match self.run_action(action, ctx) {
            Ok(()) => true,
            Err(SimError::DispatchDepthExceeded { limit }) => {
                warn!(limit, ?action, "hook dispatch depth limit reached, skipping");
                false
            }
            Err(err) => {
                self.report_script_error(&err);
                false
            }
        }
    }

    fn report_script_error(&mut self, err: &SimError) {
        self.dispatch.script_errors += 1;
        if self.dispatch.script_errors > self.config.max_script_error_reports {
            return;
        }
        warn!(error = %err, "script failure");
        if self.dispatch.script_errors == self.config.max_script_error_reports {
            warn!("further script failures will not be reported");
        }
        self.emit(SimEventKind::ScriptFailed {
            message: err.to_string(),
        });
    }

    // -----------------------------------------------------------------------
    // Named hooks and delayed actions
    // -----------------------------------------------------------------------

    pub fn register_hook(&mut self, name: impl Into<String>, action: ActionRef) {
        self.dispatch.named_hooks.insert(name.into(), action);
    }

    pub fn unregister_hook(&mut self, name: &str) -> Option<ActionRef> {
        self.dispatch.named_hooks.remove(name)
    }

    /// Fire a named hook. Returns `false` if no such hook is registered or
    /// it failed.
    pub fn run_hook(&mut self, name: &str, ctx: &ActionContext) -> bool {
        let Some(action) = self.dispatch.named_hooks.get(name).cloned() else {
            return false;
        };
        self.dispatch_action(&action, ctx)
    }

    /// Run `action` `delay` ms from now. This is the "sleep then resume"
    /// primitive for scripts.
    pub fn schedule_action(&mut self, action: ActionRef, context: ActionContext, delay: u64) {
        self.schedule_action_with(action, context, delay, Priority::Normal);
    }

    /// `schedule_action` with an explicit tie-break priority.
    pub fn schedule_action_with(
        &mut self,
        action: ActionRef,
        context: ActionContext,
        delay: u64,
        priority: Priority,
    ) {
        let time = self.gvt() + delay;
        self.scheduler
            .add_task(TaskKind::RunAction { action, context }, priority, time);
    }

    // -----------------------------------------------------------------------
    // Built-in hook firing
    // -----------------------------------------------------------------------

    /// Who gets the credit for things this entity does.
    pub(crate) fn originator_of(&self, id: EntityId) -> Originator {
        match self.map.entity(id).map(|e| &e.kind) {
            Some(EntityKind::Creature(c)) => match (c.player, c.monster_type) {
                (Some(p), _) => Originator::Player(p),
                (None, Some(_)) => Originator::Monster,
                (None, None) => Originator::Environment,
            },
            Some(EntityKind::Missile(m)) => m.originator,
            None => Originator::Environment,
        }
    }

    fn fire_tile_hook(
        &mut self,
        mc: MapCoord,
        tile: TileId,
        actor: Option<EntityId>,
        select: fn(&TileHooks) -> &Option<ActionRef>,
    ) -> bool {
        let Some(action) = self.map.tile(tile).and_then(|t| select(&t.hooks).clone()) else {
            return false;
        };
        let mut ctx = ActionContext::at(mc).with_tile(tile);
        if let Some(actor) = actor {
            ctx.actor = Some(actor);
            ctx.originator = self.originator_of(actor);
        }
        self.dispatch_action(&action, &ctx)
    }

    pub(crate) fn fire_tile_walk_over(&mut self, mc: MapCoord, tile: TileId, actor: EntityId) {
        self.fire_tile_hook(mc, tile, Some(actor), |h| &h.walk_over);
    }

    pub(crate) fn fire_tile_hit(&mut self, mc: MapCoord, tile: TileId, actor: Option<EntityId>) -> bool {
        self.fire_tile_hook(mc, tile, actor, |h| &h.hit)
    }

    pub(crate) fn fire_tile_destroy(&mut self, mc: MapCoord, tile: TileId, originator: Originator) {
        let Some(action) = self.map.tile(tile).and_then(|t| t.hooks.destroy.clone()) else {
            return;
        };
        let ctx = ActionContext::at(mc).with_tile(tile).with_originator(originator);
        self.dispatch_action(&action, &ctx);
    }

    /// Approach or withdraw hooks for every tile in the square `id` faces.
    fn fire_facing_hooks(&mut self, id: EntityId, select: fn(&TileHooks) -> &Option<ActionRef>) {
        let Some(ahead) = self.map.entity(id).and_then(Entity::ahead) else {
            return;
        };
        let tiles = self.map.tiles_at(ahead).to_vec();
        for tile in tiles {
            self.fire_tile_hook(ahead, tile, Some(id), select);
        }
    }

    pub(crate) fn fire_item_drop(&mut self, mc: MapCoord, item_type: ItemTypeId, actor: EntityId) {
        let hook = self
            .item_hooks
            .get(item_type.0 as usize)
            .and_then(|h| h.on_drop.clone());
        if let Some(action) = hook {
            let mut ctx = ActionContext::at(mc).with_actor(actor);
            ctx.item = Some(item_type);
            ctx.originator = self.originator_of(actor);
            self.dispatch_action(&action, &ctx);
        }
    }

    /// Creatures standing on `mc` walk over a tile that just appeared
    /// beneath them.
    pub(crate) fn on_add_tile(&mut self, mc: MapCoord, tile: TileId) {
        self.emit(SimEventKind::TileAdded { pos: mc, tile });
        let standing: Vec<EntityId> = self
            .map
            .entities_at(mc)
            .iter()
            .copied()
            .filter(|id| self.map.entity(*id).is_some_and(|e| walks_over(e, mc)))
            .collect();
        for id in standing {
            self.fire_tile_walk_over(mc, tile, id);
        }
    }

    /// Creatures approaching `mc` withdraw from a tile that just vanished.
    pub(crate) fn on_rm_tile(&mut self, mc: MapCoord, tile: TileId) {
        self.emit(SimEventKind::TileRemoved { pos: mc, tile });
        let approaching: Vec<EntityId> = self
            .map
            .all_entities_at(mc)
            .into_iter()
            .filter(|id| {
                self.map.entity(*id).is_some_and(|e| {
                    e.pos != Some(mc) && e.is_creature() && e.is_settled() && e.approaching
                })
            })
            .collect();
        for id in approaching {
            self.fire_tile_hook(mc, tile, Some(id), |h| &h.withdraw);
        }
    }

    /// After an entity lands on a new square: tile walk-over hooks, then the
    /// walk-over hook of the item lying there. Stops early if a hook moves
    /// the creature away.
    pub(crate) fn post_reposition(&mut self, id: EntityId) {
        let Some(pos) = self.map.entity(id).and_then(|e| e.pos) else {
            return;
        };
        self.emit(SimEventKind::EntityRepositioned { entity: id, pos });
        let still_here = |sim: &SimContext| {
            sim.map
                .entity(id)
                .is_some_and(|e| walks_over(e, pos))
        };
        if !still_here(self) {
            return;
        }
        let tiles = self.map.tiles_at(pos).to_vec();
        for tile in tiles {
            self.fire_tile_walk_over(pos, tile, id);
            if !still_here(self) {
                return;
            }
        }
        let Some(item_type) = self.map.item(pos).map(|i| i.item_type) else {
            return;
        };
        let hook = self
            .item_hooks
            .get(item_type.0 as usize)
            .and_then(|h| h.walk_over.clone());
        if let Some(action) = hook {
            let mut ctx = ActionContext::at(pos).with_actor(id);
            ctx.item = Some(item_type);
            ctx.originator = self.originator_of(id);
            self.dispatch_action(&action, &ctx);
        }
    }

    /// Starting a withdraw fires withdraw hooks; finishing an approach fires
    /// approach hooks. Both target the tiles in the square ahead.
    pub(crate) fn on_motion_changed(&mut self, id: EntityId) {
        let Some(e) = self.map.entity(id) else {
            return;
        };
        let motion = e.motion.kind;
        let settled_approach = e.is_settled() && e.approaching;
        self.emit(SimEventKind::MotionChanged { entity: id, motion });
        if motion == MotionType::Withdraw {
            self.fire_facing_hooks(id, |h| &h.withdraw);
        } else if settled_approach {
            self.fire_facing_hooks(id, |h| &h.approach);
        }
    }

    /// A settled creature leaving the map mid-approach withdraws first.
    pub(crate) fn on_rm_entity(&mut self, id: EntityId) {
        let Some(e) = self.map.entity(id) else {
            return;
        };
        let Some(pos) = e.pos else {
            return;
        };
        let withdrawing = e.is_creature() && e.is_settled() && e.approaching;
        self.emit(SimEventKind::EntityRemoved { entity: id, pos });
        if withdrawing {
            self.fire_facing_hooks(id, |h| &h.withdraw);
        }
    }
}

/// Walk-over hooks only concern settled walking creatures fully inside `mc`.
fn walks_over(e: &Entity, mc: MapCoord) -> bool {
    e.is_creature()
        && e.pos == Some(mc)
        && e.is_settled()
        && !e.approaching
        && e.height == MapHeight::Walking
}
