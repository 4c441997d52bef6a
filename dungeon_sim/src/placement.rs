// Item placement search, shared by creature drops, sweeps and respawn.
//
// `drop_item` looks for a square that can take an item:
// - an empty square where no tile refuses items, or
// - a square holding a stack of the same type with spare room.
//
// With `shift_forward`, the single square in the preferred direction is
// tried first, provided it can be approached (dropping into a chest).
// Otherwise a breadth-first search runs outward from the origin. Neighbours
// are expanded preferred direction first, then clockwise, anticlockwise and
// opposite. The search only passes through squares that could hold an item.
// A local search stops after the origin's four neighbours; a non-local one
// is unbounded.
//
// A stack that would overflow is filled to its maximum and the search goes
// on with the remainder. Whatever cannot be placed is handed back to the
// caller, who decides between the displaced queue and keeping it.
//
// See also: `sweep.rs` (`sweep_items`), `respawn.rs` (random-square
// placement), `sim.rs` (`damage_creature` drops carried items).
//
// **Critical constraint: determinism.** Neighbour order is fixed by the
// preferred direction; the closed set is only used for membership.

use crate::dispatch::SimEventKind;
use crate::item::Item;
use crate::sim::SimContext;
use crate::types::*;
use std::collections::{BTreeSet, VecDeque};

/// How a drop searches for room.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DropParams {
    pub allow_nonlocal: bool,
    pub shift_forward: bool,
    pub preferred: MapDirection,
    /// The creature dropping the item. Only actor drops fire `on_drop`.
    pub actor: Option<EntityId>,
}

impl DropParams {
    /// Origin square and its four neighbours only.
    pub fn local(preferred: MapDirection) -> Self {
        Self {
            allow_nonlocal: false,
            shift_forward: false,
            preferred,
            actor: None,
        }
    }

    pub fn nonlocal(preferred: MapDirection) -> Self {
        Self {
            allow_nonlocal: true,
            ..Self::local(preferred)
        }
    }

    pub fn shift_forward(mut self) -> Self {
        self.shift_forward = true;
        self
    }

    pub fn by(mut self, actor: EntityId) -> Self {
        self.actor = Some(actor);
        self
    }
}

impl SimContext {
    fn max_stack(&self, item_type: ItemTypeId) -> i32 {
        self.config.item_type(item_type).map_or(1, |t| t.max_stack)
    }

    /// Whether `item` (or part of it) can go on `mc`.
    pub fn check_drop_square(&self, mc: MapCoord, item: &Item) -> bool {
        if !self.map.valid(mc) {
            return false;
        }
        match self.map.item(mc) {
            Some(existing) => {
                existing.item_type == item.item_type
                    && existing.count() < self.max_stack(item.item_type)
            }
            None => !self.map.blocks_items(mc),
        }
    }

    fn find_drop_square(&self, origin: MapCoord, item: &Item, params: DropParams) -> Option<MapCoord> {
        if params.shift_forward {
            let forward = origin.displace(params.preferred);
            if self.map.tile_access(forward, MapHeight::Walking) == MapAccess::Approach
                && self.check_drop_square(forward, item)
            {
                return Some(forward);
            }
        }

        let p = params.preferred;
        let order = [p, p.clockwise(), p.anticlockwise(), p.opposite()];
        let mut open = VecDeque::from([origin]);
        let mut closed = BTreeSet::from([origin]);
        let mut expand = true;
        while let Some(mc) = open.pop_front() {
            if self.check_drop_square(mc, item) {
                return Some(mc);
            }
            if !expand {
                continue;
            }
            for dir in order {
                let next = mc.displace(dir);
                let passable = !self.map.blocks_items(next) || self.map.item(next).is_some();
                if self.map.valid(next) && passable && closed.insert(next) {
                    open.push_back(next);
                }
            }
            expand = params.allow_nonlocal;
        }
        None
    }

    /// Whether a local drop of `item` around `origin` would succeed. No side
    /// effects.
    pub fn can_drop_item(
        &self,
        origin: MapCoord,
        item: &Item,
        shift_forward: bool,
        preferred: MapDirection,
    ) -> bool {
        let mut params = DropParams::local(preferred);
        params.shift_forward = shift_forward;
        self.find_drop_square(origin, item, params).is_some()
    }

    /// Place `item` near `origin`. Returns the square that took the last of
    /// it, or hands back whatever could not be placed. An actor drop fires
    /// `on_drop` on every square that took part of the item.
    pub fn drop_item(&mut self, origin: MapCoord, mut item: Item, params: DropParams) -> Result<MapCoord, Item> {
        if item.count() == 0 {
            return Ok(origin);
        }
        let max_stack = self.max_stack(item.item_type);
        loop {
            let Some(mc) = self.find_drop_square(origin, &item, params) else {
                return Err(item);
            };
            let placed = match self.map.item_mut(mc) {
                Some(existing) => {
                    let taken = item.count().min(max_stack - existing.count());
                    existing.set_count(existing.count() + taken);
                    item.set_count(item.count() - taken);
                    existing.clone()
                }
                None => {
                    let snapshot = item.clone();
                    self.map.put_item(mc, item)?;
                    self.finish_drop(mc, snapshot, params.actor);
                    return Ok(mc);
                }
            };
            self.finish_drop(mc, placed, params.actor);
            if item.count() == 0 {
                return Ok(mc);
            }
        }
    }

    fn finish_drop(&mut self, mc: MapCoord, placed: Item, actor: Option<EntityId>) {
        let item_type = placed.item_type;
        self.emit(SimEventKind::ItemAdded { pos: mc, item: placed });
        if let Some(actor) = actor {
            self.fire_item_drop(mc, item_type, actor);
        }
    }
}
