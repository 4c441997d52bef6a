// Consistency sweeps run after a square's tiles change under its contents.
//
// `sweep_items` evicts an item that may no longer rest on its square (or
// destroys it, for item-destroying tiles). The eviction uses a non-local
// drop, falling back to the displaced queue, so the item is never lost.
//
// `sweep_creatures` handles a change in a square's access:
// - Crush: creatures in the square (or moving into it) that can no longer
//   be there take `door_closed_damage`.
// - Approachers: creatures on neighbouring squares approaching this one
//   either finish the move in (the square became clear) or withdraw (it
//   became blocked).
//
// Both sweeps are idempotent: once the square is consistent a second call
// changes nothing.
//
// See also: `sim.rs` (`add_tile`, `set_tile_access`, `set_tile_items_mode`),
// `placement.rs`, `motion.rs`.

use crate::placement::DropParams;
use crate::sim::SimContext;
use crate::types::*;

impl SimContext {
    /// Make sure the item on `mc`, if any, is allowed to be there.
    pub fn sweep_items(&mut self, mc: MapCoord) {
        if self.map.item(mc).is_none() {
            return;
        }
        let destroys = self
            .map
            .tiles_at(mc)
            .iter()
            .filter_map(|t| self.map.tile(*t))
            .any(|t| t.destroys_items());
        if destroys {
            self.remove_item(mc);
            return;
        }
        if !self.map.blocks_items(mc) {
            return;
        }
        let Some(item) = self.remove_item(mc) else {
            return;
        };
        if let Err(rest) = self.drop_item(mc, item, DropParams::nonlocal(MapDirection::North)) {
            self.add_displaced_item(rest);
        }
    }

    /// Reconcile entities with a change of access on `mc`. `height` limits
    /// the sweep to one height; `None` sweeps all of them.
    pub fn sweep_creatures(&mut self, mc: MapCoord, height: Option<MapHeight>, originator: Originator) {
        let gvt = self.gvt();
        let ao = self.config.approach_offset;
        let damage = self.config.door_closed_damage;
        let in_height = |h: MapHeight| height.is_none_or(|want| want == h);

        let occupants = self.map.entities_at(mc).to_vec();
        for id in occupants {
            let Some(e) = self.map.entity(id) else {
                continue;
            };
            if !e.is_creature() || !in_height(e.height) {
                continue;
            }
            let inside = e.nearest_pos(gvt, ao) == Some(mc)
                || (e.motion.kind == MotionType::Move && e.ahead() == Some(mc));
            if inside && self.map.access(mc, e.height, Some(id), gvt) <= MapAccess::Approach {
                self.damage_creature(id, damage, originator);
            }
        }

        for id in self.map.all_entities_at(mc) {
            let Some(e) = self.map.entity(id) else {
                continue;
            };
            if !e.approaching || e.pos == Some(mc) || !in_height(e.height) {
                continue;
            }
            let motion = e.motion.kind;
            match self.map.access(mc, e.height, Some(id), gvt) {
                MapAccess::Approach => {}
                MapAccess::Clear
                    if matches!(motion, MotionType::NotMoving | MotionType::Approach) =>
                {
                    self.move_entity(id, MotionType::Move);
                }
                _ if motion != MotionType::Withdraw => {
                    self.move_entity(id, MotionType::Withdraw);
                }
                _ => {}
            }
        }
    }
}
