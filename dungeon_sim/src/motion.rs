// Motion model and entity lifecycle on the map.
//
// A motion is started by `move_entity` (or `launch_missile` for the
// half-square missile start) and finished by a `MotionComplete` task
// scheduled one tick before arrival. Between the two the entity's progress
// is derived from GVT (`Entity::offset`); nothing is ticked.
//
//   Move      0 -> 1000 (approach_offset -> 1000 when leaving an approach,
//                        500 -> 1000 for a freshly launched missile)
//   Approach  0 -> approach_offset
//   Withdraw  approach_offset -> 0
//
// The completion task carries the arrival time it was scheduled for. Any
// later motion change (flip, new move, reposition, removal) changes or
// clears the live arrival time, which turns the old task into a no-op. That
// is the only cancellation mechanism.
//
// Every change to position, facing or motion follows the same dance:
// unindex, mutate, reindex, then notify (`dispatch.rs`). Hooks always see a
// consistent index.
//
// See also: `entity.rs` (offset math, `travel_time`), `world.rs` (indexing
// rule), `scheduler.rs`, `dispatch.rs` (`on_motion_changed`,
// `post_reposition`).
//
// **Critical constraint: determinism.** All timing is integer arithmetic on
// GVT and config values.

use crate::dispatch::SimEventKind;
use crate::entity::{Entity, EntityKind, Motion, travel_time};
use crate::error::SimResult;
use crate::scheduler::TaskKind;
use crate::sim::SimContext;
use crate::types::*;
use tracing::debug;

impl SimContext {
    // -----------------------------------------------------------------------
    // Map membership
    // -----------------------------------------------------------------------

    /// Put an off-map entity into the arena without placing it.
    pub fn create_entity(&mut self, mut entity: Entity) -> EntityId {
        entity.pos = None;
        entity.motion = Motion::default();
        entity.approaching = false;
        self.map.insert_entity(entity)
    }

    /// Place an off-map entity at `pos`. Cancels any motion. Returns `false`
    /// if the entity is stale, already on the map, or `pos` is invalid.
    pub fn add_to_map(&mut self, id: EntityId, pos: MapCoord, facing: MapDirection) -> bool {
        if !self.map.valid(pos) {
            return false;
        }
        let Some(e) = self.map.entity_mut(id) else {
            return false;
        };
        if e.pos.is_some() {
            return false;
        }
        e.pos = Some(pos);
        e.facing = facing;
        if let MapHeight::Missiles(_) = e.height {
            e.height = MapHeight::Missiles(facing);
        }
        e.motion = Motion::default();
        e.approaching = false;
        self.map.index_entity(id);
        self.emit(SimEventKind::EntityAdded { entity: id, pos });
        true
    }

    /// `create_entity` plus `add_to_map`. The entity is freed again if it
    /// cannot be placed.
    pub fn spawn_entity(
        &mut self,
        entity: Entity,
        pos: MapCoord,
        facing: MapDirection,
    ) -> Option<EntityId> {
        let id = self.create_entity(entity);
        if self.add_to_map(id, pos, facing) {
            Some(id)
        } else {
            self.map.free_entity(id);
            None
        }
    }

    /// Take an entity off the map, keeping it alive in the arena.
    pub fn rm_from_map(&mut self, id: EntityId) -> bool {
        if self.map.entity(id).and_then(|e| e.pos).is_none() {
            return false;
        }
        self.on_rm_entity(id);
        // A withdraw hook may already have removed it.
        if self.map.entity(id).and_then(|e| e.pos).is_none() {
            return true;
        }
        self.map.unindex_entity(id);
        if let Some(e) = self.map.entity_mut(id) {
            e.pos = None;
            e.motion = Motion::default();
            e.approaching = false;
        }
        true
    }

    /// Remove from the map if needed and free the handle. Returns the entity.
    pub fn destroy_entity(&mut self, id: EntityId) -> Option<Entity> {
        self.rm_from_map(id);
        self.map.free_entity(id)
    }

    /// Teleport to `pos`, cancelling motion, then fire walk-over hooks.
    pub fn reposition(&mut self, id: EntityId, pos: MapCoord) -> bool {
        if !self.map.valid(pos) || self.map.entity(id).and_then(|e| e.pos).is_none() {
            return false;
        }
        self.map.unindex_entity(id);
        if let Some(e) = self.map.entity_mut(id) {
            e.pos = Some(pos);
            e.motion = Motion::default();
            e.approaching = false;
        }
        self.map.index_entity(id);
        self.post_reposition(id);
        true
    }

    /// Turn on the spot. Ignored while moving or approaching.
    pub fn set_facing(&mut self, id: EntityId, facing: MapDirection) -> bool {
        let Some(e) = self.map.entity_mut(id) else {
            return false;
        };
        if e.is_moving() || e.approaching {
            return false;
        }
        e.facing = facing;
        if e.pos.is_some() {
            self.emit(SimEventKind::FacingChanged { entity: id, facing });
        }
        true
    }

    // -----------------------------------------------------------------------
    // Motion
    // -----------------------------------------------------------------------

    /// Start a motion of `kind` toward the square ahead. Silently does
    /// nothing for off-map or immobile entities, for `NotMoving`, for a
    /// withdraw when not approaching, and when the square ahead is past the
    /// map edge.
    pub fn move_entity(&mut self, id: EntityId, kind: MotionType) -> bool {
        self.start_motion(id, kind, false)
    }

    pub(crate) fn start_motion(&mut self, id: EntityId, kind: MotionType, missile_mode: bool) -> bool {
        let gvt = self.gvt();
        let ao = self.config.approach_offset;
        let walk_time = self.config.walk_time;
        let Some(e) = self.map.entity(id) else {
            return false;
        };
        if e.pos.is_none() || e.speed <= 0 || kind == MotionType::NotMoving {
            return false;
        }
        if kind == MotionType::Withdraw && !e.approaching {
            return false;
        }
        if kind != MotionType::Withdraw && !e.ahead().is_some_and(|mc| self.map.valid(mc)) {
            return false;
        }
        let (start_offset, distance) = match kind {
            MotionType::Approach => (0, ao),
            MotionType::Withdraw => (ao, ao),
            MotionType::Move if missile_mode => (HALFWAY, FULL_SQUARE - HALFWAY),
            MotionType::Move if e.approaching => (ao, FULL_SQUARE - ao),
            MotionType::Move | MotionType::NotMoving => (0, FULL_SQUARE),
        };
        let arrival_time = gvt + travel_time(walk_time, distance, e.speed);

        self.map.unindex_entity(id);
        if let Some(e) = self.map.entity_mut(id) {
            e.motion = Motion {
                kind,
                start_time: gvt,
                start_offset,
                arrival_time,
            };
            e.approaching = matches!(kind, MotionType::Approach | MotionType::Withdraw);
        }
        self.map.index_entity(id);
        self.schedule_completion(id, arrival_time);
        self.on_motion_changed(id);
        true
    }

    /// Finalize one tick early so the task still observes the in-transit
    /// state, and never later than arrival.
    fn schedule_completion(&mut self, id: EntityId, arrival_time: u64) {
        self.scheduler.add_task(
            TaskKind::MotionComplete {
                entity: id,
                arrival_time,
            },
            Priority::Normal,
            arrival_time.saturating_sub(1),
        );
    }

    /// Reverse a full move mid-transit. The entity swaps base square and
    /// facing, pauses for `turn_delay`, then travels back the distance it
    /// had covered.
    pub fn flip_motion(&mut self, id: EntityId) -> bool {
        let gvt = self.gvt();
        let ao = self.config.approach_offset;
        let Some(e) = self.map.entity(id) else {
            return false;
        };
        if e.motion.kind != MotionType::Move || e.approaching || e.speed <= 0 {
            return false;
        }
        let Some(ahead) = e.ahead() else {
            return false;
        };
        let covered = e.offset(gvt, ao).max(1);
        let start_time = gvt + self.config.turn_delay;
        let arrival_time = start_time + travel_time(self.config.walk_time, covered, e.speed);
        let facing = e.facing.opposite();

        self.map.unindex_entity(id);
        if let Some(e) = self.map.entity_mut(id) {
            e.pos = Some(ahead);
            e.facing = facing;
            if let MapHeight::Missiles(_) = e.height {
                e.height = MapHeight::Missiles(facing);
            }
            e.motion = Motion {
                kind: MotionType::Move,
                start_time,
                start_offset: FULL_SQUARE - covered,
                arrival_time,
            };
        }
        self.map.index_entity(id);
        self.schedule_completion(id, arrival_time);
        self.emit(SimEventKind::MotionFlipped { entity: id, facing });
        true
    }

    /// Body of the `MotionComplete` task.
    pub(crate) fn finish_motion(&mut self, id: EntityId, expected_arrival: u64) -> SimResult<()> {
        let gvt = self.gvt();
        let Some(e) = self.map.entity(id) else {
            return Ok(());
        };
        let live = e.pos.is_some()
            && e.is_moving()
            && e.motion.arrival_time == expected_arrival
            && gvt + 1 >= expected_arrival;
        if !live {
            debug!(?id, expected_arrival, "stale motion completion");
            return Ok(());
        }
        let kind = e.motion.kind;
        let is_missile = matches!(e.kind, EntityKind::Missile(_));
        let ahead = e.ahead();

        self.map.unindex_entity(id);
        if let Some(e) = self.map.entity_mut(id) {
            if kind == MotionType::Move {
                e.pos = ahead;
                e.approaching = false;
            } else if kind == MotionType::Withdraw {
                e.approaching = false;
            }
            e.motion = Motion::default();
        }
        self.map.index_entity(id);

        if kind == MotionType::Move {
            self.post_reposition(id);
        }
        if self.map.entity(id).is_some_and(|e| e.pos.is_some()) {
            self.on_motion_changed(id);
        }
        if is_missile && kind == MotionType::Move {
            self.missile_arrived(id);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Missiles
    // -----------------------------------------------------------------------

    /// Fire a missile from `pos` toward `dir`. It starts halfway out of
    /// `pos`. Returns `None` if the square cannot take a missile that way.
    pub fn launch_missile(
        &mut self,
        pos: MapCoord,
        dir: MapDirection,
        speed: i32,
        damage: i32,
        originator: Originator,
    ) -> Option<EntityId> {
        if !self.map.can_place_missile(pos, dir, self.gvt()) {
            return None;
        }
        let id = self.spawn_entity(Entity::missile(dir, speed, damage, originator), pos, dir)?;
        if !self.start_motion(id, MotionType::Move, true) {
            self.destroy_entity(id);
            return None;
        }
        Some(id)
    }

    /// A missile just entered a new square: strike a creature there, fly on
    /// if the way ahead is open, otherwise hit whatever blocks it and vanish.
    fn missile_arrived(&mut self, id: EntityId) {
        let gvt = self.gvt();
        let Some(e) = self.map.entity(id) else {
            return;
        };
        let EntityKind::Missile(m) = &e.kind else {
            return;
        };
        let (damage, originator, height) = (m.damage, m.originator, e.height);

        if let Some(victim) = self.map.target_creature(id, false, gvt) {
            debug!(?id, ?victim, "missile struck");
            self.destroy_entity(id);
            self.damage_creature(victim, damage, originator);
            return;
        }
        let Some(ahead) = self.map.entity(id).and_then(Entity::ahead) else {
            return;
        };
        if self.map.access(ahead, height, Some(id), gvt) > MapAccess::Blocked {
            self.start_motion(id, MotionType::Move, false);
            return;
        }
        let target = self
            .map
            .tiles_at(ahead)
            .iter()
            .copied()
            .find(|t| self.map.tile(*t).is_some_and(|t| t.targettable()));
        self.destroy_entity(id);
        if let Some(tile) = target {
            self.fire_tile_hit(ahead, tile, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::tile::Tile;

    fn sim() -> SimContext {
        SimContext::new(GameConfig::default(), 10, 10, 42)
    }

    fn knight(sim: &mut SimContext, pos: MapCoord, facing: MapDirection) -> EntityId {
        sim.spawn_entity(Entity::creature(MapHeight::Walking, 100, 10), pos, facing)
            .unwrap()
    }

    #[test]
    fn move_sets_timing_and_double_index() {
        let mut sim = sim();
        let id = knight(&mut sim, MapCoord::new(2, 2), MapDirection::East);
        assert!(sim.move_entity(id, MotionType::Move));
        let e = sim.entity(id).unwrap();
        assert_eq!(e.motion.arrival_time, 1000);
        assert_eq!(sim.map().entities_at(MapCoord::new(3, 2)), &[id]);
        // Completion sits one tick before arrival.
        assert_eq!(sim.scheduler().peek_time(), Some(999));
    }

    #[test]
    fn immobile_or_unplaced_entities_do_not_move() {
        let mut sim = sim();
        let statue = sim
            .spawn_entity(Entity::creature(MapHeight::Walking, 0, 10), MapCoord::new(1, 1), MapDirection::East)
            .unwrap();
        assert!(!sim.move_entity(statue, MotionType::Move));
        let ghost = sim.create_entity(Entity::creature(MapHeight::Walking, 100, 1));
        assert!(!sim.move_entity(ghost, MotionType::Move));
        let k = knight(&mut sim, MapCoord::new(4, 4), MapDirection::North);
        assert!(!sim.move_entity(k, MotionType::NotMoving));
        assert!(!sim.move_entity(k, MotionType::Withdraw));
        assert!(sim.scheduler().is_empty());
    }

    #[test]
    fn no_motion_past_the_map_edge() {
        let mut sim = sim();
        let id = knight(&mut sim, MapCoord::new(9, 2), MapDirection::East);
        assert!(!sim.move_entity(id, MotionType::Move));
        assert!(!sim.move_entity(id, MotionType::Approach));
        assert!(sim.scheduler().is_empty());
        let e = sim.entity(id).unwrap();
        assert!(!e.is_moving());
        assert_eq!(e.pos, Some(MapCoord::new(9, 2)));
    }

    #[test]
    fn approach_then_withdraw() {
        let mut sim = sim();
        let id = knight(&mut sim, MapCoord::new(2, 2), MapDirection::East);
        assert!(sim.move_entity(id, MotionType::Approach));
        sim.advance_to(250);
        let e = sim.entity(id).unwrap();
        assert!(e.approaching);
        assert!(!e.is_moving());
        assert_eq!(e.pos, Some(MapCoord::new(2, 2)));
        assert_eq!(e.offset(sim.gvt(), 250), 250);

        assert!(sim.move_entity(id, MotionType::Withdraw));
        sim.advance_to(600);
        let e = sim.entity(id).unwrap();
        assert!(!e.approaching);
        assert_eq!(e.offset(sim.gvt(), 250), 0);
    }

    #[test]
    fn move_from_approach_covers_the_rest() {
        let mut sim = sim();
        let id = knight(&mut sim, MapCoord::new(2, 2), MapDirection::East);
        sim.move_entity(id, MotionType::Approach);
        sim.advance_to(300);
        sim.move_entity(id, MotionType::Move);
        let e = sim.entity(id).unwrap();
        assert_eq!(e.motion.start_offset, 250);
        assert_eq!(e.motion.arrival_time, 300 + 750);
        sim.advance_to(2000);
        assert_eq!(sim.entity(id).unwrap().pos, Some(MapCoord::new(3, 2)));
    }

    #[test]
    fn flip_returns_to_origin() {
        let mut sim = sim();
        let id = knight(&mut sim, MapCoord::new(2, 2), MapDirection::East);
        sim.move_entity(id, MotionType::Move);
        sim.advance_to(400);
        assert!(sim.flip_motion(id));
        let e = sim.entity(id).unwrap();
        assert_eq!(e.pos, Some(MapCoord::new(3, 2)));
        assert_eq!(e.facing, MapDirection::West);
        assert_eq!(e.motion.start_offset, 600);
        assert_eq!(e.motion.start_time, 400 + 150);
        assert_eq!(e.motion.arrival_time, 400 + 150 + 400);
        // The first completion at 999 is now stale.
        sim.advance_to(1200);
        let e = sim.entity(id).unwrap();
        assert_eq!(e.pos, Some(MapCoord::new(2, 2)));
        assert_eq!(e.facing, MapDirection::West);
        assert!(!e.is_moving());
    }

    #[test]
    fn flip_ignored_unless_moving() {
        let mut sim = sim();
        let id = knight(&mut sim, MapCoord::new(2, 2), MapDirection::East);
        assert!(!sim.flip_motion(id));
        sim.move_entity(id, MotionType::Approach);
        assert!(!sim.flip_motion(id));
    }

    #[test]
    fn reposition_cancels_motion() {
        let mut sim = sim();
        let id = knight(&mut sim, MapCoord::new(2, 2), MapDirection::East);
        sim.move_entity(id, MotionType::Move);
        assert!(sim.reposition(id, MapCoord::new(7, 7)));
        assert!(sim.map().entities_at(MapCoord::new(3, 2)).is_empty());
        sim.advance_to(2000);
        let e = sim.entity(id).unwrap();
        assert_eq!(e.pos, Some(MapCoord::new(7, 7)));
        assert!(!sim.reposition(id, MapCoord::new(70, 7)));
    }

    #[test]
    fn facing_locked_while_moving() {
        let mut sim = sim();
        let id = knight(&mut sim, MapCoord::new(2, 2), MapDirection::East);
        assert!(sim.set_facing(id, MapDirection::South));
        sim.move_entity(id, MotionType::Move);
        assert!(!sim.set_facing(id, MapDirection::North));
        assert_eq!(sim.entity(id).unwrap().facing, MapDirection::South);
    }

    #[test]
    fn rm_from_map_keeps_handle_until_destroyed() {
        let mut sim = sim();
        let id = knight(&mut sim, MapCoord::new(2, 2), MapDirection::East);
        assert!(sim.rm_from_map(id));
        assert!(!sim.rm_from_map(id));
        assert!(sim.entity(id).is_some());
        assert!(sim.map().entities_at(MapCoord::new(2, 2)).is_empty());
        assert!(sim.add_to_map(id, MapCoord::new(5, 5), MapDirection::West));
        assert!(sim.destroy_entity(id).is_some());
        assert!(sim.entity(id).is_none());
        assert!(sim.map().entities_at(MapCoord::new(5, 5)).is_empty());
    }

    #[test]
    fn missile_hits_creature_in_its_path() {
        let mut sim = sim();
        let target = knight(&mut sim, MapCoord::new(5, 2), MapDirection::West);
        let bolt = sim
            .launch_missile(MapCoord::new(2, 2), MapDirection::East, 100, 3, Originator::Monster)
            .unwrap();
        // Half a square to (3,2), then full squares to (4,2) and (5,2).
        sim.advance_to(5000);
        assert!(sim.entity(bolt).is_none());
        let hp = sim.entity(target).and_then(|e| e.as_creature()).unwrap().hit_points;
        assert_eq!(hp, 7);
    }

    #[test]
    fn missile_breaks_on_wall_and_hits_it() {
        let mut sim = sim();
        let wall = sim.register_tile(Tile::new("wall", 0).with_access(MapAccess::Blocked));
        sim.add_tile(MapCoord::new(4, 2), wall, Originator::Environment);
        assert!(
            sim.launch_missile(MapCoord::new(3, 2), MapDirection::East, 100, 1, Originator::Monster)
                .is_none()
        );
        let bolt = sim
            .launch_missile(MapCoord::new(2, 2), MapDirection::East, 100, 1, Originator::Monster)
            .unwrap();
        sim.advance_to(3000);
        assert!(sim.entity(bolt).is_none());
        assert!(sim.map().entities_at(MapCoord::new(3, 2)).is_empty());
    }
}
