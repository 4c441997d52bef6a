// Entities: creatures and missiles sharing one position/motion model.
//
// An entity's `pos` is always its *base* square. While moving it travels
// toward `pos.displace(facing)`; how far it has got is not stored but derived
// from GVT by `offset()`, a pure function of the motion window
// `[start_time, arrival_time]` and the motion type's endpoint. Only the
// completion task (see `motion.rs`) ever changes `pos`.
//
// Creature vs. missile is a tagged variant (`EntityKind`) chosen at
// construction; code that needs creature-only behavior matches on it.
//
// See also: `motion.rs` (move/flip/finish), `world.rs` (indexing rule),
// `types.rs` (`FULL_SQUARE`, `HALFWAY`).
//
// **Critical constraint: determinism.** Offsets are integer arithmetic on
// integer times. Same GVT, same answer, on every replica.

use crate::item::Item;
use crate::types::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Motion {
    pub kind: MotionType,
    pub start_time: u64,
    pub start_offset: i32,
    /// Zero whenever `kind` is `NotMoving`.
    pub arrival_time: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatureData {
    pub hit_points: i32,
    /// Set for spawner-created monsters so deaths can be counted down.
    pub monster_type: Option<MonsterTypeId>,
    /// Set for player-controlled creatures (knights).
    pub player: Option<PlayerId>,
    /// Items carried. Dropped around the corpse on death.
    pub carried: Vec<Item>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissileData {
    pub damage: i32,
    pub originator: Originator,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    Creature(CreatureData),
    Missile(MissileData),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub kind: EntityKind,
    /// Base square, or `None` while off the map.
    pub pos: Option<MapCoord>,
    pub facing: MapDirection,
    pub height: MapHeight,
    /// 100 is normal walking speed. Zero or below cannot move.
    pub speed: i32,
    /// Partially entered the square ahead (door, chest).
    pub approaching: bool,
    pub motion: Motion,
}

impl Entity {
    pub fn creature(height: MapHeight, speed: i32, hit_points: i32) -> Self {
        Self {
            kind: EntityKind::Creature(CreatureData {
                hit_points,
                monster_type: None,
                player: None,
                carried: Vec::new(),
            }),
            pos: None,
            facing: MapDirection::North,
            height,
            speed,
            approaching: false,
            motion: Motion::default(),
        }
    }

    /// A missile flies at the height qualified by its direction of travel.
    pub fn missile(facing: MapDirection, speed: i32, damage: i32, originator: Originator) -> Self {
        Self {
            kind: EntityKind::Missile(MissileData { damage, originator }),
            pos: None,
            facing,
            height: MapHeight::Missiles(facing),
            speed,
            approaching: false,
            motion: Motion::default(),
        }
    }

    pub fn with_facing(mut self, facing: MapDirection) -> Self {
        self.facing = facing;
        self
    }

    pub fn is_creature(&self) -> bool {
        matches!(self.kind, EntityKind::Creature(_))
    }

    pub fn as_creature(&self) -> Option<&CreatureData> {
        match &self.kind {
            EntityKind::Creature(c) => Some(c),
            EntityKind::Missile(_) => None,
        }
    }

    pub fn as_creature_mut(&mut self) -> Option<&mut CreatureData> {
        match &mut self.kind {
            EntityKind::Creature(c) => Some(c),
            EntityKind::Missile(_) => None,
        }
    }

    pub fn is_moving(&self) -> bool {
        self.motion.kind != MotionType::NotMoving
    }

    /// On the map, not moving and not part-way into the next square.
    pub fn is_settled(&self) -> bool {
        self.pos.is_some() && !self.is_moving()
    }

    /// The square ahead of the base square.
    pub fn ahead(&self) -> Option<MapCoord> {
        self.pos.map(|p| p.displace(self.facing))
    }

    /// Offset at which the current motion type comes to rest.
    fn endpoint(&self, approach_offset: i32) -> i32 {
        match self.motion.kind {
            MotionType::Move => FULL_SQUARE,
            MotionType::Approach => approach_offset,
            MotionType::Withdraw | MotionType::NotMoving => 0,
        }
    }

    /// Progress toward the square ahead, in thousandths of a square.
    pub fn offset(&self, gvt: u64, approach_offset: i32) -> i32 {
        if self.pos.is_none() {
            return 0;
        }
        if !self.is_moving() {
            return if self.approaching { approach_offset } else { 0 };
        }
        let m = &self.motion;
        if gvt <= m.start_time {
            return m.start_offset;
        }
        let end = self.endpoint(approach_offset);
        if gvt >= m.arrival_time {
            return end;
        }
        let elapsed = (gvt - m.start_time) as i64;
        let span = (m.arrival_time - m.start_time) as i64;
        let delta = (end - m.start_offset) as i64;
        let ofs = m.start_offset as i64 + delta * elapsed / span;
        ofs.clamp(0, FULL_SQUARE as i64) as i32
    }

    /// The square the entity is mostly in: the square ahead once the offset
    /// passes halfway, otherwise the base square.
    pub fn nearest_pos(&self, gvt: u64, approach_offset: i32) -> Option<MapCoord> {
        if self.offset(gvt, approach_offset) >= HALFWAY {
            self.ahead()
        } else {
            self.pos
        }
    }
}

/// Milliseconds to cover `distance` thousandths of a square at `speed`.
/// Never less than 1, so a completion task always lies in the future.
pub fn travel_time(walk_time: i64, distance: i32, speed: i32) -> u64 {
    if speed <= 0 {
        return 1;
    }
    let t = walk_time * distance as i64 * 100 / (speed as i64 * FULL_SQUARE as i64);
    t.max(1) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn moving_east(start: u64, arrival: u64, start_offset: i32, kind: MotionType) -> Entity {
        let mut e = Entity::creature(MapHeight::Walking, 100, 5).with_facing(MapDirection::East);
        e.pos = Some(MapCoord::new(2, 2));
        e.motion = Motion {
            kind,
            start_time: start,
            start_offset,
            arrival_time: arrival,
        };
        e
    }

    #[test]
    fn travel_time_scales_with_speed() {
        assert_eq!(travel_time(1000, 1000, 100), 1000);
        assert_eq!(travel_time(1000, 1000, 200), 500);
        assert_eq!(travel_time(1000, 250, 100), 250);
        assert_eq!(travel_time(1000, 500, 100), 500);
        // Very fast entities still take at least one tick.
        assert_eq!(travel_time(1, 1, 10_000), 1);
    }

    #[test]
    fn offset_interpolates_move() {
        let e = moving_east(1000, 2000, 0, MotionType::Move);
        assert_eq!(e.offset(1000, 250), 0);
        assert_eq!(e.offset(1500, 250), 500);
        assert_eq!(e.offset(1999, 250), 999);
        assert_eq!(e.offset(2000, 250), 1000);
        assert_eq!(e.offset(5000, 250), 1000);
        assert_eq!(e.offset(10, 250), 0);
    }

    #[test]
    fn offset_interpolates_withdraw_downward() {
        let e = moving_east(0, 250, 250, MotionType::Withdraw);
        assert_eq!(e.offset(0, 250), 250);
        assert_eq!(e.offset(125, 250), 125);
        assert_eq!(e.offset(250, 250), 0);
    }

    #[test]
    fn settled_offsets() {
        let mut e = Entity::creature(MapHeight::Walking, 100, 5);
        assert_eq!(e.offset(0, 250), 0);
        e.pos = Some(MapCoord::new(1, 1));
        assert_eq!(e.offset(0, 250), 0);
        e.approaching = true;
        assert_eq!(e.offset(0, 250), 250);
    }

    #[test]
    fn nearest_pos_switches_at_halfway() {
        let e = moving_east(0, 1000, 0, MotionType::Move);
        assert_eq!(e.nearest_pos(499, 250), Some(MapCoord::new(2, 2)));
        assert_eq!(e.nearest_pos(500, 250), Some(MapCoord::new(3, 2)));
    }

    #[test]
    fn missile_height_follows_direction() {
        let m = Entity::missile(MapDirection::West, 300, 1, Originator::Monster);
        assert_eq!(m.height, MapHeight::Missiles(MapDirection::West));
        assert!(!m.is_creature());
        assert!(m.as_creature().is_none());
    }
}
