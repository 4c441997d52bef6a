// Monster population control.
//
// The spawner reacts to special tiles placed by the level designer:
//
// - Generator tiles produce a monster of a given type on their square. In
//   zombie mode the tile itself is consumed as the monster rises (a corpse
//   becoming a zombie); otherwise it stays and keeps producing.
// - Decay tiles turn into another tile over time (a fresh corpse rotting
//   into bones). Decay chains are just decay tiles whose replacement is
//   another decay tile.
//
// A periodic low-priority `MonsterGeneration` task runs generation in the
// square region around each player creature. Each run first rolls to skip
// with probability `current / limit` against the total cap, so spawns thin
// out as the population approaches its limit, then makes a fixed number of
// attempts on random squares.
//
// Per-type counts go up when the spawner creates a monster and down when a
// spawner-created monster dies (`damage_creature`).
//
// See also: `config.rs` (`MonsterTypeData` rows and chances), `sim.rs`
// (`damage_creature`), `scheduler.rs`.
//
// **Critical constraint: determinism.** All rolls use the sim's generator,
// in a fixed order: skip roll, then per attempt x, y, then the tile roll.

use crate::entity::Entity;
use crate::scheduler::TaskKind;
use crate::sim::SimContext;
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Data row for a monster type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonsterTypeData {
    pub name: String,
    pub height: MapHeight,
    pub speed: i32,
    pub hit_points: i32,
    /// Most of this type alive at once. `None` means unlimited.
    pub limit: Option<u32>,
}

/// What a special tile does on a generation roll.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpawnRule {
    Generate {
        monster: MonsterTypeId,
        /// Consume the tile when the monster appears.
        zombie_mode: bool,
    },
    Decay {
        replacement: TileId,
    },
}

#[derive(Clone, Debug, Default)]
pub struct Spawner {
    rules: BTreeMap<TileId, SpawnRule>,
    counts: BTreeMap<MonsterTypeId, u32>,
    /// Monster raised from decay tiles by necromancy.
    necromancy_monster: Option<MonsterTypeId>,
}

impl Spawner {
    pub fn count(&self, monster: MonsterTypeId) -> u32 {
        self.counts.get(&monster).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u32 {
        self.counts.values().sum()
    }

    pub fn rule(&self, tile: TileId) -> Option<SpawnRule> {
        self.rules.get(&tile).copied()
    }

    pub(crate) fn add(&mut self, monster: MonsterTypeId) {
        *self.counts.entry(monster).or_default() += 1;
    }

    pub(crate) fn subtract(&mut self, monster: MonsterTypeId) {
        if let Some(n) = self.counts.get_mut(&monster) {
            *n = n.saturating_sub(1);
        }
    }
}

impl SimContext {
    pub fn spawner(&self) -> &Spawner {
        &self.spawner
    }

    pub fn set_spawn_rule(&mut self, tile: TileId, rule: SpawnRule) {
        self.spawner.rules.insert(tile, rule);
    }

    pub fn set_necromancy_monster(&mut self, monster: Option<MonsterTypeId>) {
        self.spawner.necromancy_monster = monster;
    }

    /// Create a monster of `monster` type at `pos` and count it.
    pub fn spawn_monster(
        &mut self,
        monster: MonsterTypeId,
        pos: MapCoord,
        facing: MapDirection,
    ) -> Option<EntityId> {
        let data = self.config.monster_type(monster)?;
        let mut entity = Entity::creature(data.height, data.speed, data.hit_points);
        if let Some(c) = entity.as_creature_mut() {
            c.monster_type = Some(monster);
        }
        let id = self.spawn_entity(entity, pos, facing)?;
        self.spawner.add(monster);
        debug!(%monster, %pos, "monster spawned");
        Some(id)
    }

    fn monster_limit_reached(&self, monster: MonsterTypeId) -> bool {
        self.config
            .monster_type(monster)
            .and_then(|d| d.limit)
            .is_some_and(|limit| self.spawner.count(monster) >= limit)
    }

    fn random_square(&mut self, rect: MapRect) -> MapCoord {
        let x = self.rng.range_i32(rect.left, rect.right);
        let y = self.rng.range_i32(rect.bottom, rect.top);
        MapCoord::new(x, y)
    }

    fn random_facing(&mut self) -> MapDirection {
        MapDirection::from_index(self.rng.below(4) as usize)
    }

    /// One generation run over `rect`. At most one tile reacts.
    pub fn do_monster_generation(&mut self, rect: MapRect) {
        let rect = self.clip_rect(rect);
        if rect.is_empty() {
            return;
        }
        if let Some(limit) = self.config.total_monster_limit
            && self.rng.chance(self.spawner.total(), limit)
        {
            return;
        }
        for _ in 0..self.config.monster_generation_attempts {
            let mc = self.random_square(rect);
            let tiles = self.map.tiles_at(mc).to_vec();

            // A decaying corpse takes the whole run, whatever else is here.
            let decay = tiles.iter().find_map(|&t| match self.spawner.rule(t)? {
                SpawnRule::Decay { replacement } => Some((t, replacement)),
                SpawnRule::Generate { .. } => None,
            });
            if let Some((tile, replacement)) = decay {
                if self.rng.percent(self.config.zombie_chance) {
                    self.rm_tile(mc, tile, Originator::Environment);
                    self.add_tile(mc, replacement, Originator::Environment);
                }
                return;
            }

            let generator = tiles.iter().find_map(|&t| match self.spawner.rule(t)? {
                SpawnRule::Generate {
                    monster,
                    zombie_mode,
                } => Some((t, monster, zombie_mode)),
                SpawnRule::Decay { .. } => None,
            });
            let Some((tile, monster, zombie_mode)) = generator else {
                continue;
            };
            let Some(height) = self.config.monster_type(monster).map(|d| d.height) else {
                continue;
            };
            if self.monster_limit_reached(monster)
                || self.map.access(mc, height, None, self.gvt()) != MapAccess::Clear
            {
                continue;
            }
            if zombie_mode {
                if !self.rng.percent(self.config.zombie_chance) {
                    return;
                }
                self.rm_tile(mc, tile, Originator::Environment);
            } else if !self.rng.percent(self.config.bat_chance) {
                return;
            }
            let facing = self.random_facing();
            self.spawn_monster(monster, mc, facing);
            return;
        }
    }

    /// Raise up to `count` zombies from corpse tiles in `rect`, ignoring
    /// limits and chances. Returns how many rose.
    pub fn do_necromancy(&mut self, count: u32, rect: MapRect) -> u32 {
        let rect = self.clip_rect(rect);
        if rect.is_empty() {
            return 0;
        }
        let mut raised = 0;
        for _ in 0..count {
            for _ in 0..self.config.necromancy_attempts {
                let mc = self.random_square(rect);
                if self.map.access(mc, MapHeight::Walking, None, self.gvt()) != MapAccess::Clear {
                    continue;
                }
                let corpse = self.map.tiles_at(mc).iter().find_map(|t| {
                    let monster = match self.spawner.rule(*t)? {
                        SpawnRule::Generate {
                            monster,
                            zombie_mode: true,
                        } => Some(monster),
                        SpawnRule::Decay { .. } => self.spawner.necromancy_monster,
                        SpawnRule::Generate { .. } => None,
                    }?;
                    Some((*t, monster))
                });
                let Some((tile, monster)) = corpse else {
                    continue;
                };
                self.rm_tile(mc, tile, Originator::Environment);
                let facing = self.random_facing();
                if self.spawn_monster(monster, mc, facing).is_some() {
                    raised += 1;
                }
                break;
            }
        }
        raised
    }

    fn clip_rect(&self, rect: MapRect) -> MapRect {
        MapRect {
            left: rect.left.max(0),
            bottom: rect.bottom.max(0),
            right: rect.right.min(self.map.width()),
            top: rect.top.min(self.map.height()),
        }
    }

    /// Positions of player-controlled creatures on the map, in arena order.
    pub fn player_positions(&self) -> Vec<MapCoord> {
        self.map
            .entities()
            .filter(|(_, e)| e.as_creature().is_some_and(|c| c.player.is_some()))
            .filter_map(|(_, e)| e.pos)
            .collect()
    }

    /// Body of the `MonsterGeneration` task.
    pub(crate) fn run_monster_task(&mut self) {
        let r = self.config.monster_radius;
        for pos in self.player_positions() {
            self.do_monster_generation(MapRect {
                left: pos.x - r,
                bottom: pos.y - r,
                right: pos.x + 1 + r,
                top: pos.y + 1 + r,
            });
        }
        let next = self.gvt() + self.config.monster_interval;
        self.scheduler
            .add_task(TaskKind::MonsterGeneration, Priority::Low, next);
    }
}
