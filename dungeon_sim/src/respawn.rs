// Background item bookkeeping: the displaced queue, respawn and item checks.
//
// Three periodic tasks keep the dungeon's item supply sane:
//
// - `ItemReplacement` drains the displaced queue. Each run makes a fixed
//   number of attempts, cycling through the queue. Each attempt drops one
//   entry locally around a random square, and the run stops after the first
//   success. An important item that keeps failing evicts whatever lies on
//   its chosen square (the evicted item joins the queue in turn). The task
//   exists exactly while the queue is non-empty.
// - `ItemRespawnCensus` records the starting count of each configured item
//   type on its first run. On later runs it schedules a `RespawnItem` task,
//   `respawn_delay / players` ms out, for each missing item not already on
//   its way back.
// - `ItemCheck` keeps host-registered "required" item types in existence.
//   Displaced items of those types are marked important, and missing ones
//   are re-created.
//
// Item counts cover every place an item can be: map cells, creatures'
// carried lists and the displaced queue.
//
// See also: `item.rs` (`DisplacedQueue`), `placement.rs` (`drop_item`),
// `config.rs` (intervals and tries), `sim.rs` (`start_background_tasks`).
//
// **Critical constraint: determinism.** Random squares come from the sim's
// generator. Per-type tables are `BTreeMap`s so iteration order is fixed.

use crate::dispatch::SimEventKind;
use crate::item::Item;
use crate::placement::DropParams;
use crate::scheduler::TaskKind;
use crate::sim::SimContext;
use crate::types::*;
use std::collections::BTreeMap;
use tracing::{debug, info};

#[derive(Clone, Debug, Default)]
pub(crate) struct RespawnState {
    /// Counts recorded by the first census run.
    initial: Option<BTreeMap<ItemTypeId, i32>>,
    /// Respawns scheduled but not yet handed to the displaced queue.
    queued: BTreeMap<ItemTypeId, i32>,
    required: BTreeMap<ItemTypeId, i32>,
}

impl SimContext {
    /// Total count of `item_type` on the map, carried, and displaced.
    pub fn count_items(&self, item_type: ItemTypeId) -> i32 {
        let on_map: i32 = self
            .map
            .coords()
            .filter_map(|mc| self.map.item(mc))
            .filter(|i| i.item_type == item_type)
            .map(Item::count)
            .sum();
        let carried: i32 = self
            .map
            .entities()
            .filter_map(|(_, e)| e.as_creature())
            .flat_map(|c| c.carried.iter())
            .filter(|i| i.item_type == item_type)
            .map(Item::count)
            .sum();
        let displaced: i32 = self
            .map
            .displaced()
            .iter()
            .filter(|d| d.item.item_type == item_type)
            .map(|d| d.item.count())
            .sum();
        on_map + carried + displaced
    }

    /// Queue an item for placement on a random square.
    pub fn add_displaced_item(&mut self, item: Item) {
        if item.count() == 0 {
            return;
        }
        let was_empty = self.map.displaced.is_empty();
        self.map.displaced.push(item);
        if was_empty {
            let time = self.gvt() + self.config.item_replacement_interval;
            self.scheduler
                .add_task(TaskKind::ItemReplacement, Priority::Normal, time);
        }
    }

    /// Body of the `ItemReplacement` task.
    pub(crate) fn run_item_replacement(&mut self) {
        let (w, h) = (self.map.width() as u32, self.map.height() as u32);
        for _ in 0..self.config.replacement_attempts_per_run {
            let Some(idx) = self.map.displaced.advance_cursor() else {
                break;
            };
            let mut entry = self.map.displaced.remove(idx);
            entry.tries += 1;
            let mc = MapCoord::new(self.rng.below(w) as i32, self.rng.below(h) as i32);
            let item_type = entry.item.item_type;

            let placed = match self.drop_item(mc, entry.item.clone(), DropParams::local(MapDirection::North)) {
                Ok(at) => Some(at),
                Err(rest) => {
                    entry.item = rest;
                    None
                }
            };
            if placed.is_none()
                && entry.important
                && entry.tries > self.config.important_item_tries
                && self.map.item(mc).is_some()
            {
                if let Some(evicted) = self.remove_item(mc) {
                    debug!(%mc, "important item evicts {}", evicted.item_type);
                    self.map.displaced.push(evicted);
                }
                if self.add_item(mc, entry.item.clone()).is_ok() {
                    self.announce_respawn(mc, item_type);
                    break;
                }
            }
            if let Some(at) = placed {
                self.announce_respawn(at, item_type);
                break;
            }
            self.map.displaced.insert(idx, entry);
        }
        if !self.map.displaced.is_empty() {
            let next = self.gvt() + self.config.item_replacement_interval;
            self.scheduler
                .add_task(TaskKind::ItemReplacement, Priority::Normal, next);
        }
    }

    fn announce_respawn(&mut self, pos: MapCoord, item_type: ItemTypeId) {
        let name = self
            .config
            .item_type(item_type)
            .map(|t| t.name.clone())
            .unwrap_or_default();
        if !name.is_empty() {
            info!(%pos, "{name} has been respawned at a random location.");
        }
        self.emit(SimEventKind::ItemRespawned { pos, item_type });
    }

    /// Schedule the periodic item tasks. The first census runs immediately
    /// and records the starting counts, so call this once the level is
    /// fully stocked.
    pub(crate) fn start_item_tasks(&mut self) {
        let gvt = self.gvt();
        self.scheduler
            .add_task(TaskKind::ItemRespawnCensus, Priority::Normal, gvt);
        self.scheduler.add_task(
            TaskKind::ItemCheck,
            Priority::Normal,
            gvt + self.config.item_check_interval,
        );
    }

    /// Body of the `ItemRespawnCensus` task.
    pub(crate) fn run_respawn_census(&mut self) {
        let gvt = self.gvt();
        let types = self.config.respawn_item_types.clone();
        match self.respawn.initial.take() {
            None => {
                let counts = types.iter().map(|t| (*t, self.count_items(*t))).collect();
                self.respawn.initial = Some(counts);
            }
            Some(initial) => {
                if self.config.item_respawn_delay >= 0 {
                    let players = self.player_positions().len().max(1) as i64;
                    let delay = (self.config.item_respawn_delay / players) as u64;
                    for (&item_type, &start) in &initial {
                        let queued = self.respawn.queued.get(&item_type).copied().unwrap_or(0);
                        let missing = start - self.count_items(item_type) - queued;
                        for _ in 0..missing.max(0) {
                            self.scheduler.add_task(
                                TaskKind::RespawnItem { item_type },
                                Priority::Normal,
                                gvt + delay,
                            );
                            *self.respawn.queued.entry(item_type).or_default() += 1;
                        }
                    }
                }
                self.respawn.initial = Some(initial);
            }
        }
        self.scheduler.add_task(
            TaskKind::ItemRespawnCensus,
            Priority::Normal,
            gvt + self.config.item_respawn_interval,
        );
    }

    /// Body of the `RespawnItem` task.
    pub(crate) fn respawn_item(&mut self, item_type: ItemTypeId) {
        if let Some(n) = self.respawn.queued.get_mut(&item_type) {
            *n = (*n - 1).max(0);
        }
        let Some(max_stack) = self.config.item_type(item_type).map(|t| t.max_stack) else {
            return;
        };
        debug!(%item_type, "respawning item");
        self.add_displaced_item(Item::new(item_type, 1, max_stack));
    }

    /// Require at least `count` of `item_type` to exist. A type with no
    /// items at all right now cannot be required.
    pub fn set_required_items(&mut self, item_type: ItemTypeId, count: i32) -> bool {
        if count <= 0 || self.count_items(item_type) == 0 {
            self.respawn.required.remove(&item_type);
            return false;
        }
        self.respawn.required.insert(item_type, count);
        true
    }

    /// Body of the `ItemCheck` task.
    pub(crate) fn run_item_check(&mut self) {
        let required: Vec<(ItemTypeId, i32)> =
            self.respawn.required.iter().map(|(t, n)| (*t, *n)).collect();
        for (item_type, count) in required {
            let missing = count - self.count_items(item_type);
            if missing > 0 {
                debug!(%item_type, missing, "re-creating required items");
                let max_stack = self.config.item_type(item_type).map_or(1, |t| t.max_stack);
                for _ in 0..missing {
                    self.add_displaced_item(Item::new(item_type, 1, max_stack));
                }
            }
            for d in self.map.displaced.iter_mut() {
                if d.item.item_type == item_type {
                    d.important = true;
                }
            }
        }
        let next = self.gvt() + self.config.item_check_interval;
        self.scheduler.add_task(TaskKind::ItemCheck, Priority::Normal, next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::entity::Entity;
    use crate::tile::{ItemsMode, Tile};

    const POTION: ItemTypeId = ItemTypeId(0);
    const KEY: ItemTypeId = ItemTypeId(2);

    #[test]
    fn displaced_item_lands_after_interval() {
        let mut sim = SimContext::new(GameConfig::default(), 6, 6, 21);
        sim.add_displaced_item(Item::new(POTION, 1, 1));
        assert_eq!(sim.count_items(POTION), 1);
        sim.advance_to(999);
        assert_eq!(sim.map().displaced().len(), 1);
        let step = sim.advance_to(1000);
        assert!(sim.map().displaced().is_empty());
        assert_eq!(sim.count_items(POTION), 1);
        assert!(
            step.events
                .iter()
                .any(|e| matches!(e.kind, SimEventKind::ItemRespawned { item_type: POTION, .. }))
        );
        // Queue drained: no further replacement task.
        assert!(!sim.scheduler().has_pending(|k| matches!(k, TaskKind::ItemReplacement)));
    }

    #[test]
    fn unplaceable_item_stays_queued_and_retries() {
        let mut sim = SimContext::new(GameConfig::default(), 1, 1, 21);
        let table = sim.register_tile(Tile::new("table", 1).with_items(ItemsMode::Blocked));
        sim.add_tile(MapCoord::new(0, 0), table, Originator::Environment);
        sim.add_displaced_item(Item::new(POTION, 1, 1));
        sim.advance_to(3000);
        let d = sim.map().displaced().iter().next().unwrap();
        assert_eq!(d.tries, 3 * GameConfig::default().replacement_attempts_per_run);
        assert!(sim.scheduler().has_pending(|k| matches!(k, TaskKind::ItemReplacement)));
    }

    #[test]
    fn important_item_evicts_after_repeated_failures() {
        let mut config = GameConfig::default();
        config.important_item_tries = 2;
        let mut sim = SimContext::new(config, 1, 1, 21);
        let mc = MapCoord::new(0, 0);
        sim.add_item(mc, Item::new(ItemTypeId(1), 8, 8)).unwrap();
        sim.add_displaced_item(Item::new(KEY, 1, 1));
        for d in sim.map.displaced.iter_mut() {
            d.important = true;
        }
        sim.advance_to(1000);
        assert_eq!(sim.map().item(mc).unwrap().item_type, KEY);
        // The daggers are waiting for a square now.
        assert_eq!(sim.map().displaced().len(), 1);
        assert_eq!(sim.count_items(ItemTypeId(1)), 8);
    }

    #[test]
    fn census_respawns_missing_items() {
        let mut config = GameConfig::default();
        config.item_respawn_delay = 500;
        let mut sim = SimContext::new(config, 5, 5, 4);
        let mc = MapCoord::new(2, 2);
        sim.add_item(mc, Item::new(POTION, 1, 1)).unwrap();
        sim.start_background_tasks();
        sim.advance_to(10);
        sim.remove_item(mc);
        assert_eq!(sim.count_items(POTION), 0);

        // Census at 1000 notices, respawn at 1500, placement at 2500.
        sim.advance_to(1200);
        assert_eq!(sim.count_items(POTION), 0);
        sim.advance_to(1600);
        assert_eq!(sim.map().displaced().len(), 1);
        sim.advance_to(2600);
        assert_eq!(sim.count_items(POTION), 1);
        assert!(sim.map().displaced().is_empty());
        // No duplicate respawn after the item is back.
        sim.advance_to(6000);
        assert_eq!(sim.count_items(POTION), 1);
    }

    #[test]
    fn respawn_delay_shrinks_with_players() {
        let mut config = GameConfig::default();
        config.item_respawn_delay = 1000;
        let mut sim = SimContext::new(config, 5, 5, 4);
        for x in 0..2 {
            let mut knight = Entity::creature(MapHeight::Walking, 100, 10);
            if let Some(c) = knight.as_creature_mut() {
                c.player = Some(PlayerId(x as u32));
            }
            sim.spawn_entity(knight, MapCoord::new(x, 4), MapDirection::North);
        }
        sim.add_item(MapCoord::new(2, 2), Item::new(POTION, 1, 1)).unwrap();
        sim.start_background_tasks();
        sim.advance_to(10);
        sim.remove_item(MapCoord::new(2, 2));
        sim.advance_to(1000);
        assert!(sim.scheduler().has_pending(|k| matches!(k, TaskKind::RespawnItem { .. })));
        sim.advance_to(1500);
        assert!(!sim.scheduler().has_pending(|k| matches!(k, TaskKind::RespawnItem { .. })));
        assert_eq!(sim.map().displaced().len(), 1);
    }

    #[test]
    fn negative_delay_disables_respawn() {
        let mut config = GameConfig::default();
        config.item_respawn_delay = -1;
        let mut sim = SimContext::new(config, 5, 5, 4);
        sim.add_item(MapCoord::new(1, 1), Item::new(POTION, 1, 1)).unwrap();
        sim.start_background_tasks();
        sim.advance_to(10);
        sim.remove_item(MapCoord::new(1, 1));
        sim.advance_to(20_000);
        assert_eq!(sim.count_items(POTION), 0);
    }

    #[test]
    fn item_check_recreates_required_items() {
        let mut sim = SimContext::new(GameConfig::default(), 5, 5, 8);
        assert!(!sim.set_required_items(KEY, 1));
        sim.add_item(MapCoord::new(3, 3), Item::new(KEY, 1, 1)).unwrap();
        assert!(sim.set_required_items(KEY, 1));
        sim.start_background_tasks();
        sim.remove_item(MapCoord::new(3, 3));
        sim.advance_to(2000);
        let d = sim.map().displaced().iter().next().unwrap();
        assert_eq!(d.item.item_type, KEY);
        assert!(d.important);
    }

    #[test]
    fn counts_cover_carried_items() {
        let mut sim = SimContext::new(GameConfig::default(), 4, 4, 8);
        let mut knight = Entity::creature(MapHeight::Walking, 100, 10);
        if let Some(c) = knight.as_creature_mut() {
            c.carried.push(Item::new(ItemTypeId(1), 3, 8));
        }
        sim.spawn_entity(knight, MapCoord::new(0, 0), MapDirection::North);
        sim.add_item(MapCoord::new(1, 1), Item::new(ItemTypeId(1), 2, 8)).unwrap();
        sim.add_displaced_item(Item::new(ItemTypeId(1), 4, 8));
        assert_eq!(sim.count_items(ItemTypeId(1)), 9);
    }
}
