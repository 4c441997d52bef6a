// dungeon_sim: deterministic discrete-event engine for a tile-based dungeon.
//
// This crate holds the world model and everything that moves it forward:
// the priority scheduler and game virtual time (GVT), the map of squares
// with their tile stacks, items and entities, timed motion, the scripted
// action/hook dispatch, item placement and respawn, and monster spawning.
// It has no rendering, networking or input code and runs headless.
//
// Module overview:
// - `sim.rs`:       SimContext (one game instance), task loop, tile/item/creature mutations, snapshots.
// - `scheduler.rs`: Priority task queue keyed by (time, priority, sequence) + GVT.
// - `world.rs`:     DungeonMap: cells, tile arena, entity arena, access queries.
// - `tile.rs`:      Tile data: per-height access, items mode, depth, hit points, hooks.
// - `entity.rs`:    Entity data (creature or missile) and motion timing arithmetic.
// - `item.rs`:      Item stacks, item type data/hooks, displaced-item queue.
// - `motion.rs`:    Entity lifecycle, movement start/flip/finish, missiles.
// - `dispatch.rs`:  Action trait, action contexts, hook firing, events and observers.
// - `placement.rs`: Drop-square search and overflow item drops.
// - `sweep.rs`:     Item and creature sweeps after a square's tiles change.
// - `respawn.rs`:   Displaced-item replacement, item respawn census, required items.
// - `spawner.rs`:   Monster generators, decay, necromancy, per-type counts.
// - `config.rs`:    GameConfig: every tunable constant, loadable from JSON.
// - `error.rs`:     SimError / ScriptError.
// - `types.rs`:     MapCoord, directions, heights, access levels, ids.
// - `prng`:         Re-exported from `dungeon_prng`.
//
// **Critical constraint: determinism.** Given the same config, seed and
// sequence of calls, a game instance reaches the same state. All randomness
// comes from the instance's own `DungeonRng`. Ordered collections are
// `BTreeMap`/`BTreeSet` or slot-ordered arenas; no system time, no OS
// entropy.

pub mod config;
pub mod dispatch;
pub mod entity;
pub mod error;
pub mod item;
pub mod motion;
pub mod placement;
pub use dungeon_prng as prng;
pub mod respawn;
pub mod scheduler;
pub mod sim;
pub mod spawner;
pub mod sweep;
pub mod tile;
pub mod types;
pub mod world;
