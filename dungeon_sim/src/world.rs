// The dungeon grid: tiles, items and the entity index.
//
// Storage is a flat `Vec<Cell>` indexed by `x + y * width`, one cell per
// square. Each cell holds:
// - a depth-sorted tile stack (descending depth; ties keep insertion order),
// - at most one item (stacks live inside `Item::count`),
// - the entity index for that square.
//
// Entities and tiles themselves live in `slotmap` arenas owned here, so a
// stale `EntityId` / `TileId` simply resolves to `None`.
//
// Entity indexing rule: an on-map entity is indexed under its base square,
// and, while its motion is a full `Move`, also under the square ahead.
// Approaching entities are indexed only under their base square; queries
// that care about them (`all_entities_at`) look at neighbours explicitly.
// Callers must `unindex_entity` *before* changing position, facing or
// motion and `index_entity` afterwards.
//
// Everything in this file is a structural primitive or a query. Mutations
// that must fire hooks or sweeps (`add_tile`, `rm_tile`, `add_item`, ...)
// live on `SimContext` and call down into these.
//
// Out-of-range reads return empty / `Blocked`; out-of-range writes are
// no-ops that report `false`.
//
// See also: `sim.rs` (owner), `entity.rs` (offset math), `placement.rs`
// (drop search over this grid), `sweep.rs`.
//
// **Critical constraint: determinism.** Cell entity lists keep insertion
// order and arenas are only mutated by sim logic, so every query result is
// reproducible on every replica.

use crate::entity::Entity;
use crate::item::{DisplacedQueue, Item};
use crate::tile::Tile;
use crate::types::*;
use slotmap::SlotMap;
use smallvec::SmallVec;

#[derive(Clone, Debug, Default)]
struct Cell {
    tiles: SmallVec<[TileId; 4]>,
    entities: SmallVec<[EntityId; 2]>,
    item: Option<Item>,
}

#[derive(Clone, Debug)]
pub struct DungeonMap {
    width: i32,
    height: i32,
    cells: Vec<Cell>,
    tiles: SlotMap<TileId, Tile>,
    entities: SlotMap<EntityId, Entity>,
    pub(crate) displaced: DisplacedQueue,
    approach_offset: i32,
}

impl DungeonMap {
    /// Create an empty map. A map is never resized after creation.
    ///
    /// Panics if either dimension is not positive.
    pub fn new(width: i32, height: i32, approach_offset: i32) -> Self {
        assert!(
            width > 0 && height > 0,
            "dungeon map must have positive dimensions, got {width}x{height}"
        );
        Self {
            width,
            height,
            cells: vec![Cell::default(); (width as usize) * (height as usize)],
            tiles: SlotMap::with_key(),
            entities: SlotMap::with_key(),
            displaced: DisplacedQueue::default(),
            approach_offset,
        }
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn approach_offset(&self) -> i32 {
        self.approach_offset
    }

    pub fn valid(&self, mc: MapCoord) -> bool {
        mc.x >= 0 && mc.y >= 0 && mc.x < self.width && mc.y < self.height
    }

    fn index(&self, mc: MapCoord) -> Option<usize> {
        if self.valid(mc) {
            Some(mc.x as usize + mc.y as usize * self.width as usize)
        } else {
            None
        }
    }

    fn cell(&self, mc: MapCoord) -> Option<&Cell> {
        self.index(mc).map(|i| &self.cells[i])
    }

    fn cell_mut(&mut self, mc: MapCoord) -> Option<&mut Cell> {
        self.index(mc).map(|i| &mut self.cells[i])
    }

    /// Every valid square in map order (row by row).
    pub fn coords(&self) -> impl Iterator<Item = MapCoord> + use<> {
        let (w, h) = (self.width, self.height);
        (0..h).flat_map(move |y| (0..w).map(move |x| MapCoord::new(x, y)))
    }

    // -----------------------------------------------------------------------
    // Tiles
    // -----------------------------------------------------------------------

    pub fn register_tile(&mut self, tile: Tile) -> TileId {
        self.tiles.insert(tile)
    }

    pub fn tile(&self, id: TileId) -> Option<&Tile> {
        self.tiles.get(id)
    }

    pub(crate) fn tile_mut(&mut self, id: TileId) -> Option<&mut Tile> {
        self.tiles.get_mut(id)
    }

    /// The tile stack at `mc`, deepest first. Empty for invalid squares.
    pub fn tiles_at(&self, mc: MapCoord) -> &[TileId] {
        self.cell(mc).map(|c| c.tiles.as_slice()).unwrap_or(&[])
    }

    /// Insert into the stack after every tile of greater or equal depth.
    /// Returns `false` for an invalid square or unregistered tile.
    pub(crate) fn insert_tile(&mut self, mc: MapCoord, id: TileId) -> bool {
        let Some(depth) = self.tiles.get(id).map(|t| t.depth) else {
            return false;
        };
        let Some(idx) = self.index(mc) else {
            return false;
        };
        let tiles = &self.tiles;
        let stack = &mut self.cells[idx].tiles;
        let at = stack
            .iter()
            .position(|t| tiles.get(*t).map_or(i32::MIN, |t| t.depth) < depth)
            .unwrap_or(stack.len());
        stack.insert(at, id);
        self.assert_depth_sorted(mc);
        true
    }

    /// Remove one placement of `id` from the stack at `mc`.
    pub(crate) fn remove_tile(&mut self, mc: MapCoord, id: TileId) -> bool {
        let Some(cell) = self.cell_mut(mc) else {
            return false;
        };
        match cell.tiles.iter().position(|t| *t == id) {
            Some(at) => {
                cell.tiles.remove(at);
                true
            }
            None => false,
        }
    }

    pub(crate) fn take_all_tiles(&mut self, mc: MapCoord) -> SmallVec<[TileId; 4]> {
        self.cell_mut(mc)
            .map(|c| std::mem::take(&mut c.tiles))
            .unwrap_or_default()
    }

    fn assert_depth_sorted(&self, mc: MapCoord) {
        let stack = self.tiles_at(mc);
        let sorted = stack.windows(2).all(|w| {
            let a = self.tiles.get(w[0]).map_or(i32::MIN, |t| t.depth);
            let b = self.tiles.get(w[1]).map_or(i32::MIN, |t| t.depth);
            a >= b
        });
        assert!(sorted, "tile stack at {mc} lost depth ordering");
    }

    /// Minimum access over the tile stack, ignoring entities. `Clear` for a
    /// bare square, `Blocked` for an invalid one.
    pub fn tile_access(&self, mc: MapCoord, height: MapHeight) -> MapAccess {
        let Some(cell) = self.cell(mc) else {
            return MapAccess::Blocked;
        };
        cell.tiles
            .iter()
            .filter_map(|id| self.tiles.get(*id))
            .map(|t| t.access(height))
            .min()
            .unwrap_or(MapAccess::Clear)
    }

    /// Whether any tile at `mc` refuses items.
    pub fn blocks_items(&self, mc: MapCoord) -> bool {
        self.tiles_at(mc)
            .iter()
            .filter_map(|id| self.tiles.get(*id))
            .any(|t| !t.allows_items())
    }

    // -----------------------------------------------------------------------
    // Items
    // -----------------------------------------------------------------------

    pub fn item(&self, mc: MapCoord) -> Option<&Item> {
        self.cell(mc).and_then(|c| c.item.as_ref())
    }

    pub(crate) fn item_mut(&mut self, mc: MapCoord) -> Option<&mut Item> {
        self.cell_mut(mc).and_then(|c| c.item.as_mut())
    }

    /// Put an item on an empty square. Hands the item back on failure.
    pub(crate) fn put_item(&mut self, mc: MapCoord, item: Item) -> Result<(), Item> {
        match self.cell_mut(mc) {
            Some(cell) if cell.item.is_none() => {
                cell.item = Some(item);
                Ok(())
            }
            _ => Err(item),
        }
    }

    pub(crate) fn take_item(&mut self, mc: MapCoord) -> Option<Item> {
        self.cell_mut(mc).and_then(|c| c.item.take())
    }

    pub fn displaced(&self) -> &DisplacedQueue {
        &self.displaced
    }

    // -----------------------------------------------------------------------
    // Entities
    // -----------------------------------------------------------------------

    pub(crate) fn insert_entity(&mut self, entity: Entity) -> EntityId {
        self.entities.insert(entity)
    }

    pub(crate) fn free_entity(&mut self, id: EntityId) -> Option<Entity> {
        self.entities.remove(id)
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub(crate) fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(id)
    }

    /// All live entities in arena order.
    pub fn entities(&self) -> impl Iterator<Item = (EntityId, &Entity)> {
        self.entities.iter()
    }

    pub fn entities_at(&self, mc: MapCoord) -> &[EntityId] {
        self.cell(mc).map(|c| c.entities.as_slice()).unwrap_or(&[])
    }

    /// `entities_at(mc)` plus entities on the four neighbouring squares that
    /// are approaching `mc`.
    pub fn all_entities_at(&self, mc: MapCoord) -> Vec<EntityId> {
        let mut result: Vec<EntityId> = self.entities_at(mc).to_vec();
        let sides = [
            (MapDirection::West, MapDirection::East),
            (MapDirection::East, MapDirection::West),
            (MapDirection::North, MapDirection::South),
            (MapDirection::South, MapDirection::North),
        ];
        for (side, facing) in sides {
            for &id in self.entities_at(mc.displace(side)) {
                let approaching_here = self
                    .entities
                    .get(id)
                    .is_some_and(|e| e.facing == facing && e.approaching);
                if approaching_here && !result.contains(&id) {
                    result.push(id);
                }
            }
        }
        result
    }

    pub(crate) fn index_entity(&mut self, id: EntityId) {
        let Some(e) = self.entities.get(id) else {
            return;
        };
        let Some(pos) = e.pos else {
            return;
        };
        let ahead = (e.motion.kind == MotionType::Move)
            .then(|| pos.displace(e.facing))
            .filter(|a| self.valid(*a));
        for mc in std::iter::once(pos).chain(ahead) {
            if let Some(cell) = self.cell_mut(mc) {
                debug_assert!(!cell.entities.contains(&id), "entity indexed twice at {mc}");
                cell.entities.push(id);
            }
        }
    }

    /// Remove `id` from its base square and the square ahead, whichever
    /// hold it. Must run before the entity's position state changes.
    pub(crate) fn unindex_entity(&mut self, id: EntityId) {
        let Some(e) = self.entities.get(id) else {
            return;
        };
        let Some(pos) = e.pos else {
            return;
        };
        let ahead = pos.displace(e.facing);
        for mc in [pos, ahead] {
            if let Some(cell) = self.cell_mut(mc) {
                cell.entities.retain(|other| *other != id);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Access and targeting
    // -----------------------------------------------------------------------

    /// Access for putting an entity of `height` at `mc`.
    ///
    /// `Blocked` if the square is invalid or another entity at that height
    /// claims it: either it is less than halfway out of the square, or it
    /// is moving into the square. Otherwise the tile access.
    pub fn access(
        &self,
        mc: MapCoord,
        height: MapHeight,
        ignore: Option<EntityId>,
        gvt: u64,
    ) -> MapAccess {
        let Some(cell) = self.cell(mc) else {
            return MapAccess::Blocked;
        };
        for &id in &cell.entities {
            if Some(id) == ignore {
                continue;
            }
            let Some(e) = self.entities.get(id) else {
                continue;
            };
            if e.height == height
                && (e.offset(gvt, self.approach_offset) < HALFWAY || e.ahead() == Some(mc))
            {
                return MapAccess::Blocked;
            }
        }
        self.tile_access(mc, height)
    }

    /// Whether a missile flying `dir` may be created at `mc`: no missile
    /// already flies that way there, and the square ahead is enterable.
    pub fn can_place_missile(&self, mc: MapCoord, dir: MapDirection, gvt: u64) -> bool {
        let height = MapHeight::Missiles(dir);
        let occupied = self
            .entities_at(mc)
            .iter()
            .filter_map(|id| self.entities.get(*id))
            .any(|e| e.height == height);
        !occupied && self.access(mc.displace(dir), height, None, gvt) > MapAccess::Blocked
    }

    /// The creature an attack from `attacker` would land on.
    ///
    /// Looks at the square ahead when `allow_both` or the attacker is past
    /// halfway, then at the attacker's own square when `allow_both` or the
    /// attacker is short of halfway.
    pub fn target_creature(&self, attacker: EntityId, allow_both: bool, gvt: u64) -> Option<EntityId> {
        let a = self.entities.get(attacker)?;
        let pos = a.pos?;
        let past_halfway = a.offset(gvt, self.approach_offset) >= HALFWAY;
        if (allow_both || past_halfway)
            && let Some(t) = self.target_in_square(attacker, pos.displace(a.facing), gvt)
        {
            return Some(t);
        }
        if allow_both || !past_halfway {
            return self.target_in_square(attacker, pos, gvt);
        }
        None
    }

    /// Highest creature effectively in `mc`; ties go to the first indexed.
    fn target_in_square(&self, attacker: EntityId, mc: MapCoord, gvt: u64) -> Option<EntityId> {
        let mut best: Option<(EntityId, MapHeight)> = None;
        for &id in self.entities_at(mc) {
            if id == attacker {
                continue;
            }
            let Some(e) = self.entities.get(id) else {
                continue;
            };
            if !e.is_creature() {
                continue;
            }
            let ofs = e.offset(gvt, self.approach_offset);
            let effectively_here =
                (e.pos == Some(mc) && ofs < HALFWAY) || (e.pos != Some(mc) && ofs >= HALFWAY);
            if effectively_here && best.is_none_or(|(_, h)| e.height > h) {
                best = Some((id, e.height));
            }
        }
        best.map(|(id, _)| id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Motion;
    use crate::tile::ItemsMode;

    fn place(map: &mut DungeonMap, mut e: Entity, mc: MapCoord) -> EntityId {
        e.pos = Some(mc);
        let id = map.insert_entity(e);
        map.index_entity(id);
        id
    }

    fn walker() -> Entity {
        Entity::creature(MapHeight::Walking, 100, 5)
    }

    #[test]
    #[should_panic(expected = "positive dimensions")]
    fn zero_sized_map_panics() {
        DungeonMap::new(0, 5, 250);
    }

    #[test]
    fn validity_and_coords() {
        let map = DungeonMap::new(3, 2, 250);
        assert!(map.valid(MapCoord::new(2, 1)));
        assert!(!map.valid(MapCoord::new(3, 1)));
        assert!(!map.valid(MapCoord::new(-1, 0)));
        assert!(!map.valid(MapCoord::NULL));
        let all: Vec<_> = map.coords().collect();
        assert_eq!(all.len(), 6);
        assert_eq!(all[1], MapCoord::new(1, 0));
        assert_eq!(all[3], MapCoord::new(0, 1));
    }

    #[test]
    fn tile_stack_stays_depth_sorted() {
        let mut map = DungeonMap::new(4, 4, 250);
        let mc = MapCoord::new(1, 1);
        let floor = map.register_tile(Tile::new("floor", 0));
        let rug = map.register_tile(Tile::new("rug", 0));
        let pillar = map.register_tile(Tile::new("pillar", 5));
        let blood = map.register_tile(Tile::new("blood", -1));
        assert!(map.insert_tile(mc, floor));
        assert!(map.insert_tile(mc, blood));
        assert!(map.insert_tile(mc, pillar));
        assert!(map.insert_tile(mc, rug));
        // Descending depth, equal depths in insertion order.
        assert_eq!(map.tiles_at(mc), &[pillar, floor, rug, blood]);
        assert!(map.remove_tile(mc, floor));
        assert!(!map.remove_tile(mc, floor));
        assert_eq!(map.tiles_at(mc), &[pillar, rug, blood]);
    }

    #[test]
    fn insert_tile_rejects_invalid_square() {
        let mut map = DungeonMap::new(2, 2, 250);
        let t = map.register_tile(Tile::new("floor", 0));
        assert!(!map.insert_tile(MapCoord::new(5, 5), t));
        assert!(map.tiles_at(MapCoord::new(5, 5)).is_empty());
    }

    #[test]
    fn tile_access_is_minimum() {
        let mut map = DungeonMap::new(2, 2, 250);
        let mc = MapCoord::new(0, 0);
        assert_eq!(map.tile_access(mc, MapHeight::Walking), MapAccess::Clear);
        let door = map.register_tile(Tile::new("door", 1).with_access(MapAccess::Approach));
        let floor = map.register_tile(Tile::new("floor", 0));
        map.insert_tile(mc, floor);
        map.insert_tile(mc, door);
        assert_eq!(map.tile_access(mc, MapHeight::Walking), MapAccess::Approach);
        assert_eq!(
            map.tile_access(MapCoord::new(9, 9), MapHeight::Walking),
            MapAccess::Blocked
        );
    }

    #[test]
    fn blocks_items_checks_every_tile() {
        let mut map = DungeonMap::new(2, 2, 250);
        let mc = MapCoord::new(1, 0);
        let floor = map.register_tile(Tile::new("floor", 0));
        map.insert_tile(mc, floor);
        assert!(!map.blocks_items(mc));
        let table = map.register_tile(Tile::new("table", 2).with_items(ItemsMode::Blocked));
        map.insert_tile(mc, table);
        assert!(map.blocks_items(mc));
    }

    #[test]
    fn put_item_refuses_occupied_square() {
        let mut map = DungeonMap::new(2, 2, 250);
        let mc = MapCoord::new(0, 1);
        let a = Item::new(ItemTypeId(0), 1, 1);
        let b = Item::new(ItemTypeId(1), 2, 8);
        assert!(map.put_item(mc, a.clone()).is_ok());
        assert_eq!(map.put_item(mc, b.clone()), Err(b));
        assert_eq!(map.take_item(mc), Some(a));
        assert!(map.item(mc).is_none());
    }

    #[test]
    fn settled_entity_blocks_its_height_only() {
        let mut map = DungeonMap::new(4, 4, 250);
        let mc = MapCoord::new(1, 1);
        let id = place(&mut map, walker(), mc);
        assert_eq!(map.access(mc, MapHeight::Walking, None, 0), MapAccess::Blocked);
        assert_eq!(map.access(mc, MapHeight::Walking, Some(id), 0), MapAccess::Clear);
        assert_eq!(map.access(mc, MapHeight::Flying, None, 0), MapAccess::Clear);
    }

    #[test]
    fn moving_entity_indexed_in_both_squares() {
        let mut map = DungeonMap::new(4, 4, 250);
        let mut e = walker().with_facing(MapDirection::East);
        e.motion = Motion {
            kind: MotionType::Move,
            start_time: 0,
            start_offset: 0,
            arrival_time: 1000,
        };
        let id = place(&mut map, e, MapCoord::new(1, 1));
        assert_eq!(map.entities_at(MapCoord::new(1, 1)), &[id]);
        assert_eq!(map.entities_at(MapCoord::new(2, 1)), &[id]);

        // Destination is claimed for the whole move.
        assert_eq!(
            map.access(MapCoord::new(2, 1), MapHeight::Walking, None, 100),
            MapAccess::Blocked
        );
        // The source frees up once the mover is past halfway.
        assert_eq!(
            map.access(MapCoord::new(1, 1), MapHeight::Walking, None, 499),
            MapAccess::Blocked
        );
        assert_eq!(
            map.access(MapCoord::new(1, 1), MapHeight::Walking, None, 500),
            MapAccess::Clear
        );

        map.unindex_entity(id);
        assert!(map.entities_at(MapCoord::new(1, 1)).is_empty());
        assert!(map.entities_at(MapCoord::new(2, 1)).is_empty());
    }

    #[test]
    fn all_entities_includes_approachers() {
        let mut map = DungeonMap::new(4, 4, 250);
        let door = MapCoord::new(2, 2);
        let mut e = walker().with_facing(MapDirection::East);
        e.approaching = true;
        let approacher = place(&mut map, e, MapCoord::new(1, 2));
        let mut e = walker().with_facing(MapDirection::North);
        e.approaching = true;
        let from_south = place(&mut map, e, MapCoord::new(2, 3));
        let mut e = walker().with_facing(MapDirection::North);
        e.approaching = true;
        let diagonal = place(&mut map, e, MapCoord::new(3, 3));
        let mut e = walker().with_facing(MapDirection::North);
        e.approaching = true;
        let facing_away = place(&mut map, e, MapCoord::new(2, 1));

        let all = map.all_entities_at(door);
        assert!(all.contains(&approacher));
        assert!(all.contains(&from_south));
        assert!(!all.contains(&diagonal));
        assert!(!all.contains(&facing_away));
        assert_eq!(all.len(), 2);
        assert!(map.entities_at(door).is_empty());
    }

    #[test]
    fn missile_placement_respects_direction() {
        let mut map = DungeonMap::new(5, 5, 250);
        let mc = MapCoord::new(2, 2);
        assert!(map.can_place_missile(mc, MapDirection::East, 0));
        place(
            &mut map,
            Entity::missile(MapDirection::East, 300, 1, Originator::Monster),
            mc,
        );
        assert!(!map.can_place_missile(mc, MapDirection::East, 0));
        assert!(map.can_place_missile(mc, MapDirection::West, 0));
        // Off the edge of the map ahead.
        assert!(!map.can_place_missile(MapCoord::new(4, 2), MapDirection::East, 0));
    }

    #[test]
    fn target_prefers_highest_creature() {
        let mut map = DungeonMap::new(5, 5, 250);
        let attacker = place(
            &mut map,
            walker().with_facing(MapDirection::East),
            MapCoord::new(1, 1),
        );
        let ahead = MapCoord::new(2, 1);
        let _low = place(&mut map, walker(), ahead);
        let high = place(&mut map, Entity::creature(MapHeight::Flying, 100, 1), ahead);
        place(
            &mut map,
            Entity::missile(MapDirection::West, 300, 1, Originator::Monster),
            ahead,
        );
        assert_eq!(map.target_creature(attacker, true, 0), Some(high));
        // Settled attacker with allow_both = false only looks at its own square.
        assert_eq!(map.target_creature(attacker, false, 0), None);
    }

    #[test]
    fn target_ties_go_to_first_found() {
        let mut map = DungeonMap::new(5, 5, 250);
        let attacker = place(&mut map, walker(), MapCoord::new(1, 1));
        let first = place(&mut map, walker(), MapCoord::new(1, 1));
        let _second = place(&mut map, walker(), MapCoord::new(1, 1));
        assert_eq!(map.target_creature(attacker, false, 0), Some(first));
    }
}
