// Items: stackable (type, count) pairs.
//
// An item lives in exactly one of three places: a map cell (one item slot
// per cell, stacking lives in `count`), a creature's carried list, or the
// displaced queue waiting for background placement. `Item` is a plain value;
// moving it between those places is a move of ownership, which is what keeps
// the "exactly one place" rule honest.
//
// See also: `placement.rs` (drop search and stack merging), `respawn.rs`
// (the tasks that drain the displaced queue), `config.rs` (item type table).

use crate::dispatch::ActionRef;
use crate::types::ItemTypeId;
use serde::{Deserialize, Serialize};

/// Data row for an item type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemTypeData {
    /// Display name. An empty name suppresses respawn announcements.
    pub name: String,
    pub max_stack: i32,
    /// Fragile items break when the tile under them is destroyed.
    pub fragile: bool,
}

/// Scripted behavior attached to an item type at runtime.
#[derive(Clone, Debug, Default)]
pub struct ItemTypeHooks {
    /// Fired when a creature drops this item, with the landing square.
    pub on_drop: Option<ActionRef>,
    /// Fired when a walking creature settles on a square holding this item.
    pub walk_over: Option<ActionRef>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub item_type: ItemTypeId,
    count: i32,
}

impl Item {
    /// Build an item, clamping `count` to `[0, max_stack]`.
    pub fn new(item_type: ItemTypeId, count: i32, max_stack: i32) -> Self {
        Self {
            item_type,
            count: count.clamp(0, max_stack.max(0)),
        }
    }

    pub fn count(&self) -> i32 {
        self.count
    }

    pub(crate) fn set_count(&mut self, count: i32) {
        self.count = count.max(0);
    }
}

/// An item waiting for a random square.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplacedItem {
    pub item: Item,
    /// Quest-critical; allowed to evict another item after repeated failures.
    pub important: bool,
    /// Placement attempts made so far.
    pub tries: u32,
}

/// FIFO of displaced items plus the round-robin cursor the replacement task
/// cycles with.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DisplacedQueue {
    items: Vec<DisplacedItem>,
    cursor: usize,
}

impl DisplacedQueue {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DisplacedItem> {
        self.items.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut DisplacedItem> {
        self.items.iter_mut()
    }

    pub(crate) fn push(&mut self, item: Item) {
        self.items.push(DisplacedItem {
            item,
            important: false,
            tries: 0,
        });
    }

    /// Advance the cursor to the next entry, wrapping, and return its index.
    pub(crate) fn advance_cursor(&mut self) -> Option<usize> {
        if self.items.is_empty() {
            return None;
        }
        self.cursor += 1;
        if self.cursor >= self.items.len() {
            self.cursor = 0;
        }
        Some(self.cursor)
    }

    pub(crate) fn remove(&mut self, index: usize) -> DisplacedItem {
        self.items.remove(index)
    }

    /// Put an entry back where `remove` took it from.
    pub(crate) fn insert(&mut self, index: usize, entry: DisplacedItem) {
        let index = index.min(self.items.len());
        self.items.insert(index, entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_item_clamps_count() {
        assert_eq!(Item::new(ItemTypeId(0), 12, 8).count(), 8);
        assert_eq!(Item::new(ItemTypeId(0), -3, 8).count(), 0);
        assert_eq!(Item::new(ItemTypeId(0), 5, 8).count(), 5);
    }

    #[test]
    fn displaced_cursor_cycles() {
        let mut q = DisplacedQueue::default();
        assert_eq!(q.advance_cursor(), None);
        q.push(Item::new(ItemTypeId(0), 1, 1));
        q.push(Item::new(ItemTypeId(1), 1, 1));
        q.push(Item::new(ItemTypeId(2), 1, 1));
        // Cursor starts at 0 and pre-increments, so the first pick is 1.
        assert_eq!(q.advance_cursor(), Some(1));
        assert_eq!(q.advance_cursor(), Some(2));
        assert_eq!(q.advance_cursor(), Some(0));
        q.remove(0);
        assert_eq!(q.len(), 2);
        assert_eq!(q.advance_cursor(), Some(1));
        assert_eq!(q.advance_cursor(), Some(0));
    }

    #[test]
    fn pushed_items_start_unimportant() {
        let mut q = DisplacedQueue::default();
        q.push(Item::new(ItemTypeId(2), 1, 1));
        let d = q.iter().next().unwrap();
        assert!(!d.important);
        assert_eq!(d.tries, 0);
    }
}
