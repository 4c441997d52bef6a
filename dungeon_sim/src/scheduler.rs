// Virtual-time scheduler: GVT plus a priority queue of pending tasks.
//
// Tasks are keyed by `(time, priority, sequence)`: earliest time first, then
// the higher `Priority`, then insertion order. The sequence is a monotonic
// counter, so the order is total and identical on every replica.
//
// There is no cancel operation. A task that may go stale carries a snapshot
// of the state it was scheduled against (for instance the arrival time of
// the motion it finalizes) and does nothing if the live state has moved on.
//
// The execution loop lives in `SimContext::advance_to` (`sim.rs`), because
// executing a task needs the whole context, the scheduler included. This
// file only owns ordering and the clock.
//
// See also: `sim.rs` (`advance_to`, `run_task`), `motion.rs` (completion
// tasks), `respawn.rs` and `spawner.rs` (periodic tasks).
//
// **Critical constraint: determinism.** Never order by pointer or hash.
// `(time, priority, sequence)` is the whole key.

use crate::dispatch::{ActionContext, ActionRef};
use crate::types::{EntityId, ItemTypeId, Priority};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// What a scheduled task does when it fires.
#[derive(Clone, Debug)]
pub enum TaskKind {
    /// Finalize an entity's motion. Stale if the entity's arrival time is no
    /// longer `arrival_time`.
    MotionComplete { entity: EntityId, arrival_time: u64 },
    /// Try to place items from the displaced queue on random squares.
    ItemReplacement,
    /// Periodic census that re-creates missing respawnable items.
    ItemRespawnCensus,
    /// Hand one freshly created item to the displaced queue.
    RespawnItem { item_type: ItemTypeId },
    /// Periodic check that required items still exist somewhere.
    ItemCheck,
    /// Periodic monster generation around the players.
    MonsterGeneration,
    /// Run a scripted action later. This is how scripts "sleep": the
    /// continuation is whatever the action captures.
    RunAction {
        action: ActionRef,
        context: ActionContext,
    },
}

#[derive(Clone, Debug)]
pub struct ScheduledTask {
    pub time: u64,
    pub priority: Priority,
    pub sequence: u64,
    pub kind: TaskKind,
}

impl ScheduledTask {
    fn key(&self) -> (u64, std::cmp::Reverse<Priority>, u64) {
        (self.time, std::cmp::Reverse(self.priority), self.sequence)
    }
}

// BinaryHeap is a max-heap; reverse so the smallest key pops first.
impl PartialEq for ScheduledTask {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ScheduledTask {}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTask {
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

#[derive(Clone, Debug, Default)]
pub struct Scheduler {
    gvt: u64,
    heap: BinaryHeap<ScheduledTask>,
    next_sequence: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Global virtual time. Never decreases.
    pub fn gvt(&self) -> u64 {
        self.gvt
    }

    /// Schedule a task. Times in the past are clamped to the current GVT.
    pub fn add_task(&mut self, kind: TaskKind, priority: Priority, time: u64) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(ScheduledTask {
            time: time.max(self.gvt),
            priority,
            sequence,
            kind,
        });
    }

    pub fn peek_time(&self) -> Option<u64> {
        self.heap.peek().map(|t| t.time)
    }

    /// Pop the next task if it is due at or before `target`, moving GVT to
    /// the task's time.
    pub(crate) fn pop_due(&mut self, target: u64) -> Option<ScheduledTask> {
        if self.heap.peek().is_some_and(|t| t.time <= target) {
            let task = self.heap.pop()?;
            self.gvt = self.gvt.max(task.time);
            Some(task)
        } else {
            None
        }
    }

    /// Move GVT forward to `target` once no due tasks remain.
    pub(crate) fn settle_at(&mut self, target: u64) {
        self.gvt = self.gvt.max(target);
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Whether a task matching `pred` is pending. Linear scan.
    pub fn has_pending(&self, pred: impl Fn(&TaskKind) -> bool) -> bool {
        self.heap.iter().any(|t| pred(&t.kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn census() -> TaskKind {
        TaskKind::ItemRespawnCensus
    }

    #[test]
    fn pops_in_time_then_priority_then_sequence_order() {
        let mut s = Scheduler::new();
        s.add_task(TaskKind::MonsterGeneration, Priority::Low, 50);
        s.add_task(TaskKind::ItemCheck, Priority::Normal, 50);
        s.add_task(census(), Priority::High, 100);
        s.add_task(TaskKind::ItemReplacement, Priority::Normal, 50);

        let first = s.pop_due(1000).unwrap();
        assert_eq!((first.time, first.priority, first.sequence), (50, Priority::Normal, 1));
        let second = s.pop_due(1000).unwrap();
        assert_eq!((second.time, second.priority, second.sequence), (50, Priority::Normal, 3));
        let third = s.pop_due(1000).unwrap();
        assert_eq!(third.priority, Priority::Low);
        let fourth = s.pop_due(1000).unwrap();
        assert_eq!(fourth.time, 100);
        assert!(s.pop_due(1000).is_none());
    }

    #[test]
    fn urgent_task_wins_tie_regardless_of_insertion() {
        let mut s = Scheduler::new();
        s.add_task(TaskKind::ItemCheck, Priority::Normal, 10);
        s.add_task(TaskKind::MonsterGeneration, Priority::High, 10);
        assert!(matches!(
            s.pop_due(10).unwrap().kind,
            TaskKind::MonsterGeneration
        ));
    }

    #[test]
    fn pop_due_respects_target_and_moves_gvt() {
        let mut s = Scheduler::new();
        s.add_task(census(), Priority::Normal, 100);
        assert!(s.pop_due(99).is_none());
        assert_eq!(s.gvt(), 0);
        assert!(s.pop_due(100).is_some());
        assert_eq!(s.gvt(), 100);
    }

    #[test]
    fn past_times_clamp_to_gvt() {
        let mut s = Scheduler::new();
        s.settle_at(500);
        s.add_task(census(), Priority::Normal, 20);
        assert_eq!(s.peek_time(), Some(500));
    }

    #[test]
    fn gvt_never_moves_backwards() {
        let mut s = Scheduler::new();
        s.settle_at(300);
        s.settle_at(100);
        assert_eq!(s.gvt(), 300);
    }

    #[test]
    fn has_pending_scans_queue() {
        let mut s = Scheduler::new();
        assert!(!s.has_pending(|k| matches!(k, TaskKind::ItemReplacement)));
        s.add_task(TaskKind::ItemReplacement, Priority::Normal, 5);
        assert!(s.has_pending(|k| matches!(k, TaskKind::ItemReplacement)));
        assert_eq!(s.len(), 1);
    }
}
