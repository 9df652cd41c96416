//! Explicit deadline queue for the driver loop.
//!
//! Every periodic activity in the engine is an entry here: one send slot
//! per target plus the shared tick slot that drives the receive and reaper
//! passes. Re-arming reinserts the slot at `previous scheduled deadline +
//! interval` rather than `now + interval`, so execution jitter never
//! accumulates into drift.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use tokio::time::Instant;

/// Identity of a timer entry, resolved by the driver loop at firing time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TimerSlot {
    /// The shared receive + reaper tick.
    Tick,
    /// Send slot for the target at this index in the engine's target list.
    Target(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Deadline {
    fire_at: Instant,
    slot: TimerSlot,
}

impl Ord for Deadline {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Slot order breaks ties so equal deadlines pop deterministically.
        self.fire_at
            .cmp(&other.fire_at)
            .then(self.slot.cmp(&other.slot))
    }
}

impl PartialOrd for Deadline {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap of `(fire_at, slot)` deadlines owned by the driver loop.
#[derive(Debug, Default)]
pub struct TimerQueue {
    heap: BinaryHeap<Reverse<Deadline>>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `slot` to fire at `fire_at`.
    pub fn push(&mut self, fire_at: Instant, slot: TimerSlot) {
        self.heap.push(Reverse(Deadline { fire_at, slot }));
    }

    /// Remove and return the earliest deadline.
    pub fn pop(&mut self) -> Option<(Instant, TimerSlot)> {
        self.heap.pop().map(|Reverse(d)| (d.fire_at, d.slot))
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
