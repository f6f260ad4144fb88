//! Fixed-capacity circular buffers.
//!
//! A [`Ring`] holds the most recent `capacity` entries. Writing past the
//! capacity overwrites the oldest entry. Capacities are rounded up to the next
//! power of two so the slot index is a mask instead of a division.
//!
//! Snapshots return entries oldest first and never expose slot indices.

use std::time::Duration;

use crate::engine::types::TickHeight;
use crate::telemetry::collector::TickTimeline;

/// Circular buffer overwriting its oldest entry once full.
#[derive(Debug, Clone)]
pub struct Ring<T> {
    slots: Vec<T>,
    mask: usize,
    /// Total number of entries ever written.
    written: usize,
}

impl<T: Clone + Default> Ring<T> {
    /// Creates a ring holding at least `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        Self { slots: vec![T::default(); capacity], mask: capacity - 1, written: 0 }
    }

    /// Number of slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of retained entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.written.min(self.capacity())
    }

    /// Returns `true` if nothing was written yet.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.written == 0
    }

    /// Claims the next slot, reset to its default, and returns it for writing.
    pub fn advance(&mut self) -> &mut T {
        let slot = &mut self.slots[self.written & self.mask];
        self.written += 1;
        *slot = T::default();
        slot
    }

    /// Appends `value`, overwriting the oldest entry once full.
    pub fn push(&mut self, value: T) {
        *self.advance() = value;
    }

    /// Most recently written entry.
    pub fn latest(&self) -> Option<&T> {
        if self.is_empty() {
            return None;
        }
        Some(&self.slots[(self.written - 1) & self.mask])
    }

    /// Retained entries, oldest first.
    pub fn snapshot(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len());
        self.snapshot_into(&mut out);
        out
    }

    /// Replaces the contents of `out` with the retained entries, oldest first.
    pub fn snapshot_into(&self, out: &mut Vec<T>) {
        out.clear();
        let start = self.written - self.len();
        out.extend((start..self.written).map(|i| self.slots[i & self.mask].clone()));
    }

    /// Forgets every entry.
    pub fn clear(&mut self) {
        self.written = 0;
        self.slots.iter_mut().for_each(|slot| *slot = T::default());
    }
}

/// Duration of one applied tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSample {
    /// Tick height.
    pub tick: TickHeight,
    /// Wall time from tick start to commit.
    pub duration: Duration,
}

/// Ring of recent tick durations.
pub type TickRing = Ring<TickSample>;

/// Ring of recent per-tick span timelines.
pub type SpanRing = Ring<TickTimeline>;
