//! Deterministic slot allocators for GPU pools.
//!
//! `alloc` returns the most recently freed slot if any, otherwise bumps the
//! tail. The same sequence of calls always yields the same slots.

use crate::error::{Result, VoxelError};

/// Free-list slot allocator over `[reserved, limit)`.
#[derive(Clone, Debug)]
pub struct SlotAllocator {
    free: Vec<u32>,
    tail: u32,
    reserved: u32,
    limit: u32,
    live: u32,
}

impl Default for SlotAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotAllocator {
    /// Unbounded allocator starting at slot 0.
    pub const fn new() -> Self {
        Self::bounded(0, u32::MAX)
    }

    /// Allocator whose first `reserved` slots are never handed out and which
    /// fails once `limit` slots exist.
    pub const fn bounded(reserved: u32, limit: u32) -> Self {
        Self {
            free: Vec::new(),
            tail: reserved,
            reserved,
            limit,
            live: 0,
        }
    }

    /// Allocate a slot.
    pub fn alloc(&mut self) -> Result<u32> {
        let slot = if let Some(slot) = self.free.pop() {
            slot
        } else if self.tail < self.limit {
            let slot = self.tail;
            self.tail += 1;
            slot
        } else {
            return Err(VoxelError::Exhausted {
                limit: self.limit - self.reserved,
            });
        };
        self.live += 1;
        Ok(slot)
    }

    /// Return a slot to the free list.
    pub fn free(&mut self, slot: u32) {
        debug_assert!(slot >= self.reserved && slot < self.tail, "slot {slot} was never allocated");
        debug_assert!(!self.free.contains(&slot), "double free of slot {slot}");
        self.free.push(slot);
        self.live -= 1;
    }

    /// One past the highest slot ever handed out. Never decreases.
    #[inline]
    pub const fn tail(&self) -> u32 {
        self.tail
    }

    /// Number of slots currently allocated.
    #[inline]
    pub const fn live(&self) -> u32 {
        self.live
    }

    #[inline]
    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    /// Slots that can still be allocated.
    #[inline]
    pub fn remaining(&self) -> u32 {
        (self.limit - self.tail) + self.free.len() as u32
    }

    #[inline]
    pub const fn limit(&self) -> u32 {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashSet;

    #[test]
    fn reuses_most_recent_free() {
        let mut alloc = SlotAllocator::new();
        assert_eq!(alloc.alloc().unwrap(), 0);
        assert_eq!(alloc.alloc().unwrap(), 1);
        assert_eq!(alloc.alloc().unwrap(), 2);
        alloc.free(0);
        alloc.free(2);
        assert_eq!(alloc.alloc().unwrap(), 2);
        assert_eq!(alloc.alloc().unwrap(), 0);
        assert_eq!(alloc.alloc().unwrap(), 3);
        assert_eq!(alloc.tail(), 4);
    }

    #[test]
    fn bounded_reports_exhaustion() {
        let mut alloc = SlotAllocator::bounded(1, 4);
        assert_eq!(alloc.alloc().unwrap(), 1);
        assert_eq!(alloc.alloc().unwrap(), 2);
        assert_eq!(alloc.alloc().unwrap(), 3);
        assert_eq!(alloc.alloc(), Err(VoxelError::Exhausted { limit: 3 }));
        alloc.free(2);
        assert_eq!(alloc.remaining(), 1);
        assert_eq!(alloc.alloc().unwrap(), 2);
    }

    #[test]
    fn random_round_trip_has_no_leaks() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut alloc = SlotAllocator::new();
        let mut held: Vec<u32> = Vec::new();
        let mut last_tail = 0;

        for _ in 0..10_000 {
            if held.is_empty() || rng.gen_bool(0.55) {
                held.push(alloc.alloc().unwrap());
            } else {
                let i = rng.gen_range(0..held.len());
                alloc.free(held.swap_remove(i));
            }
            assert!(alloc.tail() >= last_tail);
            last_tail = alloc.tail();

            let unique: HashSet<_> = held.iter().copied().collect();
            assert_eq!(unique.len(), held.len(), "slot handed out twice");
        }

        assert_eq!(alloc.live() as usize, held.len());
        for slot in held.drain(..) {
            alloc.free(slot);
        }
        assert_eq!(alloc.live(), 0);
        assert_eq!(alloc.free_len(), alloc.tail() as usize);
    }

    #[test]
    fn same_sequence_same_slots() {
        let run = || {
            let mut alloc = SlotAllocator::new();
            let a = alloc.alloc().unwrap();
            let b = alloc.alloc().unwrap();
            alloc.free(a);
            let c = alloc.alloc().unwrap();
            alloc.free(b);
            (a, b, c, alloc.alloc().unwrap())
        };
        assert_eq!(run(), run());
    }
}
