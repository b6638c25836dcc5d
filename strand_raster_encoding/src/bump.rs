// Copyright 2024 the Strand Raster Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// An atomic counter handing out non-overlapping slot ranges from a fixed
/// pool.
///
/// This is the host side model of the counters the kernels keep in
/// [`BumpAllocators`](crate::BumpAllocators): a claim either receives the
/// whole requested range or nothing at all, so the counter never runs past
/// `capacity` and never wraps.
#[derive(Debug)]
pub struct BumpAllocator {
    next: AtomicU32,
    capacity: u32,
    exhausted: AtomicBool,
}

impl BumpAllocator {
    pub fn new(start: u32, capacity: u32) -> Self {
        Self {
            next: AtomicU32::new(start.min(capacity)),
            capacity,
            exhausted: AtomicBool::new(false),
        }
    }

    /// Claims `n` consecutive slots, returning the index of the first one.
    ///
    /// Returns `None` and marks the allocator exhausted when fewer than `n`
    /// slots remain.
    pub fn claim(&self, n: u32) -> Option<u32> {
        let capacity = self.capacity;
        let result = self
            .next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |next| {
                next.checked_add(n).filter(|end| *end <= capacity)
            });
        match result {
            Ok(start) => Some(start),
            Err(_) => {
                self.exhausted.store(true, Ordering::Relaxed);
                None
            }
        }
    }

    /// Number of slots handed out so far.
    pub fn claimed(&self) -> u32 {
        self.next.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Whether any claim has been refused.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::Relaxed)
    }

    /// Writes the claimed count back to `counter`, and sets `stage` in
    /// `failed` if a claim was refused.
    pub fn store(&self, counter: &mut u32, failed: &mut u32, stage: u32) {
        *counter = self.claimed();
        if self.is_exhausted() {
            *failed |= stage;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::BumpAllocator;

    #[test]
    fn claims_are_disjoint() {
        let alloc = BumpAllocator::new(0, 10);
        assert_eq!(alloc.claim(3), Some(0));
        assert_eq!(alloc.claim(1), Some(3));
        assert_eq!(alloc.claim(6), Some(4));
        assert_eq!(alloc.claimed(), 10);
        assert!(!alloc.is_exhausted());
    }

    #[test]
    fn refused_claim_leaves_counter_untouched() {
        let alloc = BumpAllocator::new(0, 4);
        assert_eq!(alloc.claim(3), Some(0));
        assert_eq!(alloc.claim(2), None);
        assert!(alloc.is_exhausted());
        assert_eq!(alloc.claimed(), 3);
        // A smaller claim still fits.
        assert_eq!(alloc.claim(1), Some(3));
        assert_eq!(alloc.claim(1), None);
        assert_eq!(alloc.claimed(), 4);
    }

    #[test]
    fn store_reports_refusals() {
        let (mut counter, mut failed) = (0, 0b1);
        let alloc = BumpAllocator::new(2, 3);
        assert_eq!(alloc.claim(1), Some(2));
        alloc.store(&mut counter, &mut failed, 0b100);
        assert_eq!((counter, failed), (3, 0b1));
        assert_eq!(alloc.claim(1), None);
        alloc.store(&mut counter, &mut failed, 0b100);
        assert_eq!((counter, failed), (3, 0b101));
    }

    #[test]
    fn start_is_clamped_and_overflow_refused() {
        let alloc = BumpAllocator::new(100, 8);
        assert_eq!(alloc.claimed(), 8);
        assert_eq!(alloc.claim(0), Some(8));
        let alloc = BumpAllocator::new(1, u32::MAX);
        assert_eq!(alloc.claim(u32::MAX), None);
    }

    #[test]
    fn concurrent_claims_never_overlap() {
        let alloc = BumpAllocator::new(0, 1000);
        let mut claimed = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        let mut mine = Vec::new();
                        while let Some(slot) = alloc.claim(1) {
                            mine.push(slot);
                        }
                        mine
                    })
                })
                .collect();
            workers
                .into_iter()
                .flat_map(|worker| worker.join().unwrap())
                .collect::<Vec<_>>()
        });
        claimed.sort_unstable();
        assert_eq!(claimed, (0..1000).collect::<Vec<_>>());
        assert!(alloc.is_exhausted());
    }
}
