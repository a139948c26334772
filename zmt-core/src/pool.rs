//! Envelope allocator.
//!
//! Models the fixed message heap of the device: every envelope reserves
//! bytes from a shared budget and gives them back when it is dropped.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Smallest allocation made for an envelope, so requests without a body
/// still get one.
pub const MIN_ENVELOPE_SIZE: usize = 16;

/// Shared byte budget for envelopes.
#[derive(Debug)]
pub struct EnvelopePool {
    budget: usize,
    in_use: AtomicUsize,
    allocations: AtomicU64,
    failures: AtomicU64,
}

impl EnvelopePool {
    pub fn new(budget: usize) -> Arc<Self> {
        Arc::new(Self {
            budget,
            in_use: AtomicUsize::new(0),
            allocations: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        })
    }

    /// A pool that never runs out.
    pub fn unbounded() -> Arc<Self> {
        Self::new(usize::MAX)
    }

    /// Reserves `size` bytes, rounded up to [`MIN_ENVELOPE_SIZE`].
    pub fn try_allocate(self: &Arc<Self>, size: usize) -> Option<EnvelopeLease> {
        let size = size.max(MIN_ENVELOPE_SIZE);
        let reserved = self
            .in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(size).filter(|total| *total <= self.budget)
            });

        match reserved {
            Ok(_) => {
                self.allocations.fetch_add(1, Ordering::Relaxed);
                Some(EnvelopeLease {
                    pool: Arc::clone(self),
                    size,
                })
            }
            Err(_) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    pub fn available(&self) -> usize {
        self.budget.saturating_sub(self.in_use())
    }

    pub fn allocations(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// Bytes reserved for one envelope, returned on drop.
#[derive(Debug)]
pub struct EnvelopeLease {
    pool: Arc<EnvelopePool>,
    size: usize,
}

impl EnvelopeLease {
    pub fn size(&self) -> usize {
        self.size
    }
}

impl Drop for EnvelopeLease {
    fn drop(&mut self) {
        self.pool.in_use.fetch_sub(self.size, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimum_size() {
        let pool = EnvelopePool::new(1024);
        let lease = pool.try_allocate(0).unwrap();
        assert_eq!(lease.size(), MIN_ENVELOPE_SIZE);
        assert_eq!(pool.in_use(), MIN_ENVELOPE_SIZE);
    }

    #[test]
    fn test_exhaustion_and_release() {
        let pool = EnvelopePool::new(64);
        let a = pool.try_allocate(40).unwrap();
        assert!(pool.try_allocate(40).is_none());
        assert_eq!(pool.failures(), 1);

        drop(a);
        assert_eq!(pool.in_use(), 0);
        let _b = pool.try_allocate(40).unwrap();
        assert_eq!(pool.allocations(), 2);
        assert_eq!(pool.available(), 24);
    }

    #[test]
    fn test_unbounded_never_overflows() {
        let pool = EnvelopePool::unbounded();
        let _a = pool.try_allocate(usize::MAX / 2).unwrap();
        let _b = pool.try_allocate(usize::MAX / 2).unwrap();
        assert!(pool.try_allocate(usize::MAX / 2).is_none());
    }

    mod proptest_pool {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn leases_balance_the_budget(
                budget in 0usize..512,
                steps in prop::collection::vec((any::<bool>(), 0usize..96), 0..64),
            ) {
                let pool = EnvelopePool::new(budget);
                let mut held = Vec::new();
                for (allocate, size) in steps {
                    if allocate || held.is_empty() {
                        if let Some(lease) = pool.try_allocate(size) {
                            held.push(lease);
                        }
                    } else {
                        held.swap_remove(size % held.len());
                    }
                    let reserved: usize = held.iter().map(|l| l.size()).sum();
                    prop_assert_eq!(pool.in_use(), reserved);
                    prop_assert!(pool.in_use() <= budget);
                }
                drop(held);
                prop_assert_eq!(pool.in_use(), 0);
            }
        }
    }
}
