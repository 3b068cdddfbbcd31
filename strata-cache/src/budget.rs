//! Byte budgets per tier.
//!
//! Space is reserved before an entry is inserted and released after it is
//! removed, so the `used` counter is always an upper bound on resident bytes
//! and never exceeds `capacity`.

use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug)]
pub(crate) struct TierBudget {
    capacity: usize,
    used: AtomicUsize,
    entries: AtomicUsize,
}

impl TierBudget {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            used: AtomicUsize::new(0),
            entries: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    pub fn entries(&self) -> usize {
        self.entries.load(Ordering::Acquire)
    }

    /// Reserve `size` bytes, or `None` if that would exceed capacity.
    pub fn try_reserve(&self, size: usize) -> Option<Reservation<'_>> {
        let mut current = self.used.load(Ordering::Acquire);
        loop {
            let next = current.checked_add(size)?;
            if next > self.capacity {
                return None;
            }
            match self
                .used
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    return Some(Reservation {
                        budget: self,
                        size,
                        committed: false,
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Give back the bytes of a removed entry.
    pub fn release(&self, size: usize) {
        self.used.fetch_sub(size, Ordering::AcqRel);
        self.entries.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Reserved bytes. Released on drop unless committed to an inserted entry.
#[derive(Debug)]
pub(crate) struct Reservation<'a> {
    budget: &'a TierBudget,
    size: usize,
    committed: bool,
}

impl Reservation<'_> {
    /// Keep the bytes; the entry now owns them.
    pub fn commit(mut self) {
        self.committed = true;
        self.budget.entries.fetch_add(1, Ordering::AcqRel);
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.budget.used.fetch_sub(self.size, Ordering::AcqRel);
        }
    }
}
