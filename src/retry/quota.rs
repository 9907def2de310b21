use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::util::lock_unpoisoned;

/// The withdrawal would have driven the quota below zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuotaExhausted {
    pub available_capacity: usize,
    pub required: usize,
}

/// Token bucket bounding retry volume for one partition.
///
/// `0 <= available_capacity <= max_capacity` holds after every operation;
/// all mutations go through one mutex so concurrent calls never observe a
/// partially applied update.
#[derive(Debug)]
pub struct RetryQuota {
    max_capacity: usize,
    available: Mutex<usize>,
}

impl RetryQuota {
    pub fn new(available_capacity: usize, max_capacity: usize) -> Self {
        Self {
            max_capacity,
            available: Mutex::new(available_capacity.min(max_capacity)),
        }
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    pub fn available_capacity(&self) -> usize {
        *lock_unpoisoned(&self.available)
    }

    /// Removes `amount` and returns what is left, or leaves the quota
    /// untouched when there is not enough capacity.
    pub fn try_withdraw(&self, amount: usize) -> Result<usize, QuotaExhausted> {
        let mut available = lock_unpoisoned(&self.available);
        if *available < amount {
            return Err(QuotaExhausted {
                available_capacity: *available,
                required: amount,
            });
        }
        *available -= amount;
        Ok(*available)
    }

    /// Adds `amount`, saturating at `max_capacity`, and returns the new level.
    pub fn release(&self, amount: usize) -> usize {
        let mut available = lock_unpoisoned(&self.available);
        *available = available.saturating_add(amount).min(self.max_capacity);
        *available
    }
}

/// Lazily created quotas keyed by partition (usually the target host).
///
/// Quotas live as long as the registry; there is no idle eviction because an
/// evicted bucket would silently come back full.
#[derive(Debug)]
pub struct RetryQuotaRegistry {
    initial_capacity: usize,
    max_capacity: usize,
    partitions: Mutex<BTreeMap<String, Arc<RetryQuota>>>,
}

impl RetryQuotaRegistry {
    pub fn new(initial_capacity: usize, max_capacity: usize) -> Self {
        Self {
            initial_capacity,
            max_capacity,
            partitions: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn quota(&self, partition: &str) -> Arc<RetryQuota> {
        let mut partitions = lock_unpoisoned(&self.partitions);
        if let Some(quota) = partitions.get(partition) {
            return Arc::clone(quota);
        }
        let quota = Arc::new(RetryQuota::new(self.initial_capacity, self.max_capacity));
        partitions.insert(partition.to_owned(), Arc::clone(&quota));
        quota
    }

    pub fn partitions(&self) -> Vec<String> {
        lock_unpoisoned(&self.partitions).keys().cloned().collect()
    }

    pub fn available_capacity(&self, partition: &str) -> Option<usize> {
        lock_unpoisoned(&self.partitions)
            .get(partition)
            .map(|quota| quota.available_capacity())
    }
}
