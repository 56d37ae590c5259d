//! Consecutive failure accounting with cache purge on threshold.
//!
//! Lock order is purge gate, then counter. `record_failure` decides the
//! crossing under the counter lock alone and purges after releasing it, so a
//! purge never runs inside the critical section that detected it.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU64, Ordering},
};

use tracing::warn;

use super::lock::mutex_lock;
use super::store::CacheStore;

const SOURCE: &str = "cache::tracker";

pub struct FailureTracker {
    store: Arc<CacheStore>,
    threshold: u32,
    consecutive: Mutex<u32>,
    purge_gate: Mutex<()>,
    purges: AtomicU64,
}

impl FailureTracker {
    /// `threshold` below one is treated as one.
    pub fn new(store: Arc<CacheStore>, threshold: u32) -> Self {
        Self {
            store,
            threshold: threshold.max(1),
            consecutive: Mutex::new(0),
            purge_gate: Mutex::new(()),
            purges: AtomicU64::new(0),
        }
    }

    /// Count one failing batch. Returns `true` when this call reached the
    /// threshold and purged the cache; the counter starts over from zero.
    pub fn record_failure(&self) -> bool {
        let crossed = {
            let mut count = mutex_lock(&self.consecutive, SOURCE, "record_failure");
            *count = count.saturating_add(1);
            if *count >= self.threshold {
                *count = 0;
                true
            } else {
                false
            }
        };

        if crossed {
            self.purge();
        }
        crossed
    }

    /// A fully successful batch resets the counter. Waits for any purge in
    /// progress first.
    pub fn record_success(&self) {
        let _gate = mutex_lock(&self.purge_gate, SOURCE, "record_success.gate");
        *mutex_lock(&self.consecutive, SOURCE, "record_success") = 0;
    }

    pub fn current_count(&self) -> u32 {
        *mutex_lock(&self.consecutive, SOURCE, "current_count")
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Purges performed since construction.
    pub fn purge_count(&self) -> u64 {
        self.purges.load(Ordering::SeqCst)
    }

    fn purge(&self) {
        let _gate = mutex_lock(&self.purge_gate, SOURCE, "purge.gate");
        warn!(
            target = "cache::tracker",
            op = "purge",
            threshold = self.threshold,
            "Consecutive render failures reached threshold; purging render cache"
        );
        self.store.clear();
        self.purges.fetch_add(1, Ordering::SeqCst);
    }
}
