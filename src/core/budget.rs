//! Shared byte budget for bounded stores
//!
//! **Why**: the memo cache and the per-document histories each need a running byte
//! total checked against a ceiling. Histories of all open documents share one
//! budget, so the counter lives behind an `Arc` handed to every log.
//!
//! **Used by**: CacheStore (resident value bytes), HistoryLog (retained undo/redo bytes)

use log::{debug, info};
use std::sync::atomic::{AtomicUsize, Ordering};
use sysinfo::System;

const GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Running byte total plus the ceiling it must stay under
#[derive(Debug)]
pub struct MemoryBudget {
    /// Human-readable owner for log lines
    name: &'static str,
    /// Tracked usage (bytes)
    usage: AtomicUsize,
    /// Maximum allowed usage (bytes)
    limit: AtomicUsize,
}

impl MemoryBudget {
    /// Budget with an explicit ceiling in bytes
    pub fn new(name: &'static str, limit: usize) -> Self {
        info!("{} budget: limit={} MB", name, limit / 1024 / 1024);
        Self {
            name,
            usage: AtomicUsize::new(0),
            limit: AtomicUsize::new(limit),
        }
    }

    /// True while usage is above the ceiling
    pub fn check_memory_limit(&self) -> bool {
        self.usage.load(Ordering::Relaxed) > self.limit.load(Ordering::Relaxed)
    }

    /// (usage, limit) in bytes
    pub fn mem(&self) -> (usize, usize) {
        (self.usage(), self.limit())
    }

    pub fn usage(&self) -> usize {
        self.usage.load(Ordering::Relaxed)
    }

    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::Relaxed)
    }

    /// Usage as a fraction of the limit (0.0 when the limit is zero)
    pub fn mem_usage_fraction(&self) -> f64 {
        let (usage, limit) = self.mem();
        if limit == 0 {
            0.0
        } else {
            usage as f64 / limit as f64
        }
    }

    pub fn add_memory(&self, bytes: usize) {
        let new_usage = self.usage.fetch_add(bytes, Ordering::Relaxed) + bytes;
        let limit = self.limit.load(Ordering::Relaxed);
        if new_usage > limit {
            debug!(
                "{} over budget: {} KB / {} KB",
                self.name,
                new_usage / 1024,
                limit / 1024
            );
        }
    }

    /// Saturating release so a double free can never wrap the counter
    pub fn free_memory(&self, bytes: usize) {
        let _ = self
            .usage
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.saturating_sub(bytes))
            });
    }

    /// Change the ceiling; callers evict afterwards if needed
    pub fn set_limit(&self, limit: usize) {
        self.limit.store(limit, Ordering::Relaxed);
        info!("{} budget: limit updated to {} MB", self.name, limit / 1024 / 1024);
    }
}

/// Byte ceiling derived from available memory minus a reserve
pub fn system_limit(mem_fraction: f64, reserve_gb: f64) -> usize {
    let mut sys = System::new();
    sys.refresh_memory();

    let available = sys.available_memory() as usize;
    let reserve = (reserve_gb * GB) as usize;
    let usable = available.saturating_sub(reserve);
    let limit = (usable as f64 * mem_fraction.clamp(0.0, 1.0)) as usize;

    info!(
        "system memory: available={} MB, reserve={} MB, limit={} MB ({}%)",
        available / 1024 / 1024,
        reserve / 1024 / 1024,
        limit / 1024 / 1024,
        (mem_fraction * 100.0) as u32
    );
    limit
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_tracking() {
        let budget = MemoryBudget::new("test", 1024 * 1024);

        budget.add_memory(512 * 1024);
        assert_eq!(budget.usage(), 512 * 1024);
        assert!(!budget.check_memory_limit());

        budget.add_memory(1024 * 1024);
        assert!(budget.check_memory_limit());

        budget.free_memory(1024 * 1024);
        assert_eq!(budget.usage(), 512 * 1024);
        assert_eq!(budget.mem_usage_fraction(), 0.5);
    }

    #[test]
    fn test_free_saturates() {
        let budget = MemoryBudget::new("test", 100);
        budget.add_memory(10);
        budget.free_memory(50);
        assert_eq!(budget.usage(), 0);
    }

    #[test]
    fn test_limit_exactly_reached_is_within_budget() {
        let budget = MemoryBudget::new("test", 100);
        budget.add_memory(100);
        assert!(!budget.check_memory_limit());
        budget.set_limit(99);
        assert!(budget.check_memory_limit());
    }

    #[test]
    fn test_system_limit_respects_fraction() {
        let none = system_limit(0.0, 0.0);
        assert_eq!(none, 0);
    }
}
