//! ATIMEFILE - Table Metrics
//! Atomic counters for tracking table operations and block lifecycle
//! in a lock-free, thread-safe manner using `AtomicU64`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Operation counters for one atime table.
///
/// All counters use `Ordering::Relaxed`; they are for observability only.
#[derive(Debug)]
pub struct TableMetrics {
    /// `get_or_init` calls that filled an unset slot.
    pub fills: AtomicU64,
    /// `get_or_init` calls that found a recorded value.
    pub hits: AtomicU64,
    /// `set` calls that refreshed a value.
    pub sets: AtomicU64,
    /// `delete` calls that cleared a slot.
    pub deletes: AtomicU64,
    /// `delete` calls on keys with no recorded value.
    pub noop_deletes: AtomicU64,
    /// Blocks allocated on first fill.
    pub blocks_created: AtomicU64,
    /// Blocks deleted when their live-count reached zero.
    pub blocks_reclaimed: AtomicU64,
    opened: Instant,
}

impl TableMetrics {
    /// Create a new metrics instance with all counters at zero.
    pub fn new() -> Self {
        Self {
            fills: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            noop_deletes: AtomicU64::new(0),
            blocks_created: AtomicU64::new(0),
            blocks_reclaimed: AtomicU64::new(0),
            opened: Instant::now(),
        }
    }

    pub fn record_fill(&self, created_block: bool) {
        self.fills.fetch_add(1, Ordering::Relaxed);
        if created_block {
            self.blocks_created.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete(&self, reclaimed_block: bool) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        if reclaimed_block {
            self.blocks_reclaimed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_noop_delete(&self) {
        self.noop_deletes.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total number of table operations.
    pub fn total_ops(&self) -> u64 {
        self.fills.load(Ordering::Relaxed)
            + self.hits.load(Ordering::Relaxed)
            + self.sets.load(Ordering::Relaxed)
            + self.deletes.load(Ordering::Relaxed)
            + self.noop_deletes.load(Ordering::Relaxed)
    }

    /// Fraction of `get_or_init` calls answered without a write.
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let lookups = hits + self.fills.load(Ordering::Relaxed);
        if lookups == 0 {
            return 0.0;
        }
        hits as f64 / lookups as f64
    }

    /// Seconds since the table was opened.
    pub fn uptime_secs(&self) -> f64 {
        self.opened.elapsed().as_secs_f64()
    }

    /// Format metrics as a human-readable report.
    pub fn report(&self) -> String {
        format!(
            "\n═══ Atime Table Metrics ═══\n\
             Operations:\n\
               fills:     {}\n\
               hits:      {}\n\
               sets:      {}\n\
               deletes:   {}\n\
               no-ops:    {}\n\
               hit ratio: {:.2}\n\
             Blocks:\n\
               created:   {}\n\
               reclaimed: {}\n\
             Uptime: {:.2}s",
            self.fills.load(Ordering::Relaxed),
            self.hits.load(Ordering::Relaxed),
            self.sets.load(Ordering::Relaxed),
            self.deletes.load(Ordering::Relaxed),
            self.noop_deletes.load(Ordering::Relaxed),
            self.hit_ratio(),
            self.blocks_created.load(Ordering::Relaxed),
            self.blocks_reclaimed.load(Ordering::Relaxed),
            self.uptime_secs(),
        )
    }
}

impl Default for TableMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_operations() {
        let m = TableMetrics::new();

        m.record_fill(true);
        m.record_fill(false);
        m.record_hit();
        m.record_set();
        m.record_delete(false);
        m.record_delete(true);
        m.record_noop_delete();

        assert_eq!(m.fills.load(Ordering::Relaxed), 2);
        assert_eq!(m.blocks_created.load(Ordering::Relaxed), 1);
        assert_eq!(m.blocks_reclaimed.load(Ordering::Relaxed), 1);
        assert_eq!(m.total_ops(), 7);
    }

    #[test]
    fn test_hit_ratio() {
        let m = TableMetrics::new();
        assert_eq!(m.hit_ratio(), 0.0);
        m.record_fill(true);
        m.record_hit();
        m.record_hit();
        m.record_hit();
        assert!((m.hit_ratio() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_report_format() {
        let m = TableMetrics::default();
        m.record_fill(true);
        let report = m.report();
        assert!(report.contains("fills:"));
        assert!(report.contains("reclaimed:"));
    }
}
