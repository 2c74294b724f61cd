//! GC Cycle Statistics - Per-collection report
//!
//! One [`CollectionReport`] is produced by every collection and returned
//! from `GarbageCollector::collect`. Phase timings are in nanoseconds.

use crate::allocator::CollectTarget;
use serde::Serialize;
use std::time::Duration;

/// Statistics of one completed collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionReport {
    /// Cycle number, starting at 1
    pub cycle: u64,
    pub target: CollectTarget,
    /// Why the collection ran
    pub reason: String,

    /// Phase timings (nanoseconds)
    pub mark_ns: u64,
    pub finalize_ns: u64,
    pub compact_ns: u64,
    pub pause_ns: u64,

    /// Memory statistics
    pub heap_used_before: usize,
    pub heap_used_after: usize,

    /// Object statistics
    pub objects_marked: usize,
    pub survivors: usize,
    pub objects_reclaimed: usize,
    pub bytes_reclaimed: usize,
    pub objects_promoted: usize,
    pub bytes_promoted: usize,
    pub large_objects_swept: usize,

    /// Finalization and weak handles
    pub finalizers_enqueued: usize,
    pub weak_cleared: usize,
}

impl CollectionReport {
    pub fn new(cycle: u64, target: CollectTarget, reason: String) -> Self {
        Self {
            cycle,
            target,
            reason,
            mark_ns: 0,
            finalize_ns: 0,
            compact_ns: 0,
            pause_ns: 0,
            heap_used_before: 0,
            heap_used_after: 0,
            objects_marked: 0,
            survivors: 0,
            objects_reclaimed: 0,
            bytes_reclaimed: 0,
            objects_promoted: 0,
            bytes_promoted: 0,
            large_objects_swept: 0,
            finalizers_enqueued: 0,
            weak_cleared: 0,
        }
    }

    /// Total stop-the-world time
    pub fn pause(&self) -> Duration {
        Duration::from_nanos(self.pause_ns)
    }

    /// Fraction of the pre-collection heap that was reclaimed
    pub fn reclaim_ratio(&self) -> f64 {
        if self.heap_used_before == 0 {
            return 0.0;
        }
        self.bytes_reclaimed as f64 / self.heap_used_before as f64
    }

    /// Human-readable summary line
    pub fn summary(&self) -> String {
        format!(
            "cycle {} ({}, {}): {} -> {} bytes, {} reclaimed, {} promoted, {} finalizable, {:.3}ms",
            self.cycle,
            self.target,
            self.reason,
            self.heap_used_before,
            self.heap_used_after,
            self.objects_reclaimed,
            self.objects_promoted,
            self.finalizers_enqueued,
            self.pause_ns as f64 / 1_000_000.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reclaim_ratio() {
        let mut report = CollectionReport::new(1, CollectTarget::Gen0, "explicit".to_string());
        assert_eq!(report.reclaim_ratio(), 0.0);

        report.heap_used_before = 1000;
        report.bytes_reclaimed = 250;
        assert!((report.reclaim_ratio() - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_summary_mentions_target() {
        let report = CollectionReport::new(3, CollectTarget::Full, "explicit".to_string());
        let line = report.summary();
        assert!(line.starts_with("cycle 3 (full, explicit)"));
    }
}
