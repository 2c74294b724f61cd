//! Stats Module - GC Performance Monitoring
//!
//! Collects GC statistics for:
//! - Performance tuning
//! - Production monitoring
//! - Debugging & profiling
//!
//! Metrics:
//! - Pause time (min, max, avg, percentiles)
//! - Collections per target
//! - Allocation, reclamation and promotion volume
//! - Finalizer and weak handle activity

pub mod gc_cycle;
pub mod histogram;
pub mod metrics;
pub mod timer;

pub use gc_cycle::CollectionReport;
pub use histogram::Histogram;
pub use metrics::{GcMetrics, MetricValue};
pub use timer::GcTimer;

use crate::allocator::CollectTarget;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

/// GcStats - statistics collector for GC
///
/// Central repository for all GC metrics. Counters are atomics so readers
/// never take the heap lock.
pub struct GcStats {
    /// Collections per target, indexed by `CollectTarget::index`
    cycles: [AtomicU64; 4],

    objects_allocated: AtomicU64,
    bytes_allocated: AtomicU64,
    allocation_failures: AtomicU64,

    objects_reclaimed: AtomicU64,
    bytes_reclaimed: AtomicU64,
    objects_promoted: AtomicU64,
    bytes_promoted: AtomicU64,

    finalizers_enqueued: AtomicU64,
    finalizers_run: AtomicU64,
    finalizers_suppressed: AtomicU64,
    finalizer_faults: AtomicU64,
    weak_cleared: AtomicU64,

    /// Pause time statistics (nanoseconds)
    pause_stats: Histogram,

    /// Heap bytes in use after the last collection or allocation
    memory_usage: AtomicUsize,

    start_time: Instant,
}

impl GcStats {
    /// Create new stats collector
    pub fn new() -> Self {
        Self {
            cycles: Default::default(),
            objects_allocated: AtomicU64::new(0),
            bytes_allocated: AtomicU64::new(0),
            allocation_failures: AtomicU64::new(0),
            objects_reclaimed: AtomicU64::new(0),
            bytes_reclaimed: AtomicU64::new(0),
            objects_promoted: AtomicU64::new(0),
            bytes_promoted: AtomicU64::new(0),
            finalizers_enqueued: AtomicU64::new(0),
            finalizers_run: AtomicU64::new(0),
            finalizers_suppressed: AtomicU64::new(0),
            finalizer_faults: AtomicU64::new(0),
            weak_cleared: AtomicU64::new(0),
            pause_stats: Histogram::new(),
            memory_usage: AtomicUsize::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_allocation(&self, bytes: usize) {
        self.objects_allocated.fetch_add(1, Ordering::Relaxed);
        self.bytes_allocated.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_allocation_failure(&self) {
        self.allocation_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed collection
    pub fn record_collection(&self, report: &CollectionReport) {
        self.cycles[report.target.index()].fetch_add(1, Ordering::Relaxed);
        self.objects_reclaimed
            .fetch_add(report.objects_reclaimed as u64, Ordering::Relaxed);
        self.bytes_reclaimed
            .fetch_add(report.bytes_reclaimed as u64, Ordering::Relaxed);
        self.objects_promoted
            .fetch_add(report.objects_promoted as u64, Ordering::Relaxed);
        self.bytes_promoted
            .fetch_add(report.bytes_promoted as u64, Ordering::Relaxed);
        self.finalizers_enqueued
            .fetch_add(report.finalizers_enqueued as u64, Ordering::Relaxed);
        self.weak_cleared
            .fetch_add(report.weak_cleared as u64, Ordering::Relaxed);
        self.pause_stats.record(report.pause_ns);
        self.memory_usage
            .store(report.heap_used_after, Ordering::Relaxed);
    }

    pub fn record_finalizer_run(&self) {
        self.finalizers_run.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_finalizer_fault(&self) {
        self.finalizer_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_finalizer_suppressed(&self) {
        self.finalizers_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    /// Collections run for `target`
    pub fn cycles_for(&self, target: CollectTarget) -> u64 {
        self.cycles[target.index()].load(Ordering::Relaxed)
    }

    /// Get summary statistics
    pub fn summary(&self) -> GcSummary {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        let gen0_cycles = self.cycles_for(CollectTarget::Gen0);
        let gen1_cycles = self.cycles_for(CollectTarget::Gen1);
        let gen2_cycles = self.cycles_for(CollectTarget::Gen2);
        let full_cycles = self.cycles_for(CollectTarget::Full);

        GcSummary {
            total_cycles: gen0_cycles + gen1_cycles + gen2_cycles + full_cycles,
            gen0_cycles,
            gen1_cycles,
            gen2_cycles,
            full_cycles,
            objects_allocated: load(&self.objects_allocated),
            bytes_allocated: load(&self.bytes_allocated),
            allocation_failures: load(&self.allocation_failures),
            objects_reclaimed: load(&self.objects_reclaimed),
            bytes_reclaimed: load(&self.bytes_reclaimed),
            objects_promoted: load(&self.objects_promoted),
            bytes_promoted: load(&self.bytes_promoted),
            finalizers_enqueued: load(&self.finalizers_enqueued),
            finalizers_run: load(&self.finalizers_run),
            finalizers_suppressed: load(&self.finalizers_suppressed),
            finalizer_faults: load(&self.finalizer_faults),
            weak_cleared: load(&self.weak_cleared),
            avg_pause_ms: self.pause_stats.mean() as f64 / 1_000_000.0,
            max_pause_ms: self.pause_stats.max() as f64 / 1_000_000.0,
            p99_pause_ms: self.pause_stats.p99() as f64 / 1_000_000.0,
            heap_used_bytes: self.memory_usage.load(Ordering::Relaxed),
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    /// Snapshot in exportable form
    pub fn metrics(&self) -> GcMetrics {
        let summary = self.summary();
        let metrics = GcMetrics::new();
        metrics.add("gengc_collections_total", MetricValue::Counter(summary.total_cycles));
        metrics.add("gengc_gen0_collections_total", MetricValue::Counter(summary.gen0_cycles));
        metrics.add("gengc_gen1_collections_total", MetricValue::Counter(summary.gen1_cycles));
        metrics.add("gengc_gen2_collections_total", MetricValue::Counter(summary.gen2_cycles));
        metrics.add("gengc_full_collections_total", MetricValue::Counter(summary.full_cycles));
        metrics.add("gengc_allocated_bytes_total", MetricValue::Counter(summary.bytes_allocated));
        metrics.add("gengc_reclaimed_bytes_total", MetricValue::Counter(summary.bytes_reclaimed));
        metrics.add("gengc_promoted_bytes_total", MetricValue::Counter(summary.bytes_promoted));
        metrics.add("gengc_finalizers_run_total", MetricValue::Counter(summary.finalizers_run));
        metrics.add("gengc_finalizer_faults_total", MetricValue::Counter(summary.finalizer_faults));
        metrics.add("gengc_weak_cleared_total", MetricValue::Counter(summary.weak_cleared));
        metrics.add("gengc_heap_used_bytes", MetricValue::Gauge(summary.heap_used_bytes as f64));
        metrics.add("gengc_pause_max_ms", MetricValue::Gauge(summary.max_pause_ms));
        metrics
    }

    /// Reset statistics
    pub fn reset(&self) {
        for counter in &self.cycles {
            counter.store(0, Ordering::Relaxed);
        }
        for counter in [
            &self.objects_allocated,
            &self.bytes_allocated,
            &self.allocation_failures,
            &self.objects_reclaimed,
            &self.bytes_reclaimed,
            &self.objects_promoted,
            &self.bytes_promoted,
            &self.finalizers_enqueued,
            &self.finalizers_run,
            &self.finalizers_suppressed,
            &self.finalizer_faults,
            &self.weak_cleared,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.pause_stats.clear();
    }
}

impl Default for GcStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GcSummary {
    /// Total GC cycles
    pub total_cycles: u64,
    pub gen0_cycles: u64,
    pub gen1_cycles: u64,
    pub gen2_cycles: u64,
    pub full_cycles: u64,

    pub objects_allocated: u64,
    pub bytes_allocated: u64,
    pub allocation_failures: u64,

    pub objects_reclaimed: u64,
    pub bytes_reclaimed: u64,
    pub objects_promoted: u64,
    pub bytes_promoted: u64,

    pub finalizers_enqueued: u64,
    pub finalizers_run: u64,
    pub finalizers_suppressed: u64,
    /// Finalizers that panicked
    pub finalizer_faults: u64,
    pub weak_cleared: u64,

    /// Average pause time (ms)
    pub avg_pause_ms: f64,
    /// Max pause time (ms)
    pub max_pause_ms: f64,
    pub p99_pause_ms: f64,
    /// Heap in use (bytes)
    pub heap_used_bytes: usize,
    /// Uptime (seconds)
    pub uptime_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_collection() {
        let stats = GcStats::new();
        let mut report = CollectionReport::new(1, CollectTarget::Gen1, "explicit".to_string());
        report.objects_reclaimed = 10;
        report.bytes_reclaimed = 640;
        report.objects_promoted = 2;
        report.pause_ns = 2_000_000;
        report.heap_used_after = 4096;
        stats.record_collection(&report);

        let summary = stats.summary();
        assert_eq!(summary.total_cycles, 1);
        assert_eq!(summary.gen1_cycles, 1);
        assert_eq!(summary.objects_reclaimed, 10);
        assert_eq!(summary.bytes_reclaimed, 640);
        assert_eq!(summary.heap_used_bytes, 4096);
        assert!((summary.max_pause_ms - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_reset() {
        let stats = GcStats::new();
        stats.record_allocation(64);
        stats.record_finalizer_fault();
        stats.reset();
        let summary = stats.summary();
        assert_eq!(summary.objects_allocated, 0);
        assert_eq!(summary.finalizer_faults, 0);
    }

    #[test]
    fn test_metrics_export() {
        let stats = GcStats::new();
        stats.record_finalizer_run();
        let metrics = stats.metrics();
        assert_eq!(
            metrics.get("gengc_finalizers_run_total"),
            Some(MetricValue::Counter(1))
        );
    }
}
