//! Histogram - Pause Time Histogram
//!
//! Histogram for tracking pause time distribution.
//! Percentiles (P50, P99, P999) come from logarithmic buckets.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Histogram - pause time histogram
///
/// Values land in logarithmic buckets, so percentiles are upper bounds
/// within a factor of two.
pub struct Histogram {
    /// Bucket counts, keyed by bit length of the value
    buckets: Mutex<BTreeMap<u64, u64>>,

    /// Total count
    count: AtomicU64,

    /// Sum of all values
    sum: AtomicU64,

    /// Min value
    min: AtomicU64,

    /// Max value
    max: AtomicU64,
}

impl Histogram {
    /// Create new histogram
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(BTreeMap::new()),
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            min: AtomicU64::new(u64::MAX),
            max: AtomicU64::new(0),
        }
    }

    /// Record value
    pub fn record(&self, value: u64) {
        let bucket = Self::bucket(value);
        *self.buckets.lock().entry(bucket).or_insert(0) += 1;

        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value, Ordering::Relaxed);
        self.min.fetch_min(value, Ordering::Relaxed);
        self.max.fetch_max(value, Ordering::Relaxed);
    }

    /// Bucket for value (logarithmic: 1, 2, 4, 8, 16, ...)
    fn bucket(value: u64) -> u64 {
        64 - value.leading_zeros() as u64
    }

    /// Largest value a bucket can hold
    fn bucket_upper_bound(bucket: u64) -> u64 {
        match bucket {
            0 => 0,
            64.. => u64::MAX,
            b => (1u64 << b) - 1,
        }
    }

    /// Get percentile (`p` in 0.0..=1.0)
    pub fn percentile(&self, p: f64) -> u64 {
        let buckets = self.buckets.lock();
        let total = self.count.load(Ordering::Relaxed);

        if total == 0 {
            return 0;
        }

        let target = ((total as f64 * p).ceil() as u64).max(1);
        let mut cumulative = 0;

        for (&bucket, &count) in buckets.iter() {
            cumulative += count;
            if cumulative >= target {
                return Self::bucket_upper_bound(bucket).min(self.max());
            }
        }

        self.max()
    }

    /// Get P50 (median)
    pub fn p50(&self) -> u64 {
        self.percentile(0.50)
    }

    /// Get P99
    pub fn p99(&self) -> u64 {
        self.percentile(0.99)
    }

    /// Get P999
    pub fn p999(&self) -> u64 {
        self.percentile(0.999)
    }

    /// Get mean
    pub fn mean(&self) -> u64 {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return 0;
        }
        self.sum.load(Ordering::Relaxed) / count
    }

    /// Get min
    pub fn min(&self) -> u64 {
        let min = self.min.load(Ordering::Relaxed);
        if min == u64::MAX {
            0
        } else {
            min
        }
    }

    /// Get max
    pub fn max(&self) -> u64 {
        self.max.load(Ordering::Relaxed)
    }

    /// Get count
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Clear histogram
    pub fn clear(&self) {
        self.buckets.lock().clear();
        self.count.store(0, Ordering::Relaxed);
        self.sum.store(0, Ordering::Relaxed);
        self.min.store(u64::MAX, Ordering::Relaxed);
        self.max.store(0, Ordering::Relaxed);
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_histogram() {
        let histogram = Histogram::new();
        assert_eq!(histogram.count(), 0);
        assert_eq!(histogram.min(), 0);
        assert_eq!(histogram.p99(), 0);
    }

    #[test]
    fn test_min_max_mean() {
        let histogram = Histogram::new();
        for value in [10, 20, 30, 40] {
            histogram.record(value);
        }
        assert_eq!(histogram.min(), 10);
        assert_eq!(histogram.max(), 40);
        assert_eq!(histogram.mean(), 25);
    }

    #[test]
    fn test_percentile_bounds() {
        let histogram = Histogram::new();
        for _ in 0..99 {
            histogram.record(100);
        }
        histogram.record(100_000);

        assert!(histogram.p50() >= 100 && histogram.p50() < 200);
        assert_eq!(histogram.p999(), 100_000);

        histogram.clear();
        assert_eq!(histogram.count(), 0);
    }
}
