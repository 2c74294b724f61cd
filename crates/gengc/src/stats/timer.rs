//! GC Timer - Timing Utilities
//!
//! Pause and phase timing for collections. A single timer measures the
//! whole pause while a second one is lapped at every phase boundary.

use std::time::{Duration, Instant};

/// GcTimer - timer for measuring GC operations
pub struct GcTimer {
    start: Instant,
}

impl GcTimer {
    /// Create new timer
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Get elapsed nanoseconds
    pub fn elapsed_ns(&self) -> u64 {
        self.elapsed().as_nanos() as u64
    }

    /// Elapsed time since the last lap (or creation); restarts the timer
    pub fn lap(&mut self) -> Duration {
        let now = Instant::now();
        let lap = now - self.start;
        self.start = now;
        lap
    }
}

impl Default for GcTimer {
    fn default() -> Self {
        Self::new()
    }
}
