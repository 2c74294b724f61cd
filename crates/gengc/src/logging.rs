//! GC Logging and Tracing
//!
//! Structured events for collector activity, useful for:
//! - Performance analysis
//! - Debugging
//! - Production monitoring
//!
//! Every collector owns a [`GcLogger`] that keeps a bounded history of
//! events. With `GcConfig::verbose` the events are also sent to the global
//! logger, which writes them through the `log` facade.
//!
//! Log Levels:
//! - ERROR: Allocation failures, finalizer faults
//! - WARN: Heap growth
//! - INFO: GC cycles
//! - DEBUG: Phases, finalization and weak handle processing

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Log level for GC operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}

/// GC event types
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GcEvent {
    /// GC cycle started
    CycleStart {
        cycle: u64,
        target: String,
        reason: String,
    },

    /// GC phase completed
    PhaseEnd {
        cycle: u64,
        phase: String,
        duration_ms: f64,
    },

    /// GC cycle completed
    CycleEnd {
        cycle: u64,
        pause_ms: f64,
        reclaimed_bytes: usize,
        promoted_bytes: usize,
        heap_used: usize,
    },

    /// Unreachable objects resurrected for finalization
    FinalizersQueued { cycle: u64, count: usize },

    /// Weak handles whose referent died
    WeakCleared { cycle: u64, count: usize },

    /// Allocation failure
    AllocationFailure {
        size: usize,
        heap_used: usize,
        heap_limit: usize,
    },

    /// A finalizer panicked
    FinalizerFault { object: u64, message: String },

    /// An arena was grown to satisfy allocation
    HeapGrowth {
        generation: String,
        old_capacity: usize,
        new_capacity: usize,
    },
}

impl GcEvent {
    /// Level the event is logged at
    pub fn level(&self) -> LogLevel {
        match self {
            GcEvent::AllocationFailure { .. } | GcEvent::FinalizerFault { .. } => LogLevel::Error,
            GcEvent::HeapGrowth { .. } => LogLevel::Warn,
            GcEvent::CycleStart { .. } | GcEvent::CycleEnd { .. } => LogLevel::Info,
            GcEvent::PhaseEnd { .. }
            | GcEvent::FinalizersQueued { .. }
            | GcEvent::WeakCleared { .. } => LogLevel::Debug,
        }
    }
}

impl fmt::Display for GcEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GcEvent::CycleStart {
                cycle,
                target,
                reason,
            } => write!(f, "[GC] Cycle {} started ({}, reason: {})", cycle, target, reason),
            GcEvent::PhaseEnd {
                cycle,
                phase,
                duration_ms,
            } => write!(
                f,
                "[GC] Cycle {}: {} phase completed ({:.2}ms)",
                cycle, phase, duration_ms
            ),
            GcEvent::CycleEnd {
                cycle,
                pause_ms,
                reclaimed_bytes,
                promoted_bytes,
                heap_used,
            } => write!(
                f,
                "[GC] Cycle {} completed ({:.2}ms, reclaimed {} bytes, promoted {} bytes, heap used {})",
                cycle, pause_ms, reclaimed_bytes, promoted_bytes, heap_used
            ),
            GcEvent::FinalizersQueued { cycle, count } => {
                write!(f, "[GC] Cycle {}: {} objects queued for finalization", cycle, count)
            }
            GcEvent::WeakCleared { cycle, count } => {
                write!(f, "[GC] Cycle {}: {} weak handles cleared", cycle, count)
            }
            GcEvent::AllocationFailure {
                size,
                heap_used,
                heap_limit,
            } => write!(
                f,
                "[GC] Allocation failure: {} bytes (heap used: {} of {})",
                size, heap_used, heap_limit
            ),
            GcEvent::FinalizerFault { object, message } => {
                write!(f, "[GC] Finalizer for {:#x} panicked: {}", object, message)
            }
            GcEvent::HeapGrowth {
                generation,
                old_capacity,
                new_capacity,
            } => write!(
                f,
                "[GC] {} grown from {} to {} bytes",
                generation, old_capacity, new_capacity
            ),
        }
    }
}

/// One logged event
#[derive(Debug, Clone, Serialize)]
pub struct GcLogRecord {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    #[serde(flatten)]
    pub event: GcEvent,
}

/// GC Logger configuration
#[derive(Debug, Clone)]
pub struct GcLoggerConfig {
    /// Minimum log level
    pub level: LogLevel,

    /// Write events through the `log` facade
    pub console: bool,

    /// Enable JSON format
    pub json: bool,

    /// Prefix console lines with a local timestamp
    pub timestamps: bool,

    /// Events kept in memory; the oldest are dropped first
    pub history: usize,
}

impl Default for GcLoggerConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            console: true,
            json: false,
            timestamps: true,
            history: 1024,
        }
    }
}

/// GC Logger - centralized logging for GC operations
pub struct GcLogger {
    config: GcLoggerConfig,
    events: Mutex<VecDeque<GcLogRecord>>,
    enabled: AtomicBool,
}

impl GcLogger {
    /// Create new GC logger
    pub fn new(config: GcLoggerConfig) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(config.history.min(1024))),
            config,
            enabled: AtomicBool::new(true),
        }
    }

    /// Enable logging
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    /// Disable logging
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    /// Check if logging is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Log a GC event
    pub fn log(&self, event: GcEvent) {
        if !self.is_enabled() {
            return;
        }

        let level = event.level();
        if level > self.config.level {
            return;
        }

        let record = GcLogRecord {
            timestamp: Local::now(),
            level,
            event,
        };

        if self.config.console {
            self.output_console(&record);
        }

        let mut events = self.events.lock();
        if events.len() == self.config.history {
            events.pop_front();
        }
        if self.config.history > 0 {
            events.push_back(record);
        }
    }

    fn output_console(&self, record: &GcLogRecord) {
        let body = if self.config.json {
            match serde_json::to_string(&record.event) {
                Ok(json) => json,
                Err(_) => return,
            }
        } else {
            record.event.to_string()
        };

        if self.config.timestamps {
            log::log!(
                target: "gengc",
                record.level.into(),
                "[{}] {}",
                record.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
                body
            );
        } else {
            log::log!(target: "gengc", record.level.into(), "{}", body);
        }
    }

    /// Get all retained events, oldest first
    pub fn get_events(&self) -> Vec<GcLogRecord> {
        self.events.lock().iter().cloned().collect()
    }

    /// Clear all events
    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    /// Get event count
    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }
}

impl Default for GcLogger {
    fn default() -> Self {
        Self::new(GcLoggerConfig::default())
    }
}

lazy_static::lazy_static! {
    /// Global GC logger
    static ref GLOBAL_LOGGER: Mutex<GcLogger> = Mutex::new(GcLogger::default());
}

/// Log a GC event to global logger
pub fn log_event(event: GcEvent) {
    GLOBAL_LOGGER.lock().log(event);
}

/// Configure global logger
pub fn configure_logger(config: GcLoggerConfig) {
    *GLOBAL_LOGGER.lock() = GcLogger::new(config);
}

/// Get global logger event count
pub fn get_event_count() -> usize {
    GLOBAL_LOGGER.lock().event_count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cycle_start(cycle: u64) -> GcEvent {
        GcEvent::CycleStart {
            cycle,
            target: "gen0".to_string(),
            reason: "explicit".to_string(),
        }
    }

    #[test]
    fn test_gc_logger_basic() {
        let logger = GcLogger::default();
        logger.log(cycle_start(1));
        assert_eq!(logger.event_count(), 1);
    }

    #[test]
    fn test_gc_logger_disable() {
        let logger = GcLogger::default();
        logger.disable();
        logger.log(cycle_start(1));
        assert_eq!(logger.event_count(), 0);

        logger.enable();
        logger.log(cycle_start(2));
        assert_eq!(logger.event_count(), 1);
        logger.clear_events();
        assert_eq!(logger.event_count(), 0);
    }

    #[test]
    fn test_level_filter() {
        let logger = GcLogger::default();
        logger.log(GcEvent::WeakCleared { cycle: 1, count: 3 });
        assert_eq!(logger.event_count(), 0);
        logger.log(GcEvent::FinalizerFault {
            object: 0x1_0000_0000,
            message: "boom".to_string(),
        });
        assert_eq!(logger.event_count(), 1);
    }

    #[test]
    fn test_history_is_bounded() {
        let logger = GcLogger::new(GcLoggerConfig {
            console: false,
            history: 2,
            ..Default::default()
        });
        for cycle in 1..=3 {
            logger.log(cycle_start(cycle));
        }
        let events = logger.get_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, cycle_start(2));
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_value(GcEvent::FinalizersQueued { cycle: 4, count: 2 }).unwrap();
        assert_eq!(json["type"], "finalizers_queued");
        assert_eq!(json["count"], 2);
    }

    #[test]
    fn test_global_logger() {
        configure_logger(GcLoggerConfig {
            console: false,
            history: 8,
            ..Default::default()
        });
        log_event(cycle_start(1));
        assert!(get_event_count() > 0);
    }
}
