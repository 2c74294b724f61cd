//! GC Metrics - Export Metrics
//!
//! Module for exporting metrics to monitoring systems
//! (Prometheus, Grafana, etc.)

use indexmap::IndexMap;
use parking_lot::Mutex;

/// GcMetrics - metrics exporter
///
/// Export GC metrics in various formats. Insertion order is kept so the
/// output is stable between exports.
pub struct GcMetrics {
    /// Metrics data
    metrics: Mutex<IndexMap<String, MetricValue>>,
}

impl GcMetrics {
    pub fn new() -> Self {
        Self {
            metrics: Mutex::new(IndexMap::new()),
        }
    }

    /// Add metric
    pub fn add(&self, name: impl Into<String>, value: MetricValue) {
        self.metrics.lock().insert(name.into(), value);
    }

    /// Get metric
    pub fn get(&self, name: &str) -> Option<MetricValue> {
        self.metrics.lock().get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.metrics.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.lock().is_empty()
    }

    /// Export to Prometheus text format
    pub fn to_prometheus(&self) -> String {
        let metrics = self.metrics.lock();
        let mut output = String::new();

        for (name, value) in metrics.iter() {
            output.push_str(&format!("# TYPE {} {}\n", name, value.kind()));
            output.push_str(&format!("{} {}\n", name, value.as_f64()));
        }

        output
    }

    /// Export to JSON
    pub fn to_json(&self) -> String {
        let metrics = self.metrics.lock();
        let map: serde_json::Map<String, serde_json::Value> = metrics
            .iter()
            .map(|(name, value)| (name.clone(), serde_json::json!(value.as_f64())))
            .collect();
        serde_json::Value::Object(map).to_string()
    }
}

impl Default for GcMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Metric value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Counter(u64),
    Gauge(f64),
}

impl MetricValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            MetricValue::Counter(v) => *v as f64,
            MetricValue::Gauge(v) => *v,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            MetricValue::Counter(_) => "counter",
            MetricValue::Gauge(_) => "gauge",
        }
    }
}
