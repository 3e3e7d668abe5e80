use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

/// Render stage names, shared between the scene layer and the server.
pub const OBSERVATION_SWAP_NS: &str = "observation_recreation_ns";
pub const LIGHT_REBUILD_NS: &str = "light_recreation_ns";
pub const RENDER_NS: &str = "rendering_time_ns";
pub const DECODE_NS: &str = "encoding_time_ns";
pub const REQUESTS: &str = "requests";
pub const REQUEST_ERRORS: &str = "request_errors";

/// Deterministic metrics aggregation.
///
/// Sorted maps keep snapshot ordering stable regardless of insertion order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Metrics {
    counters: BTreeMap<String, u64>,
    gauges: BTreeMap<String, i64>,
    histograms: BTreeMap<String, Histogram>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Histogram {
    pub count: u64,
    pub sum: i64,
    pub min: i64,
    pub max: i64,
}

impl Histogram {
    pub fn record(&mut self, value: i64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum = self.sum.saturating_add(value);
    }

    pub fn mean(&self) -> Option<i64> {
        (self.count > 0).then(|| self.sum / self.count as i64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub gauges: BTreeMap<String, i64>,
    pub histograms: BTreeMap<String, Histogram>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn inc_counter(&mut self, name: impl Into<String>, by: u64) {
        *self.counters.entry(name.into()).or_insert(0) += by;
    }

    pub fn gauge(&self, name: &str) -> Option<i64> {
        self.gauges.get(name).copied()
    }

    pub fn set_gauge(&mut self, name: impl Into<String>, value: i64) {
        self.gauges.insert(name.into(), value);
    }

    pub fn record_histogram(&mut self, name: impl Into<String>, value: i64) {
        self.histograms
            .entry(name.into())
            .or_default()
            .record(value);
    }

    /// Records a stage duration in nanoseconds.
    pub fn record_duration(&mut self, name: impl Into<String>, elapsed: Duration) {
        let nanos = i64::try_from(elapsed.as_nanos()).unwrap_or(i64::MAX);
        self.record_histogram(name, nanos);
    }

    pub fn histogram(&self, name: &str) -> Option<Histogram> {
        self.histograms.get(name).copied()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self.counters.clone(),
            gauges: self.gauges.clone(),
            histograms: self.histograms.clone(),
        }
    }
}
