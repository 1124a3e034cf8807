//! # Engine telemetry
//!
//! Lightweight metrics collection for the memory engine: search
//! latencies, cache effectiveness, and group synchronization counters.
//!
//! ## Metric types
//!
//! - **Counters**: monotonically increasing values (nodes synced)
//! - **Histograms**: distributions of values (search latency per strategy)
//! - **Gauges**: point-in-time values (resident working-memory tokens)
//!
//! When telemetry is disabled, every handle is a null instrument: the
//! record methods return without touching any shared state, so hot paths
//! carry zero cost.

pub mod counter;
pub mod gauge;
pub mod histogram;

use counter::Counter;
use gauge::Gauge;
pub use histogram::HistogramStats;
use histogram::Histogram;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Aggregated snapshot of every tracked metric
#[derive(Debug, Clone, Default)]
pub struct TelemetrySummary {
    /// Counter values by name
    pub counters: HashMap<String, u64>,
    /// Histogram statistics by name
    pub histograms: HashMap<String, HistogramStats>,
    /// Gauge values by name
    pub gauges: HashMap<String, f64>,
}

/// Thread-safe in-memory metrics registry
#[derive(Clone)]
pub struct Telemetry {
    enabled: bool,
    counters: Arc<RwLock<HashMap<String, Arc<Counter>>>>,
    histograms: Arc<RwLock<HashMap<String, Arc<Histogram>>>>,
    gauges: Arc<RwLock<HashMap<String, Arc<Gauge>>>>,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl Telemetry {
    /// Create an enabled telemetry registry
    #[must_use]
    pub fn new() -> Self {
        Self::with_enabled(true)
    }

    /// Create a registry, live or fully no-op
    #[must_use]
    pub fn with_enabled(enabled: bool) -> Self {
        Self {
            enabled,
            counters: Arc::new(RwLock::new(HashMap::new())),
            histograms: Arc::new(RwLock::new(HashMap::new())),
            gauges: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create a disabled registry whose handles are null instruments
    #[must_use]
    pub fn disabled() -> Self {
        Self::with_enabled(false)
    }

    /// Get or create a counter handle
    pub fn counter(&self, name: &str) -> CounterHandle {
        if !self.enabled {
            return CounterHandle(None);
        }
        let counter = Arc::clone(
            self.counters
                .write()
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Counter::new())),
        );
        CounterHandle(Some(counter))
    }

    /// Get or create a histogram handle
    pub fn histogram(&self, name: &str) -> HistogramHandle {
        if !self.enabled {
            return HistogramHandle(None);
        }
        let histogram = Arc::clone(
            self.histograms
                .write()
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Histogram::new())),
        );
        HistogramHandle(Some(histogram))
    }

    /// Get or create a gauge handle
    pub fn gauge(&self, name: &str) -> GaugeHandle {
        if !self.enabled {
            return GaugeHandle(None);
        }
        let gauge = Arc::clone(
            self.gauges
                .write()
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Gauge::new())),
        );
        GaugeHandle(Some(gauge))
    }

    /// Snapshot every metric
    #[must_use]
    pub fn summary(&self) -> TelemetrySummary {
        TelemetrySummary {
            counters: self
                .counters
                .read()
                .iter()
                .map(|(name, c)| (name.clone(), c.get()))
                .collect(),
            histograms: self
                .histograms
                .read()
                .iter()
                .map(|(name, h)| (name.clone(), h.stats()))
                .collect(),
            gauges: self
                .gauges
                .read()
                .iter()
                .map(|(name, g)| (name.clone(), g.get()))
                .collect(),
        }
    }

    /// Log current metric values to tracing
    pub fn log_metrics(&self) {
        let summary = self.summary();
        for (name, value) in &summary.counters {
            tracing::info!("[counter] {}: {}", name, value);
        }
        for (name, stats) in &summary.histograms {
            tracing::info!(
                "[histogram] {}: count={}, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms",
                name,
                stats.count,
                stats.p50,
                stats.p95,
                stats.p99,
            );
        }
        for (name, value) in &summary.gauges {
            tracing::info!("[gauge] {}: {}", name, value);
        }
    }

    /// Reset every metric
    pub fn clear(&self) {
        self.counters.write().clear();
        self.histograms.write().clear();
        self.gauges.write().clear();
    }
}

/// Handle for incrementing a counter; no-op when telemetry is disabled
#[derive(Clone)]
pub struct CounterHandle(Option<Arc<Counter>>);

impl CounterHandle {
    /// Increment by 1
    pub fn increment(&self) {
        if let Some(counter) = &self.0 {
            counter.increment();
        }
    }

    /// Increment by a specific amount
    pub fn increment_by(&self, amount: u64) {
        if let Some(counter) = &self.0 {
            counter.increment_by(amount);
        }
    }

    /// Current value (0 when disabled)
    #[must_use]
    pub fn get(&self) -> u64 {
        self.0.as_ref().map_or(0, |c| c.get())
    }
}

/// Handle for recording histogram observations; no-op when disabled
#[derive(Clone)]
pub struct HistogramHandle(Option<Arc<Histogram>>);

impl HistogramHandle {
    /// Start a timer whose elapsed time can be recorded later
    #[must_use]
    pub fn start_timer(&self) -> Timer {
        Timer {
            histogram: self.0.clone(),
            start: Instant::now(),
        }
    }

    /// Record a duration
    pub fn observe(&self, duration: Duration) {
        if let Some(histogram) = &self.0 {
            histogram.observe(duration);
        }
    }

    /// Record a value in milliseconds
    pub fn observe_millis(&self, millis: f64) {
        if let Some(histogram) = &self.0 {
            histogram.observe_millis(millis);
        }
    }

    /// Current statistics (empty when disabled)
    #[must_use]
    pub fn stats(&self) -> HistogramStats {
        self.0.as_ref().map(|h| h.stats()).unwrap_or_default()
    }
}

/// Timer that records its elapsed time into a histogram on observe
pub struct Timer {
    histogram: Option<Arc<Histogram>>,
    start: Instant,
}

impl Timer {
    /// Record the elapsed duration since the timer was started
    pub fn observe(self) {
        if let Some(histogram) = &self.histogram {
            histogram.observe(self.start.elapsed());
        }
    }
}

/// Handle for setting gauge values; no-op when disabled
#[derive(Clone)]
pub struct GaugeHandle(Option<Arc<Gauge>>);

impl GaugeHandle {
    /// Set the gauge
    pub fn set(&self, value: f64) {
        if let Some(gauge) = &self.0 {
            gauge.set(value);
        }
    }

    /// Add a delta (may be negative)
    pub fn add(&self, delta: f64) {
        if let Some(gauge) = &self.0 {
            gauge.add(delta);
        }
    }

    /// Current value (0.0 when disabled)
    #[must_use]
    pub fn get(&self) -> f64 {
        self.0.as_ref().map_or(0.0, |g| g.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_roundtrip() {
        let telemetry = Telemetry::new();
        let counter = telemetry.counter("nodes_synced");
        counter.increment();
        counter.increment_by(5);
        assert_eq!(counter.get(), 6);
        assert_eq!(telemetry.summary().counters["nodes_synced"], 6);
    }

    #[test]
    fn test_histogram_timer() {
        let telemetry = Telemetry::new();
        let histogram = telemetry.histogram("search_latency_vector");
        let timer = histogram.start_timer();
        timer.observe();
        assert_eq!(histogram.stats().count, 1);
    }

    #[test]
    fn test_gauge() {
        let telemetry = Telemetry::new();
        let gauge = telemetry.gauge("working_memory_tokens");
        gauge.set(128.0);
        gauge.add(-28.0);
        assert!((gauge.get() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_disabled_is_null_instrument() {
        let telemetry = Telemetry::disabled();
        let counter = telemetry.counter("ignored");
        counter.increment();
        assert_eq!(counter.get(), 0);

        let summary = telemetry.summary();
        assert!(summary.counters.is_empty());
        assert!(summary.histograms.is_empty());
        assert!(summary.gauges.is_empty());
    }

    #[test]
    fn test_clear() {
        let telemetry = Telemetry::new();
        telemetry.counter("a").increment();
        telemetry.clear();
        assert!(telemetry.summary().counters.is_empty());
    }
}
