use parking_lot::Mutex;
use std::time::Duration;

/// Statistics snapshot for a histogram metric
#[derive(Debug, Clone, Default)]
pub struct HistogramStats {
    /// Number of observations
    pub count: u64,
    /// Minimum value in milliseconds
    pub min: f64,
    /// Maximum value in milliseconds
    pub max: f64,
    /// Average value in milliseconds
    pub avg: f64,
    /// 50th percentile
    pub p50: f64,
    /// 95th percentile
    pub p95: f64,
    /// 99th percentile
    pub p99: f64,
}

/// Histogram metric for tracking distributions of values
///
/// Collects samples (operation latencies in milliseconds) and computes
/// percentile statistics on demand.
#[derive(Debug, Default)]
pub struct Histogram {
    samples: Mutex<Vec<f64>>,
}

impl Histogram {
    /// Create an empty histogram
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a duration observation
    pub fn observe(&self, duration: Duration) {
        self.observe_millis(duration.as_secs_f64() * 1000.0);
    }

    /// Record a value in milliseconds
    pub fn observe_millis(&self, millis: f64) {
        self.samples.lock().push(millis);
    }

    /// Compute current statistics
    #[must_use]
    pub fn stats(&self) -> HistogramStats {
        let samples = self.samples.lock();

        if samples.is_empty() {
            return HistogramStats::default();
        }

        let count = samples.len() as u64;
        let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let sum: f64 = samples.iter().sum();
        let avg = sum / count as f64;

        let mut sorted = samples.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        HistogramStats {
            count,
            min,
            max,
            avg,
            p50: percentile(&sorted, 0.50),
            p95: percentile(&sorted, 0.95),
            p99: percentile(&sorted, 0.99),
        }
    }

    /// Discard all samples
    pub fn reset(&self) {
        self.samples.lock().clear();
    }
}

/// Percentile from sorted samples
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64 - 1.0) * p) as usize;
    sorted[idx]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe() {
        let histogram = Histogram::new();
        histogram.observe_millis(10.0);
        histogram.observe_millis(20.0);
        histogram.observe_millis(30.0);

        let stats = histogram.stats();
        assert_eq!(stats.count, 3);
        assert!((stats.min - 10.0).abs() < f64::EPSILON);
        assert!((stats.max - 30.0).abs() < f64::EPSILON);
        assert!((stats.avg - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_percentiles() {
        let histogram = Histogram::new();
        for i in 1..=100 {
            histogram.observe_millis(f64::from(i));
        }

        let stats = histogram.stats();
        assert_eq!(stats.count, 100);
        assert!(stats.p50 >= 48.0 && stats.p50 <= 52.0);
        assert!(stats.p95 >= 93.0 && stats.p95 <= 97.0);
        assert!(stats.p99 >= 98.0 && stats.p99 <= 100.0);
    }

    #[test]
    fn test_reset() {
        let histogram = Histogram::new();
        histogram.observe_millis(10.0);
        histogram.reset();
        assert_eq!(histogram.stats().count, 0);
    }
}
