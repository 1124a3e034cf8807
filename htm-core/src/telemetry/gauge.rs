use parking_lot::Mutex;

/// Gauge metric for point-in-time values
///
/// Gauges track values that can move in both directions, such as the
/// current number of resident working-memory records.
#[derive(Debug, Default)]
pub struct Gauge {
    value: Mutex<f64>,
}

impl Gauge {
    /// Create a new gauge at 0.0
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the gauge to a specific value
    pub fn set(&self, value: f64) {
        *self.value.lock() = value;
    }

    /// Add a delta (may be negative)
    pub fn add(&self, delta: f64) {
        *self.value.lock() += delta;
    }

    /// Get the current value
    #[must_use]
    pub fn get(&self) -> f64 {
        *self.value.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_add() {
        let gauge = Gauge::new();
        gauge.set(42.0);
        gauge.add(1.0);
        gauge.add(-2.0);
        assert!((gauge.get() - 41.0).abs() < f64::EPSILON);
    }
}
