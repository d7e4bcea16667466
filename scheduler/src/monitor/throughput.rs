//! Observed per-model throughput.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

/// Weight of the newest observation in the moving average.
const EWMA_ALPHA: f64 = 0.3;

/// Exponentially weighted items-per-second, per model.
#[derive(Debug, Default)]
pub struct ThroughputTracker {
    rates: Mutex<HashMap<String, f64>>,
}

impl ThroughputTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `items` completed in `elapsed`.
    pub fn record(&self, model_id: &str, items: usize, elapsed: Duration) {
        if items == 0 {
            return;
        }
        // Clamp to 1ms so an instantaneous engine does not produce infinity.
        let secs = elapsed.as_secs_f64().max(0.001);
        let observed = items as f64 / secs;

        let mut rates = self.rates.lock();
        rates
            .entry(model_id.to_string())
            .and_modify(|rate| *rate = EWMA_ALPHA * observed + (1.0 - EWMA_ALPHA) * *rate)
            .or_insert(observed);
    }

    pub fn items_per_sec(&self, model_id: &str) -> Option<f64> {
        self.rates.lock().get(model_id).copied()
    }
}
