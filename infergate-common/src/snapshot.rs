//! Point-in-time resource snapshots published by the resource monitor.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Load figures for one backend class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendLoad {
    /// Utilization as a fraction (0.0 to 1.0).
    pub utilization: f64,
    pub memory_used: u64,
    pub memory_total: u64,
}

impl BackendLoad {
    pub fn new(utilization: f64, memory_used: u64, memory_total: u64) -> Self {
        Self {
            utilization: utilization.clamp(0.0, 1.0),
            memory_used,
            memory_total,
        }
    }

    pub fn memory_free(&self) -> u64 {
        self.memory_total.saturating_sub(self.memory_used)
    }
}

/// Immutable view of backend load at one monitor tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub timestamp: DateTime<Utc>,
    pub accelerator: BackendLoad,
    pub general: BackendLoad,
    /// Requests waiting or executing per model (open batches, in flight, queued).
    #[serde(default)]
    pub per_model_queue_depth: HashMap<String, usize>,
}

impl ResourceSnapshot {
    pub fn accelerator_utilization(&self) -> f64 {
        self.accelerator.utilization
    }

    pub fn general_utilization(&self) -> f64 {
        self.general.utilization
    }

    pub fn queue_depth(&self, model_id: &str) -> usize {
        self.per_model_queue_depth.get(model_id).copied().unwrap_or(0)
    }
}
