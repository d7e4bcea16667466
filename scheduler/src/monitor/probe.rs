//! Load probes feeding the resource monitor.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use sysinfo::System;

use infergate_common::{Backend, BackendLoad};

use crate::engine::EngineError;

/// Source of load figures for a backend class.
#[async_trait]
pub trait ResourceProbe: Send + Sync {
    fn name(&self) -> &'static str;

    async fn sample(&self, backend: Backend) -> Result<BackendLoad, EngineError>;
}

/// Host CPU and memory, used for the general-purpose backend.
pub struct SystemProbe {
    system: tokio::sync::Mutex<System>,
}

impl SystemProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        // CPU usage is computed between two refreshes; prime the first one.
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self {
            system: tokio::sync::Mutex::new(system),
        }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceProbe for SystemProbe {
    fn name(&self) -> &'static str {
        "system"
    }

    async fn sample(&self, _backend: Backend) -> Result<BackendLoad, EngineError> {
        let mut system = self.system.lock().await;
        system.refresh_cpu_usage();
        system.refresh_memory();

        let utilization = f64::from(system.global_cpu_usage()) / 100.0;
        Ok(BackendLoad::new(
            utilization,
            system.used_memory(),
            system.total_memory(),
        ))
    }
}

/// Probe reporting values set by hand. Used for tests and simulations.
#[derive(Debug, Default)]
pub struct FixedProbe {
    loads: Mutex<HashMap<Backend, BackendLoad>>,
}

impl FixedProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, backend: Backend, load: BackendLoad) {
        self.loads.lock().insert(backend, load);
    }

    pub fn set_utilization(&self, backend: Backend, utilization: f64) {
        let mut loads = self.loads.lock();
        let load = loads.entry(backend).or_default();
        *load = BackendLoad::new(utilization, load.memory_used, load.memory_total);
    }
}

#[async_trait]
impl ResourceProbe for FixedProbe {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn sample(&self, backend: Backend) -> Result<BackendLoad, EngineError> {
        Ok(self.loads.lock().get(&backend).copied().unwrap_or_default())
    }
}
