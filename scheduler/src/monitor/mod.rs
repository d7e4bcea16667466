//! Resource monitor.
//!
//! Samples backend load on a fixed interval and publishes an immutable
//! [`ResourceSnapshot`] through a watch channel. The monitor is the only
//! writer; the backend selector and fallback manager read the latest value.

mod probe;
mod throughput;

pub use probe::{FixedProbe, ResourceProbe, SystemProbe};
pub use throughput::ThroughputTracker;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use infergate_common::{Backend, BackendLoad, ResourceSnapshot};

/// Live count of requests per model that are waiting or executing.
#[derive(Debug, Default)]
pub struct QueueDepths {
    depths: Mutex<HashMap<String, usize>>,
}

impl QueueDepths {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one request against `model_id` until the guard is dropped.
    pub fn enter(self: &Arc<Self>, model_id: &str) -> DepthGuard {
        *self.depths.lock().entry(model_id.to_string()).or_insert(0) += 1;
        DepthGuard {
            depths: self.clone(),
            model_id: model_id.to_string(),
        }
    }

    pub fn get(&self, model_id: &str) -> usize {
        self.depths.lock().get(model_id).copied().unwrap_or(0)
    }

    /// Non-zero depths.
    pub fn snapshot(&self) -> HashMap<String, usize> {
        self.depths
            .lock()
            .iter()
            .filter(|(_, depth)| **depth > 0)
            .map(|(model, depth)| (model.clone(), *depth))
            .collect()
    }

    fn leave(&self, model_id: &str) {
        let mut depths = self.depths.lock();
        if let Some(depth) = depths.get_mut(model_id) {
            *depth = depth.saturating_sub(1);
            if *depth == 0 {
                depths.remove(model_id);
            }
        }
    }
}

/// Decrements the queue depth of its model on drop.
#[derive(Debug)]
pub struct DepthGuard {
    depths: Arc<QueueDepths>,
    model_id: String,
}

impl DepthGuard {
    pub fn model_id(&self) -> &str {
        &self.model_id
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        self.depths.leave(&self.model_id);
    }
}

/// Publishes resource snapshots.
pub struct ResourceMonitor {
    accelerator: Arc<dyn ResourceProbe>,
    general: Arc<dyn ResourceProbe>,
    depths: Arc<QueueDepths>,
    tx: watch::Sender<Arc<ResourceSnapshot>>,
}

impl ResourceMonitor {
    pub fn new(
        accelerator: Arc<dyn ResourceProbe>,
        general: Arc<dyn ResourceProbe>,
        depths: Arc<QueueDepths>,
    ) -> Self {
        let initial = ResourceSnapshot {
            timestamp: Utc::now(),
            ..Default::default()
        };
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self {
            accelerator,
            general,
            depths,
            tx,
        }
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> Arc<ResourceSnapshot> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<ResourceSnapshot>> {
        self.tx.subscribe()
    }

    /// Sample every probe and publish a fresh snapshot. A probe that fails
    /// keeps its backend's previous figures.
    pub async fn refresh(&self) -> Arc<ResourceSnapshot> {
        let previous = self.snapshot();
        let (accelerator, general) = tokio::join!(
            self.sample(&self.accelerator, Backend::Accelerator, previous.accelerator),
            self.sample(&self.general, Backend::General, previous.general),
        );

        let snapshot = Arc::new(ResourceSnapshot {
            timestamp: Utc::now(),
            accelerator,
            general,
            per_model_queue_depth: self.depths.snapshot(),
        });

        tracing::trace!(
            accelerator = snapshot.accelerator.utilization,
            general = snapshot.general.utilization,
            "Published resource snapshot"
        );
        self.tx.send_replace(snapshot.clone());
        snapshot
    }

    async fn sample(
        &self,
        probe: &Arc<dyn ResourceProbe>,
        backend: Backend,
        previous: BackendLoad,
    ) -> BackendLoad {
        match probe.sample(backend).await {
            Ok(load) => load,
            Err(e) => {
                tracing::warn!(
                    probe = probe.name(),
                    backend = %backend,
                    "Resource probe failed, keeping previous sample: {}",
                    e
                );
                previous
            }
        }
    }

    /// Refresh on a fixed interval until the task is aborted.
    pub async fn run(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.refresh().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineError;
    use async_trait::async_trait;

    struct BrokenProbe;

    #[async_trait]
    impl ResourceProbe for BrokenProbe {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn sample(&self, _backend: Backend) -> Result<BackendLoad, EngineError> {
            Err(EngineError::Transport("connection refused".to_string()))
        }
    }

    #[test]
    fn test_depth_guard_counts() {
        let depths = Arc::new(QueueDepths::new());
        let a = depths.enter("minilm");
        let b = depths.enter("minilm");
        let _c = depths.enter("llama");
        assert_eq!(depths.get("minilm"), 2);

        drop(a);
        assert_eq!(depths.get("minilm"), 1);
        drop(b);
        assert_eq!(depths.get("minilm"), 0);
        assert_eq!(depths.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_publishes_probe_values() {
        let probe = Arc::new(FixedProbe::new());
        probe.set_utilization(Backend::Accelerator, 0.99);
        probe.set_utilization(Backend::General, 0.25);
        let depths = Arc::new(QueueDepths::new());
        let _guard = depths.enter("minilm");

        let monitor = ResourceMonitor::new(probe.clone(), probe, depths);
        let mut rx = monitor.subscribe();

        let snapshot = monitor.refresh().await;
        assert_eq!(snapshot.accelerator_utilization(), 0.99);
        assert_eq!(snapshot.general_utilization(), 0.25);
        assert_eq!(snapshot.queue_depth("minilm"), 1);

        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().accelerator_utilization(), 0.99);
        assert_eq!(monitor.snapshot().accelerator_utilization(), 0.99);
    }

    #[tokio::test]
    async fn test_failed_probe_keeps_previous_sample() {
        let good = Arc::new(FixedProbe::new());
        good.set_utilization(Backend::General, 0.5);
        let depths = Arc::new(QueueDepths::new());

        let monitor = ResourceMonitor::new(Arc::new(BrokenProbe), good.clone(), depths);
        let first = monitor.refresh().await;
        assert_eq!(first.accelerator_utilization(), 0.0);
        assert_eq!(first.general_utilization(), 0.5);

        good.set_utilization(Backend::General, 0.7);
        let second = monitor.refresh().await;
        assert_eq!(second.general_utilization(), 0.7);
        assert!(second.timestamp >= first.timestamp);
    }
}
