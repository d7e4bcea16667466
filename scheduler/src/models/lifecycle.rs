//! Model residency under a global memory budget.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::engine::{EngineError, ExecutionEngine};
use crate::error::{Result, SchedulerError};

use super::ModelRegistry;

/// A model currently held in memory.
struct ResidentModel {
    footprint: u64,
    last_used: Instant,
    pins: Arc<AtomicUsize>,
}

impl ResidentModel {
    fn is_pinned(&self) -> bool {
        self.pins.load(Ordering::SeqCst) > 0
    }
}

/// Keeps a resident model from being evicted while held.
#[derive(Debug)]
pub struct ModelLease {
    model_id: String,
    pins: Arc<AtomicUsize>,
}

impl ModelLease {
    fn new(model_id: &str, pins: Arc<AtomicUsize>) -> Self {
        pins.fetch_add(1, Ordering::SeqCst);
        Self {
            model_id: model_id.to_string(),
            pins,
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }
}

impl Drop for ModelLease {
    fn drop(&mut self) {
        self.pins.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Diagnostics view of a resident model.
#[derive(Debug, Clone, Serialize)]
pub struct ResidentModelInfo {
    pub model_id: String,
    pub memory_footprint: u64,
    pub pins: usize,
    pub idle_ms: u64,
}

/// Loads and evicts models, never letting resident memory exceed the budget.
///
/// Loads are serialized; residency checks and pinning happen under one lock so
/// an eviction can never race with a new pin.
pub struct ModelLifecycleManager {
    registry: Arc<ModelRegistry>,
    engine: Arc<dyn ExecutionEngine>,
    budget: u64,
    keep_resident: HashSet<String>,
    resident: Mutex<HashMap<String, ResidentModel>>,
    load_semaphore: Semaphore,
}

impl ModelLifecycleManager {
    pub fn new(
        registry: Arc<ModelRegistry>,
        engine: Arc<dyn ExecutionEngine>,
        budget: u64,
        keep_resident: Vec<String>,
    ) -> Self {
        Self {
            registry,
            engine,
            budget,
            keep_resident: keep_resident.into_iter().collect(),
            resident: Mutex::new(HashMap::new()),
            load_semaphore: Semaphore::new(1),
        }
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    /// Summed footprint of resident models.
    pub fn resident_bytes(&self) -> u64 {
        self.resident.lock().values().map(|m| m.footprint).sum()
    }

    pub fn is_resident(&self, model_id: &str) -> bool {
        self.resident.lock().contains_key(model_id)
    }

    pub fn resident_models(&self) -> Vec<ResidentModelInfo> {
        let now = Instant::now();
        let mut models: Vec<_> = self
            .resident
            .lock()
            .iter()
            .map(|(id, m)| ResidentModelInfo {
                model_id: id.clone(),
                memory_footprint: m.footprint,
                pins: m.pins.load(Ordering::SeqCst),
                idle_ms: now.duration_since(m.last_used).as_millis() as u64,
            })
            .collect();
        models.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        models
    }

    /// Mark a model as used now.
    pub fn touch(&self, model_id: &str) {
        if let Some(model) = self.resident.lock().get_mut(model_id) {
            model.last_used = Instant::now();
        }
    }

    /// Pin an already-resident model.
    fn lease_resident(&self, model_id: &str) -> Option<ModelLease> {
        let mut resident = self.resident.lock();
        let model = resident.get_mut(model_id)?;
        model.last_used = Instant::now();
        Some(ModelLease::new(model_id, model.pins.clone()))
    }

    /// Make `model_id` resident, loading it if necessary, and pin it.
    ///
    /// Fails with `resource_exhausted` when the budget cannot be met because
    /// every other resident model is pinned.
    pub async fn ensure_loaded(&self, model_id: &str) -> Result<ModelLease> {
        if let Some(lease) = self.lease_resident(model_id) {
            return Ok(lease);
        }

        let _permit = self
            .load_semaphore
            .acquire()
            .await
            .map_err(|e| SchedulerError::resource_exhausted(format!("Load queue closed: {}", e)))?;

        // Another task may have loaded it while we waited for the permit.
        if let Some(lease) = self.lease_resident(model_id) {
            return Ok(lease);
        }

        let descriptor = self.registry.require(model_id)?.clone();
        self.make_room(descriptor.memory_footprint, model_id).await?;

        let started = Instant::now();
        self.engine
            .load_model(&descriptor)
            .await
            .map_err(|e| match e {
                EngineError::ResourceExhausted(msg) => SchedulerError::resource_exhausted(format!(
                    "Engine out of memory loading {}: {}",
                    model_id, msg
                )),
                other => SchedulerError::resource_exhausted(format!(
                    "Failed to load {}: {}",
                    model_id, other
                )),
            })?;

        let pins = Arc::new(AtomicUsize::new(0));
        let lease = ModelLease::new(model_id, pins.clone());
        self.resident.lock().insert(
            model_id.to_string(),
            ResidentModel {
                footprint: descriptor.memory_footprint,
                last_used: Instant::now(),
                pins,
            },
        );

        tracing::info!(
            model = %model_id,
            footprint = descriptor.memory_footprint,
            resident_bytes = self.resident_bytes(),
            budget = self.budget,
            load_ms = started.elapsed().as_millis() as u64,
            "Model loaded"
        );
        Ok(lease)
    }

    /// Evict least-recently-used unpinned models until `required_bytes` fit.
    pub async fn evict_if_needed(&self, required_bytes: u64) -> Result<()> {
        let _permit = self
            .load_semaphore
            .acquire()
            .await
            .map_err(|e| SchedulerError::resource_exhausted(format!("Load queue closed: {}", e)))?;
        self.make_room(required_bytes, "").await
    }

    /// Caller must hold the load permit.
    async fn make_room(&self, required_bytes: u64, model_to_load: &str) -> Result<()> {
        if required_bytes > self.budget {
            return Err(SchedulerError::resource_exhausted(format!(
                "Cannot load {}: requires {} bytes but the budget is {} bytes",
                model_to_load, required_bytes, self.budget
            )));
        }

        loop {
            let victim = {
                let mut resident = self.resident.lock();
                let used: u64 = resident.values().map(|m| m.footprint).sum();
                let available = self.budget - used.min(self.budget);
                if available >= required_bytes {
                    return Ok(());
                }

                let lru = resident
                    .iter()
                    .filter(|(id, m)| {
                        !m.is_pinned()
                            && !self.keep_resident.contains(id.as_str())
                            && id.as_str() != model_to_load
                    })
                    .min_by_key(|(_, m)| m.last_used)
                    .map(|(id, _)| id.clone());

                match lru {
                    Some(id) => {
                        let freed = resident.remove(&id).map(|m| m.footprint).unwrap_or(0);
                        tracing::info!(
                            model = %id,
                            freed,
                            needed = required_bytes,
                            available,
                            "Evicting LRU model to free memory for {}",
                            model_to_load
                        );
                        id
                    }
                    None => {
                        return Err(SchedulerError::resource_exhausted(format!(
                            "Cannot load {}: requires {} bytes but only {} bytes available and every resident model is pinned",
                            model_to_load, required_bytes, available
                        )));
                    }
                }
            };

            if let Err(e) = self.engine.unload_model(&victim).await {
                tracing::warn!(model = %victim, "Engine failed to unload evicted model: {}", e);
            }
        }
    }

    /// Load every keep-resident model. Called once at startup.
    pub async fn preload(&self) -> Result<()> {
        let mut models: Vec<_> = self.keep_resident.iter().cloned().collect();
        models.sort();
        for model_id in models {
            self.ensure_loaded(&model_id).await?;
        }
        Ok(())
    }

    /// Unload unpinned models idle for at least `idle`. Returns their ids.
    pub async fn unload_idle(&self, idle: Duration) -> Vec<String> {
        let Ok(_permit) = self.load_semaphore.try_acquire() else {
            // A load is in progress; try again on the next sweep.
            return vec![];
        };

        let now = Instant::now();
        let idle_models: Vec<String> = {
            let mut resident = self.resident.lock();
            let ids: Vec<String> = resident
                .iter()
                .filter(|(id, m)| {
                    !m.is_pinned()
                        && !self.keep_resident.contains(id.as_str())
                        && now.duration_since(m.last_used) >= idle
                })
                .map(|(id, _)| id.clone())
                .collect();
            for id in &ids {
                resident.remove(id);
            }
            ids
        };

        for model_id in &idle_models {
            tracing::info!(model = %model_id, "Unloading idle model");
            if let Err(e) = self.engine.unload_model(model_id).await {
                tracing::warn!(model = %model_id, "Engine failed to unload idle model: {}", e);
            }
        }
        idle_models
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{descriptor, MockEngine};
    use infergate_common::ErrorKind;

    fn manager(budget: u64, keep: Vec<String>) -> (ModelLifecycleManager, Arc<MockEngine>) {
        let mut models = vec![];
        for (id, footprint) in [("a", 400), ("b", 400), ("c", 400), ("big", 900)] {
            let mut d = descriptor(id);
            d.memory_footprint = footprint;
            models.push(d);
        }
        let registry = Arc::new(ModelRegistry::new(models).unwrap());
        let engine = Arc::new(MockEngine::new());
        (
            ModelLifecycleManager::new(registry, engine.clone(), budget, keep),
            engine,
        )
    }

    #[tokio::test]
    async fn test_load_once_and_pin() {
        let (lm, engine) = manager(1000, vec![]);
        let lease = lm.ensure_loaded("a").await.unwrap();
        let again = lm.ensure_loaded("a").await.unwrap();
        assert_eq!(lease.model_id(), "a");
        assert_eq!(engine.loads(), vec!["a".to_string()]);
        assert_eq!(lm.resident_models()[0].pins, 2);

        drop(lease);
        drop(again);
        assert_eq!(lm.resident_models()[0].pins, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evicts_least_recently_used() {
        let (lm, engine) = manager(1000, vec![]);
        drop(lm.ensure_loaded("a").await.unwrap());
        tokio::time::advance(Duration::from_millis(10)).await;
        drop(lm.ensure_loaded("b").await.unwrap());
        tokio::time::advance(Duration::from_millis(10)).await;
        lm.touch("a");

        drop(lm.ensure_loaded("c").await.unwrap());
        assert_eq!(engine.unloads(), vec!["b".to_string()]);
        assert!(lm.is_resident("a"));
        assert!(lm.is_resident("c"));
        assert!(lm.resident_bytes() <= lm.budget());
    }

    #[tokio::test]
    async fn test_pinned_models_are_never_evicted() {
        let (lm, engine) = manager(1000, vec![]);
        let _a = lm.ensure_loaded("a").await.unwrap();
        let _b = lm.ensure_loaded("b").await.unwrap();

        let err = lm.ensure_loaded("c").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ResourceExhausted);
        assert!(engine.unloads().is_empty());
        assert!(!lm.is_resident("c"));
        assert_eq!(lm.resident_bytes(), 800);
    }

    #[tokio::test]
    async fn test_keep_resident_survives_eviction() {
        let (lm, _engine) = manager(1000, vec!["a".to_string()]);
        lm.preload().await.unwrap();
        drop(lm.ensure_loaded("b").await.unwrap());

        drop(lm.ensure_loaded("c").await.unwrap());
        assert!(lm.is_resident("a"));
        assert!(!lm.is_resident("b"));
    }

    #[tokio::test]
    async fn test_model_larger_than_budget() {
        let (lm, _engine) = manager(800, vec![]);
        let err = lm.ensure_loaded("big").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ResourceExhausted);
    }

    #[tokio::test]
    async fn test_engine_load_failure_is_resource_exhaustion() {
        let (lm, engine) = manager(1000, vec![]);
        engine.fail_loads_for("a");
        let err = lm.ensure_loaded("a").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ResourceExhausted);
        assert!(!lm.is_resident("a"));
    }

    #[tokio::test]
    async fn test_concurrent_loads_share_one_engine_load() {
        let (lm, engine) = manager(1000, vec![]);
        let lm = Arc::new(lm);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lm = lm.clone();
                tokio::spawn(async move { lm.ensure_loaded("a").await.map(drop) })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(engine.loads().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unload_idle() {
        let (lm, engine) = manager(1000, vec![]);
        drop(lm.ensure_loaded("a").await.unwrap());
        let _b = lm.ensure_loaded("b").await.unwrap();

        tokio::time::advance(Duration::from_secs(120)).await;
        let unloaded = lm.unload_idle(Duration::from_secs(60)).await;
        assert_eq!(unloaded, vec!["a".to_string()]);
        assert_eq!(engine.unloads(), vec!["a".to_string()]);
        assert!(lm.is_resident("b"));
    }

    #[tokio::test]
    async fn test_evict_if_needed_frees_headroom() {
        let (lm, _engine) = manager(1000, vec![]);
        drop(lm.ensure_loaded("a").await.unwrap());
        drop(lm.ensure_loaded("b").await.unwrap());

        lm.evict_if_needed(500).await.unwrap();
        assert!(lm.budget() - lm.resident_bytes() >= 500);
    }
}
