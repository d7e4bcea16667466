//! The scheduler context: wires every component together and owns the
//! request flow from admission to resolution.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{join_all, BoxFuture, FutureExt};
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use infergate_common::{
    ErrorKind, FallbackStrategy, FallbackTarget, ModelDescriptor, Payload,
    ResourceSnapshot,
};

use crate::batching::{
    BatchAssembler, BatchDispatcher, BatchHandle, DispatchFailure, SealedBatch,
};
use crate::config::{Config, SchedulerConfig};
use crate::engine::ExecutionEngine;
use crate::error::{Result, SchedulerError};
use crate::models::{ModelLifecycleManager, ModelRegistry, ResidentModelInfo};
use crate::monitor::{QueueDepths, ResourceMonitor, ResourceProbe, ThroughputTracker};
use crate::request::{
    Completion, DegradationTrail, InferenceRequest, PendingRequest, RequestState, ResultReceiver,
};
use crate::routing::{BackendSelector, FallbackManager, FallbackReason};

/// Adaptive routing and batching scheduler.
///
/// Constructed once at startup and shared by reference; there is no global
/// state. `start` launches the monitor and tick loops, `shutdown` stops them.
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

struct SchedulerInner {
    settings: SchedulerConfig,
    registry: Arc<ModelRegistry>,
    lifecycle: Arc<ModelLifecycleManager>,
    monitor: Arc<ResourceMonitor>,
    depths: Arc<QueueDepths>,
    selector: BackendSelector,
    assembler: Arc<BatchAssembler>,
    dispatcher: BatchDispatcher,
    fallback: FallbackManager,
    /// Signalled whenever a batch finishes, waking requests queued for capacity.
    capacity: Notify,
}

impl Scheduler {
    /// Build every component from validated configuration.
    pub fn new(
        config: &Config,
        engine: Arc<dyn ExecutionEngine>,
        accelerator_probe: Arc<dyn ResourceProbe>,
        general_probe: Arc<dyn ResourceProbe>,
    ) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(ModelRegistry::from_config(config)?);
        let settings = config.scheduler.clone();

        let depths = Arc::new(QueueDepths::new());
        let throughput = Arc::new(ThroughputTracker::new());
        let monitor = Arc::new(ResourceMonitor::new(
            accelerator_probe,
            general_probe,
            depths.clone(),
        ));
        let lifecycle = Arc::new(ModelLifecycleManager::new(
            registry.clone(),
            engine.clone(),
            settings.memory_budget_bytes,
            settings.keep_resident.clone(),
        ));

        let inner = SchedulerInner {
            selector: BackendSelector::new(registry.clone(), config.watermarks),
            assembler: Arc::new(BatchAssembler::new(
                registry.clone(),
                settings.max_batchable_payload_bytes,
            )),
            dispatcher: BatchDispatcher::new(engine, lifecycle.clone(), throughput.clone()),
            fallback: FallbackManager::new(
                registry.clone(),
                throughput,
                depths.clone(),
                config.watermarks,
                settings.queue_ceiling,
                config.fallback.degradation_factor,
            ),
            settings,
            registry,
            lifecycle,
            monitor,
            depths,
            capacity: Notify::new(),
        };

        tracing::info!(
            models = inner.registry.len(),
            budget = inner.settings.memory_budget_bytes,
            "Scheduler initialized"
        );

        Ok(Self {
            inner: Arc::new(inner),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Preload resident models, take a first snapshot, and start the
    /// background loops.
    pub async fn start(&self) -> Result<()> {
        self.inner.lifecycle.preload().await?;
        self.inner.monitor.refresh().await;

        let monitor = self.inner.monitor.clone();
        let monitor_interval = Duration::from_millis(self.inner.settings.monitor_interval_ms);
        let monitor_task = tokio::spawn(monitor.run(monitor_interval));

        let inner = self.inner.clone();
        let tick_interval = Duration::from_millis(self.inner.settings.tick_interval_ms);
        let tick_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                inner.clone().tick().await;
            }
        });

        let mut tasks = self.tasks.lock();
        tasks.push(monitor_task);
        tasks.push(tick_task);

        tracing::info!(
            monitor_interval_ms = self.inner.settings.monitor_interval_ms,
            tick_interval_ms = self.inner.settings.tick_interval_ms,
            "Scheduler started"
        );
        Ok(())
    }

    /// Stop the background loops. In-flight requests still resolve.
    pub fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        tracing::info!("Scheduler stopped");
    }

    /// Submit a request and wait for its result.
    pub async fn submit(&self, request: InferenceRequest) -> Result<Completion> {
        self.submit_tracked(request)?.wait().await
    }

    /// Submit a request and return a handle exposing its state.
    ///
    /// Fails synchronously with a validation error for malformed requests.
    pub fn submit_tracked(&self, request: InferenceRequest) -> Result<SubmitHandle> {
        validate(&request, &self.inner.registry)?;

        let request_id = request.id;
        let deadline = request.deadline();
        let (mut pending, rx, status) = PendingRequest::new(request);
        pending.track_depth(&self.inner.depths);
        let trail = pending.trail();

        tracing::debug!(
            request_id = %request_id,
            model = %pending.model_id(),
            kind = %pending.request().kind(),
            priority = ?pending.request().priority,
            "Request submitted"
        );

        tokio::spawn(self.inner.clone().route(pending));

        Ok(SubmitHandle {
            request_id,
            deadline,
            rx,
            status,
            trail,
            assembler: self.inner.assembler.clone(),
            resolved: false,
        })
    }

    /// Latest resource snapshot.
    pub fn snapshot(&self) -> Arc<ResourceSnapshot> {
        self.inner.monitor.snapshot()
    }

    /// Sample the probes now instead of waiting for the next interval.
    pub async fn refresh_snapshot(&self) -> Arc<ResourceSnapshot> {
        self.inner.monitor.refresh().await
    }

    /// Read-only view of the configured models.
    pub fn registry(&self) -> &ModelRegistry {
        &self.inner.registry
    }

    pub fn descriptors(&self) -> Vec<ModelDescriptor> {
        self.inner.registry.descriptors()
    }

    pub fn resident_models(&self) -> Vec<ResidentModelInfo> {
        self.inner.lifecycle.resident_models()
    }

    pub fn resident_bytes(&self) -> u64 {
        self.inner.lifecycle.resident_bytes()
    }

    pub fn memory_budget(&self) -> u64 {
        self.inner.lifecycle.budget()
    }

    /// Requests waiting in open batches.
    pub fn pending_requests(&self) -> usize {
        self.inner.assembler.pending_count()
    }

    /// Default max wait for ingress requests that do not set one.
    pub fn default_max_wait(&self) -> Duration {
        Duration::from_millis(self.inner.settings.default_max_wait_ms)
    }

    /// Run one housekeeping sweep immediately.
    pub async fn tick(&self) {
        self.inner.clone().tick().await;
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

impl SchedulerInner {
    /// Seal expired batches and unload idle models.
    async fn tick(self: Arc<Self>) {
        for sealed in self.assembler.tick(Instant::now()) {
            tokio::spawn(self.clone().run_batch(sealed));
        }
        if let Some(idle_secs) = self.settings.idle_unload_secs {
            self.lifecycle
                .unload_idle(Duration::from_secs(idle_secs))
                .await;
        }
    }

    /// Make the model resident, then admit the request into a batch.
    ///
    /// Boxed because fallback re-enters it.
    fn route(self: Arc<Self>, mut pending: PendingRequest) -> BoxFuture<'static, ()> {
        async move {
            if pending.is_cancelled() {
                return;
            }

            match self.lifecycle.ensure_loaded(pending.model_id()).await {
                Ok(lease) => pending.lease = Some(lease),
                Err(err) if err.kind == ErrorKind::ResourceExhausted => {
                    self.degrade(pending, FallbackReason::ResourceExhaustion, err.message)
                        .await;
                    return;
                }
                Err(err) => {
                    pending.fail(err);
                    return;
                }
            }

            let admission = match self.assembler.admit(pending) {
                Ok(admission) => admission,
                // The assembler already resolved the request.
                Err(_) => return,
            };

            if let Some(sealed) = admission.sealed {
                self.run_batch(sealed).await;
            } else if let Some(deadline) = admission.window_deadline {
                tokio::spawn(self.clone().close_window(admission.handle, deadline));
            }
        }
        .boxed()
    }

    /// Seal a batch when its window elapses, even with no new admissions.
    async fn close_window(self: Arc<Self>, handle: BatchHandle, deadline: Instant) {
        tokio::time::sleep_until(deadline).await;
        if let Some(sealed) = self.assembler.seal_expired(&handle) {
            self.run_batch(sealed).await;
        }
    }

    /// Choose a backend for a sealed batch, execute it, and resolve or
    /// degrade each member.
    async fn run_batch(self: Arc<Self>, sealed: SealedBatch) {
        let backend = match sealed.forced_backend {
            Some(backend) => Ok(backend),
            None => {
                let snapshot = self.monitor.snapshot();
                self.selector
                    .select(&sealed.model_id, sealed.len(), &snapshot)
            }
        };

        let backend = match backend {
            Ok(backend) => backend,
            Err(err) => {
                tracing::error!(batch = %sealed.id, model = %sealed.model_id, "Backend selection failed: {}", err);
                for pending in sealed.requests {
                    pending.fail(err.clone());
                }
                return;
            }
        };

        let outcomes = self.dispatcher.dispatch(sealed.assign(backend)).await;
        self.capacity.notify_waiters();

        let mut degradations = Vec::new();
        for outcome in outcomes {
            match outcome.result {
                Ok(output) => outcome.pending.complete(output, outcome.backend),
                Err(DispatchFailure::ResourceExhausted(msg)) => degradations.push(
                    self.clone()
                        .degrade(outcome.pending, FallbackReason::ResourceExhaustion, msg),
                ),
                Err(DispatchFailure::Execution(msg)) => degradations.push(
                    self.clone()
                        .degrade(outcome.pending, FallbackReason::ExecutionFailure, msg),
                ),
            }
        }
        join_all(degradations).await;
    }

    /// Apply the fallback manager's decision to a request that could not run.
    async fn degrade(self: Arc<Self>, mut pending: PendingRequest, reason: FallbackReason, message: String) {
        if pending.is_cancelled() {
            return;
        }

        let snapshot = self.monitor.snapshot();
        let decision = self.fallback.handle(&pending, reason, &snapshot);
        pending.record(decision.clone());

        match (decision.strategy, decision.target.clone()) {
            (FallbackStrategy::SmallerModel, Some(FallbackTarget::Model(variant))) => {
                pending.reroute(&variant, &self.depths);
                self.route(pending).await;
            }
            (FallbackStrategy::AlternateBackend, Some(FallbackTarget::Backend(backend))) => {
                pending.forced_backend = Some(backend);
                self.route(pending).await;
            }
            (FallbackStrategy::QueueWithEta, _) => {
                let eta = decision
                    .eta()
                    .unwrap_or_else(|| Duration::from_millis(self.settings.tick_interval_ms));
                if Instant::now() + eta >= pending.deadline() {
                    let err = SchedulerError::resource_exhausted(format!(
                        "{}; estimated wait {}ms exceeds the request deadline",
                        message,
                        eta.as_millis()
                    ))
                    .with_degradation(Some(FallbackStrategy::QueueWithEta))
                    .with_eta(eta);
                    pending.fail(err);
                    return;
                }

                // Release the pin while waiting so the model can be evicted.
                pending.lease = None;
                pending.transition(RequestState::Queued { eta });
                let capacity = self.capacity.notified();
                tokio::select! {
                    _ = capacity => {}
                    _ = tokio::time::sleep(eta) => {}
                }
                self.route(pending).await;
            }
            _ => {
                let kind = match reason {
                    FallbackReason::ResourceExhaustion => ErrorKind::ResourceExhausted,
                    FallbackReason::ExecutionFailure => ErrorKind::Execution,
                };
                let degradation = pending.last_strategy();
                pending.fail(SchedulerError::new(kind, message).with_degradation(degradation));
            }
        }
    }
}

/// Reject malformed requests before they reach the scheduler.
fn validate(request: &InferenceRequest, registry: &ModelRegistry) -> Result<()> {
    let descriptor = registry.require(&request.model_id)?;

    if !descriptor.serves(request.kind()) {
        return Err(SchedulerError::validation(format!(
            "Model {} does not serve {} requests",
            request.model_id,
            request.kind()
        )));
    }
    if !descriptor.provides_all(&request.required_capabilities) {
        return Err(SchedulerError::validation(format!(
            "Model {} lacks required capabilities {:?}",
            request.model_id, request.required_capabilities
        )));
    }
    if request.max_wait.is_zero() {
        return Err(SchedulerError::validation("max_wait must be positive"));
    }

    match &request.payload {
        Payload::Embedding { input } => {
            if input.trim().is_empty() {
                return Err(SchedulerError::validation("Embedding input is empty"));
            }
        }
        Payload::Generation {
            prompt,
            max_tokens,
            temperature,
        } => {
            if prompt.trim().is_empty() {
                return Err(SchedulerError::validation("Generation prompt is empty"));
            }
            if *max_tokens == Some(0) {
                return Err(SchedulerError::validation("max_tokens must be positive"));
            }
            if let Some(t) = temperature {
                if !(0.0..=2.0).contains(t) {
                    return Err(SchedulerError::validation(format!(
                        "temperature {} outside 0.0..=2.0",
                        t
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Caller-side handle of a submitted request.
///
/// Dropping it before the request resolves cancels the request: it is removed
/// from its open batch, or its result is discarded if already dispatched.
pub struct SubmitHandle {
    request_id: Uuid,
    deadline: Instant,
    rx: ResultReceiver,
    status: watch::Receiver<RequestState>,
    trail: Arc<Mutex<DegradationTrail>>,
    assembler: Arc<BatchAssembler>,
    resolved: bool,
}

impl SubmitHandle {
    /// Watch the request move through its states.
    pub fn status(&self) -> watch::Receiver<RequestState> {
        self.status.clone()
    }

    /// Wait for the result, at most until the request's deadline.
    pub async fn wait(mut self) -> Result<Completion> {
        let outcome = tokio::time::timeout_at(self.deadline, &mut self.rx).await;
        self.resolved = true;

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SchedulerError::execution(format!(
                "Request {} was dropped without a result",
                self.request_id
            ))),
            Err(_) => {
                // Nobody reads the result any more.
                self.rx.close();
                self.assembler.cancel(self.request_id);
                let state = self.status.borrow().clone();
                let trail = *self.trail.lock();
                let mut err = SchedulerError::timeout(format!(
                    "Request {} exceeded its max_wait",
                    self.request_id
                ))
                .with_degradation(trail.strategy);
                let eta = match &state {
                    RequestState::Queued { eta } => Some(*eta),
                    _ => trail.eta,
                };
                if let Some(eta) = eta {
                    err = err.with_eta(eta);
                }
                tracing::debug!(request_id = %self.request_id, state = ?state, "Request timed out");
                Err(err)
            }
        }
    }
}

impl Drop for SubmitHandle {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }
        self.rx.close();
        if self.assembler.cancel(self.request_id) {
            tracing::debug!(request_id = %self.request_id, "Submit handle dropped, request cancelled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::test_config;
    use infergate_common::Capability;

    fn registry() -> ModelRegistry {
        ModelRegistry::from_config(&test_config()).unwrap()
    }

    #[test]
    fn test_validate_accepts_well_formed() {
        let request = InferenceRequest::new("minilm", Payload::embedding("hello"));
        assert!(validate(&request, &registry()).is_ok());
    }

    #[test]
    fn test_validate_rejects_kind_mismatch() {
        let request = InferenceRequest::new("minilm", Payload::generation("hello"));
        let err = validate(&request, &registry()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[test]
    fn test_validate_rejects_missing_capability() {
        let request = InferenceRequest::new("minilm", Payload::embedding("hello"))
            .with_capabilities(vec![Capability::LongContext]);
        assert!(validate(&request, &registry()).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_payloads() {
        let registry = registry();
        let empty = InferenceRequest::new("minilm", Payload::embedding("  "));
        assert!(validate(&empty, &registry).is_err());

        let hot = InferenceRequest::new(
            "tinyllama",
            Payload::Generation {
                prompt: "hi".to_string(),
                max_tokens: Some(16),
                temperature: Some(3.5),
            },
        );
        assert!(validate(&hot, &registry).is_err());

        let no_wait = InferenceRequest::new("minilm", Payload::embedding("hello"))
            .with_max_wait(Duration::ZERO);
        assert!(validate(&no_wait, &registry).is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_model() {
        let request = InferenceRequest::new("gpt-9", Payload::embedding("hello"));
        assert_eq!(
            validate(&request, &registry()).unwrap_err().kind,
            ErrorKind::Validation
        );
    }
}
