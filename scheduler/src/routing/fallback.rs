//! Degradation path selection.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use infergate_common::{
    Backend, FallbackDecision, FallbackStrategy, FallbackTarget, ModelDescriptor, ResourceSnapshot,
};

use crate::config::WatermarkConfig;
use crate::models::ModelRegistry;
use crate::monitor::{QueueDepths, ThroughputTracker};
use crate::request::PendingRequest;

/// Why the fallback manager was consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// No memory, no capacity, or the engine reported exhaustion.
    ResourceExhaustion,
    /// The engine failed the request, including its singleton retry.
    ExecutionFailure,
}

impl std::fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FallbackReason::ResourceExhaustion => write!(f, "resource_exhaustion"),
            FallbackReason::ExecutionFailure => write!(f, "execution_failure"),
        }
    }
}

/// Chooses how a request that cannot run as asked is degraded.
///
/// Strategies are tried cheapest first: a smaller variant, then the general
/// backend, then queueing with an estimate, then a terminal error.
pub struct FallbackManager {
    registry: Arc<ModelRegistry>,
    throughput: Arc<ThroughputTracker>,
    depths: Arc<QueueDepths>,
    watermarks: WatermarkConfig,
    queue_ceiling: usize,
    degradation_factor: f64,
}

impl FallbackManager {
    pub fn new(
        registry: Arc<ModelRegistry>,
        throughput: Arc<ThroughputTracker>,
        depths: Arc<QueueDepths>,
        watermarks: WatermarkConfig,
        queue_ceiling: usize,
        degradation_factor: f64,
    ) -> Self {
        Self {
            registry,
            throughput,
            depths,
            watermarks,
            queue_ceiling,
            degradation_factor,
        }
    }

    pub fn handle(
        &self,
        pending: &PendingRequest,
        reason: FallbackReason,
        snapshot: &ResourceSnapshot,
    ) -> FallbackDecision {
        let decision = match self.registry.get(pending.model_id()) {
            Some(descriptor) => self.decide(pending, descriptor, reason, snapshot),
            None => FallbackDecision::terminal(),
        };

        tracing::warn!(
            request_id = %pending.id(),
            model = %pending.model_id(),
            %reason,
            strategy = %decision.strategy,
            eta_ms = ?decision.eta_ms,
            "Fallback decision"
        );
        decision
    }

    fn decide(
        &self,
        pending: &PendingRequest,
        descriptor: &ModelDescriptor,
        reason: FallbackReason,
        snapshot: &ResourceSnapshot,
    ) -> FallbackDecision {
        if let Some(variant) = self.usable_variant(pending, descriptor) {
            return FallbackDecision::smaller_model(variant, self.degradation_factor);
        }

        if pending.last_backend == Some(Backend::Accelerator)
            && pending.forced_backend != Some(Backend::General)
            && snapshot.accelerator_utilization() > self.watermarks.accelerator_critical
            && descriptor.supports(Backend::General)
        {
            return FallbackDecision::alternate_backend(Backend::General);
        }

        // Waiting does not fix a request the engine cannot process.
        if reason == FallbackReason::ResourceExhaustion {
            let depth = self.depths.get(pending.model_id());
            if depth < self.queue_ceiling {
                return FallbackDecision::queue_with_eta(self.estimate_wait(descriptor, depth));
            }
        }

        FallbackDecision::terminal()
    }

    /// The configured smaller variant, if it serves this request and has not
    /// already been tried for it.
    fn usable_variant<'a>(
        &self,
        pending: &PendingRequest,
        descriptor: &'a ModelDescriptor,
    ) -> Option<&'a str> {
        let variant_id = descriptor.smaller_variant.as_deref()?;
        let variant = self.registry.get(variant_id)?;

        let mut visited: HashSet<&str> = pending
            .history
            .iter()
            .filter(|d| d.strategy == FallbackStrategy::SmallerModel)
            .filter_map(|d| match &d.target {
                Some(FallbackTarget::Model(id)) => Some(id.as_str()),
                _ => None,
            })
            .collect();
        visited.insert(pending.request().model_id.as_str());

        let compatible = variant.serves(pending.request().kind())
            && variant.provides_all(&pending.request().required_capabilities);
        (compatible && !visited.contains(variant_id)).then_some(variant_id)
    }

    /// Queue depth over observed throughput, never less than one batch window.
    pub fn estimate_wait(&self, descriptor: &ModelDescriptor, depth: usize) -> Duration {
        let window = descriptor.batch_window();
        match self.throughput.items_per_sec(&descriptor.model_id) {
            Some(rate) if rate > 0.0 => {
                Duration::from_secs_f64(depth as f64 / rate).max(window)
            }
            _ => {
                let batches = depth / descriptor.preferred_batch_size.max(1) + 1;
                window * batches as u32
            }
        }
    }
}
