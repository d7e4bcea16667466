//! Executes sealed batches and isolates failures.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::time::Instant;
use uuid::Uuid;

use infergate_common::{Backend, Output, Payload};

use super::Batch;
use crate::engine::{EngineError, ExecutionEngine};
use crate::models::ModelLifecycleManager;
use crate::monitor::ThroughputTracker;
use crate::request::PendingRequest;

/// Why a request could not be served by its batch.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchFailure {
    /// The engine failed this request, including its one retry.
    Execution(String),
    /// The engine had no capacity for the batch.
    ResourceExhausted(String),
}

/// Per-request result of a dispatch, in batch order.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub pending: PendingRequest,
    pub backend: Backend,
    pub result: Result<Output, DispatchFailure>,
}

/// What the engine did for one item of a call.
enum ItemResult {
    Done(Output),
    /// The item itself failed.
    Failed(String),
    /// The item was not processed because another item failed.
    Collateral(String),
    Exhausted(String),
}

/// Runs one engine call per sealed batch and maps results back by position.
pub struct BatchDispatcher {
    engine: Arc<dyn ExecutionEngine>,
    lifecycle: Arc<ModelLifecycleManager>,
    throughput: Arc<ThroughputTracker>,
}

impl BatchDispatcher {
    pub fn new(
        engine: Arc<dyn ExecutionEngine>,
        lifecycle: Arc<ModelLifecycleManager>,
        throughput: Arc<ThroughputTracker>,
    ) -> Self {
        Self {
            engine,
            lifecycle,
            throughput,
        }
    }

    /// Execute `batch` and return one outcome per live member, in batch order.
    ///
    /// A failed request is retried once: members that were only collateral
    /// damage of a partial failure are retried together as a reduced batch,
    /// and each failing member is retried alone. Engine exhaustion is never
    /// retried here.
    pub async fn dispatch(&self, mut batch: Batch) -> Vec<DispatchOutcome> {
        let before = batch.len();
        batch.requests.retain(|p| !p.is_cancelled());
        if batch.requests.len() < before {
            tracing::debug!(
                batch = %batch.id,
                dropped = before - batch.requests.len(),
                "Skipping cancelled requests"
            );
        }
        if batch.is_empty() {
            return vec![];
        }

        batch.mark_dispatched();
        let Batch {
            id,
            model_id,
            backend,
            requests,
            created_at,
            sealed_at,
        } = batch;

        tracing::info!(
            batch = %id,
            model = %model_id,
            %backend,
            size = requests.len(),
            queued_ms = sealed_at.duration_since(created_at).as_millis() as u64,
            "Dispatching batch"
        );

        let items: Vec<(usize, PendingRequest)> = requests.into_iter().enumerate().collect();
        let first = self.execute(id, &model_id, backend, items).await;

        let mut outcomes = Vec::with_capacity(first.len());
        let mut reduced = Vec::new();
        let mut singles = Vec::new();

        for (index, mut pending, item) in first {
            let retryable = !pending.execution_retried;
            match item {
                ItemResult::Done(output) => outcomes.push((index, pending, Ok(output))),
                ItemResult::Exhausted(msg) => {
                    outcomes.push((index, pending, Err(DispatchFailure::ResourceExhausted(msg))))
                }
                ItemResult::Collateral(_) if retryable => {
                    pending.execution_retried = true;
                    reduced.push((index, pending));
                }
                ItemResult::Failed(_) if retryable => {
                    pending.execution_retried = true;
                    singles.push((index, pending));
                }
                ItemResult::Failed(msg) | ItemResult::Collateral(msg) => {
                    outcomes.push((index, pending, Err(DispatchFailure::Execution(msg))))
                }
            }
        }

        if !reduced.is_empty() || !singles.is_empty() {
            tracing::warn!(
                batch = %id,
                model = %model_id,
                reduced = reduced.len(),
                singletons = singles.len(),
                "Retrying failed batch members"
            );

            let mut retries = Vec::new();
            if !reduced.is_empty() {
                retries.push(self.execute(id, &model_id, backend, reduced));
            }
            for single in singles {
                retries.push(self.execute(id, &model_id, backend, vec![single]));
            }

            for (index, pending, item) in join_all(retries).await.into_iter().flatten() {
                let result = match item {
                    ItemResult::Done(output) => Ok(output),
                    ItemResult::Exhausted(msg) => Err(DispatchFailure::ResourceExhausted(msg)),
                    ItemResult::Failed(msg) | ItemResult::Collateral(msg) => {
                        Err(DispatchFailure::Execution(msg))
                    }
                };
                outcomes.push((index, pending, result));
            }
        }

        outcomes.sort_by_key(|(index, _, _)| *index);
        outcomes
            .into_iter()
            .map(|(_, pending, result)| DispatchOutcome {
                pending,
                backend,
                result,
            })
            .collect()
    }

    /// One engine call. Results keep the order of `items`.
    async fn execute(
        &self,
        batch_id: Uuid,
        model_id: &str,
        backend: Backend,
        items: Vec<(usize, PendingRequest)>,
    ) -> Vec<(usize, PendingRequest, ItemResult)> {
        let payloads: Vec<Payload> = items.iter().map(|(_, p)| p.payload().clone()).collect();
        let started = Instant::now();
        let result = self.engine.execute(model_id, backend, &payloads).await;
        let elapsed = started.elapsed();
        self.lifecycle.touch(model_id);

        let count = items.len();
        let results: Vec<ItemResult> = match result {
            Ok(outputs) if outputs.len() == count => {
                self.throughput.record(model_id, count, elapsed);
                tracing::debug!(
                    batch = %batch_id,
                    model = %model_id,
                    %backend,
                    size = count,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Batch executed"
                );
                outputs.into_iter().map(ItemResult::Done).collect()
            }
            Ok(outputs) => {
                let msg = format!(
                    "Engine returned {} results for {} payloads",
                    outputs.len(),
                    count
                );
                tracing::warn!(batch = %batch_id, model = %model_id, "{}", msg);
                (0..count).map(|_| ItemResult::Failed(msg.clone())).collect()
            }
            Err(EngineError::Partial { failed, message }) => {
                tracing::warn!(
                    batch = %batch_id,
                    model = %model_id,
                    failed = ?failed,
                    "Partial batch failure: {}",
                    message
                );
                let failed: HashSet<usize> = failed.into_iter().collect();
                (0..count)
                    .map(|i| {
                        if failed.contains(&i) {
                            ItemResult::Failed(message.clone())
                        } else {
                            ItemResult::Collateral(format!("Batch partially failed: {}", message))
                        }
                    })
                    .collect()
            }
            Err(e @ (EngineError::ResourceExhausted(_) | EngineError::LoadFailed(_))) => {
                tracing::warn!(batch = %batch_id, model = %model_id, %backend, "Engine exhausted: {}", e);
                (0..count).map(|_| ItemResult::Exhausted(e.to_string())).collect()
            }
            Err(e) => {
                tracing::warn!(batch = %batch_id, model = %model_id, %backend, "Batch failed: {}", e);
                (0..count).map(|_| ItemResult::Failed(e.to_string())).collect()
            }
        };

        items
            .into_iter()
            .zip(results)
            .map(|((index, pending), result)| (index, pending, result))
            .collect()
    }
}
