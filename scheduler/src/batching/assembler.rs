//! Per-model batch windows.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use infergate_common::Payload;

use super::{Admission, BatchHandle, SealReason, SealedBatch};
use crate::error::{Result, SchedulerError};
use crate::models::ModelRegistry;
use crate::request::{PendingRequest, RequestState};

/// The one open batch of a model.
struct OpenBatch {
    id: Uuid,
    created_at: Instant,
    deadline: Instant,
    requests: Vec<PendingRequest>,
}

impl OpenBatch {
    fn seal(self, model_id: &str, reason: SealReason) -> SealedBatch {
        let sealed = SealedBatch {
            id: self.id,
            model_id: model_id.to_string(),
            requests: self.requests,
            created_at: self.created_at,
            sealed_at: Instant::now(),
            reason,
            forced_backend: None,
        };
        tracing::info!(
            batch = %sealed.id,
            model = %model_id,
            size = sealed.len(),
            %reason,
            waited_ms = sealed.sealed_at.duration_since(sealed.created_at).as_millis() as u64,
            "Batch sealed"
        );
        sealed
    }
}

/// Collects requests per model until a size or time bound seals the batch.
///
/// Holds at most one open batch per model. All mutation happens under one
/// lock that is never held across an await.
pub struct BatchAssembler {
    registry: Arc<ModelRegistry>,
    max_batchable_payload_bytes: usize,
    open: Mutex<HashMap<String, OpenBatch>>,
}

impl BatchAssembler {
    pub fn new(registry: Arc<ModelRegistry>, max_batchable_payload_bytes: usize) -> Self {
        Self {
            registry,
            max_batchable_payload_bytes,
            open: Mutex::new(HashMap::new()),
        }
    }

    /// Admit a request into its model's open batch.
    ///
    /// A request already past its deadline is failed with a timeout and never
    /// admitted.
    pub fn admit(&self, mut pending: PendingRequest) -> Result<Admission> {
        let now = Instant::now();
        if pending.is_expired(now) {
            let err = SchedulerError::timeout(format!(
                "Request {} exceeded max_wait before admission",
                pending.id()
            ))
            .with_degradation(pending.last_strategy());
            pending.fail(err.clone());
            return Err(err);
        }

        let descriptor = match self.registry.require(pending.model_id()) {
            Ok(descriptor) => descriptor,
            Err(err) => {
                pending.fail(err.clone());
                return Err(err);
            }
        };
        let model_id = descriptor.model_id.clone();

        if self.must_run_alone(&pending) {
            let id = Uuid::new_v4();
            pending.transition(RequestState::Batched {
                batch_id: id,
                position: 0,
            });
            let forced_backend = pending.forced_backend;
            let mut sealed = OpenBatch {
                id,
                created_at: now,
                deadline: now,
                requests: vec![pending],
            }
            .seal(&model_id, SealReason::Singleton);
            sealed.forced_backend = forced_backend;

            return Ok(Admission {
                handle: BatchHandle {
                    batch_id: id,
                    model_id,
                },
                position: 0,
                sealed: Some(sealed),
                window_deadline: None,
            });
        }

        let critical = pending.request().priority.is_critical();
        let mut open = self.open.lock();

        let mut window_deadline = None;
        let batch = open.entry(model_id.clone()).or_insert_with(|| {
            let deadline = now + descriptor.batch_window();
            window_deadline = Some(deadline);
            OpenBatch {
                id: Uuid::new_v4(),
                created_at: now,
                deadline,
                requests: Vec::with_capacity(descriptor.preferred_batch_size),
            }
        });

        let position = batch.requests.len();
        pending.transition(RequestState::Batched {
            batch_id: batch.id,
            position,
        });
        batch.requests.push(pending);

        let handle = BatchHandle {
            batch_id: batch.id,
            model_id: model_id.clone(),
        };

        let reason = if critical {
            Some(SealReason::Critical)
        } else if batch.requests.len() >= descriptor.preferred_batch_size {
            Some(SealReason::Size)
        } else {
            None
        };

        let sealed = match reason {
            Some(reason) => open
                .remove(&model_id)
                .map(|batch| batch.seal(&model_id, reason)),
            None => None,
        };

        Ok(Admission {
            handle,
            position,
            // A batch sealed on its first request needs no window timer.
            window_deadline: window_deadline.filter(|_| sealed.is_none()),
            sealed,
        })
    }

    fn must_run_alone(&self, pending: &PendingRequest) -> bool {
        let request = pending.request();
        if !request.batchable || pending.forced_backend.is_some() {
            return true;
        }
        let size = match &request.payload {
            Payload::Embedding { input } => input.len(),
            Payload::Generation { prompt, .. } => prompt.len(),
        };
        size > self.max_batchable_payload_bytes
    }

    /// Seal the batch behind `handle` if it is still open. Called when its
    /// window timer fires.
    pub fn seal_expired(&self, handle: &BatchHandle) -> Option<SealedBatch> {
        let mut open = self.open.lock();
        let matches = open
            .get(&handle.model_id)
            .is_some_and(|batch| batch.id == handle.batch_id);
        if !matches {
            return None;
        }
        open.remove(&handle.model_id)
            .map(|batch| batch.seal(&handle.model_id, SealReason::Deadline))
    }

    /// Sweep: drop cancelled members and seal every batch whose window has
    /// elapsed at `now`.
    pub fn tick(&self, now: Instant) -> Vec<SealedBatch> {
        let mut cancelled = Vec::new();
        let mut sealed = Vec::new();
        {
            let mut open = self.open.lock();
            open.retain(|_, batch| {
                let (live, gone): (Vec<_>, Vec<_>) =
                    batch.requests.drain(..).partition(|p| !p.is_cancelled());
                batch.requests = live;
                cancelled.extend(gone);
                !batch.requests.is_empty()
            });

            let expired: Vec<String> = open
                .iter()
                .filter(|(_, batch)| now >= batch.deadline)
                .map(|(model_id, _)| model_id.clone())
                .collect();
            for model_id in expired {
                if let Some(batch) = open.remove(&model_id) {
                    sealed.push(batch.seal(&model_id, SealReason::Deadline));
                }
            }
        }

        if !cancelled.is_empty() {
            tracing::debug!(count = cancelled.len(), "Pruned cancelled requests from open batches");
        }
        sealed
    }

    /// Remove an unsealed request. Returns false if it was already sealed.
    pub fn cancel(&self, request_id: Uuid) -> bool {
        let removed = {
            let mut open = self.open.lock();
            let mut removed = None;
            let mut emptied = None;
            for (model_id, batch) in open.iter_mut() {
                if let Some(pos) = batch.requests.iter().position(|p| p.id() == request_id) {
                    removed = Some(batch.requests.remove(pos));
                    if batch.requests.is_empty() {
                        emptied = Some(model_id.clone());
                    }
                    break;
                }
            }
            if let Some(model_id) = emptied {
                open.remove(&model_id);
            }
            removed
        };

        match removed {
            Some(pending) => {
                tracing::debug!(request_id = %request_id, model = %pending.model_id(), "Request cancelled before dispatch");
                true
            }
            None => false,
        }
    }

    /// Requests waiting in open batches.
    pub fn pending_count(&self) -> usize {
        self.open.lock().values().map(|b| b.requests.len()).sum()
    }

    pub fn open_batches(&self) -> usize {
        self.open.lock().len()
    }
}
