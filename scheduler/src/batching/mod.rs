//! Batch assembly and dispatch.

mod assembler;
mod dispatcher;

pub use assembler::BatchAssembler;
pub use dispatcher::{BatchDispatcher, DispatchFailure, DispatchOutcome};

use infergate_common::Backend;
use tokio::time::Instant;
use uuid::Uuid;

use crate::request::{PendingRequest, RequestState};

/// Identifies an open batch slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchHandle {
    pub batch_id: Uuid,
    pub model_id: String,
}

/// Why a batch stopped admitting requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealReason {
    /// Reached the model's preferred batch size.
    Size,
    /// The batch window elapsed.
    Deadline,
    /// A critical-priority request joined.
    Critical,
    /// The request must run alone.
    Singleton,
}

impl std::fmt::Display for SealReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SealReason::Size => "size",
            SealReason::Deadline => "deadline",
            SealReason::Critical => "critical",
            SealReason::Singleton => "singleton",
        };
        write!(f, "{}", s)
    }
}

/// Result of admitting a request.
#[derive(Debug)]
pub struct Admission {
    pub handle: BatchHandle,
    /// Position of the request at admission time.
    pub position: usize,
    /// Set when this admission sealed the batch.
    pub sealed: Option<SealedBatch>,
    /// Set when this admission opened a new batch; its window closes then.
    pub window_deadline: Option<Instant>,
}

/// A batch that no longer admits requests and awaits a backend.
#[derive(Debug)]
pub struct SealedBatch {
    pub id: Uuid,
    pub model_id: String,
    pub requests: Vec<PendingRequest>,
    pub created_at: Instant,
    pub sealed_at: Instant,
    pub reason: SealReason,
    /// Set when every member was pinned to a backend by a fallback decision.
    pub forced_backend: Option<Backend>,
}

impl SealedBatch {
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Tag the batch with the backend that will execute it.
    pub fn assign(self, backend: Backend) -> Batch {
        Batch {
            id: self.id,
            model_id: self.model_id,
            backend,
            requests: self.requests,
            created_at: self.created_at,
            sealed_at: self.sealed_at,
        }
    }
}

/// A sealed batch bound to one backend. Requests keep admission order.
#[derive(Debug)]
pub struct Batch {
    pub id: Uuid,
    pub model_id: String,
    pub backend: Backend,
    pub requests: Vec<PendingRequest>,
    pub created_at: Instant,
    pub sealed_at: Instant,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    fn mark_dispatched(&mut self) {
        for pending in &mut self.requests {
            pending.last_backend = Some(self.backend);
            pending.transition(RequestState::Dispatched {
                backend: self.backend,
            });
        }
    }
}
