//! Requests, their lifecycle state, and completion values.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use uuid::Uuid;

use infergate_common::{
    Backend, Capability, FallbackDecision, FallbackStrategy, Output, Payload, Priority, RequestKind,
};

use crate::error::{Result, SchedulerError};
use crate::models::ModelLease;
use crate::monitor::{DepthGuard, QueueDepths};

/// Default max wait when the ingress layer does not set one.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(30);

/// An inference request as handed over by the ingress layer.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub id: Uuid,
    pub model_id: String,
    pub payload: Payload,
    pub priority: Priority,
    pub submitted_at: Instant,
    pub max_wait: Duration,
    /// `false` forces a singleton batch (e.g. oversized payloads).
    pub batchable: bool,
    /// Capabilities any substitute model must also provide.
    pub required_capabilities: Vec<Capability>,
}

impl InferenceRequest {
    pub fn new(model_id: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: Uuid::new_v4(),
            model_id: model_id.into(),
            payload,
            priority: Priority::Normal,
            submitted_at: Instant::now(),
            max_wait: DEFAULT_MAX_WAIT,
            batchable: true,
            required_capabilities: vec![],
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn with_batchable(mut self, batchable: bool) -> Self {
        self.batchable = batchable;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Vec<Capability>) -> Self {
        self.required_capabilities = capabilities;
        self
    }

    pub fn submitted_at(mut self, at: Instant) -> Self {
        self.submitted_at = at;
        self
    }

    pub fn kind(&self) -> RequestKind {
        self.payload.kind()
    }

    pub fn deadline(&self) -> Instant {
        self.submitted_at + self.max_wait
    }
}

/// Where a request is in the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestState {
    Pending,
    Batched { batch_id: Uuid, position: usize },
    Dispatched { backend: Backend },
    /// Waiting for capacity after a `queue_with_eta` decision.
    Queued { eta: Duration },
    Completed,
    Failed,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Completed | RequestState::Failed)
    }
}

/// Successful result handed back to the caller.
#[derive(Debug, Clone)]
pub struct Completion {
    pub request_id: Uuid,
    /// Model that produced the output (a smaller variant after degradation).
    pub model_id: String,
    pub backend: Backend,
    pub output: Output,
    /// Degradations applied on the way, oldest first.
    pub degradations: Vec<FallbackDecision>,
}

/// Degradations a request went through, readable by its caller while the
/// request is still in flight.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub(crate) struct DegradationTrail {
    /// Most recent non-terminal strategy.
    pub strategy: Option<FallbackStrategy>,
    /// Most recent wait estimate.
    pub eta: Option<Duration>,
}

pub(crate) type ResultSender = oneshot::Sender<Result<Completion>>;
pub(crate) type ResultReceiver = oneshot::Receiver<Result<Completion>>;

/// A request owned by the scheduler until it resolves.
///
/// Exactly one of [`PendingRequest::complete`] or [`PendingRequest::fail`] is
/// called per request; both consume it.
#[derive(Debug)]
pub struct PendingRequest {
    pub(crate) request: InferenceRequest,
    /// Model currently targeted; differs from `request.model_id` after degradation.
    pub(crate) model_id: String,
    /// Set by an `alternate_backend` decision.
    pub(crate) forced_backend: Option<Backend>,
    pub(crate) last_backend: Option<Backend>,
    pub(crate) history: Vec<FallbackDecision>,
    pub(crate) execution_retried: bool,
    pub(crate) lease: Option<ModelLease>,
    trail: Arc<Mutex<DegradationTrail>>,
    tx: Option<ResultSender>,
    status: watch::Sender<RequestState>,
    depth: Option<DepthGuard>,
}

impl PendingRequest {
    pub(crate) fn new(
        request: InferenceRequest,
    ) -> (Self, ResultReceiver, watch::Receiver<RequestState>) {
        let (tx, rx) = oneshot::channel();
        let (status, status_rx) = watch::channel(RequestState::Pending);
        let pending = Self {
            model_id: request.model_id.clone(),
            request,
            forced_backend: None,
            last_backend: None,
            history: vec![],
            execution_retried: false,
            lease: None,
            trail: Arc::default(),
            tx: Some(tx),
            status,
            depth: None,
        };
        (pending, rx, status_rx)
    }

    pub fn id(&self) -> Uuid {
        self.request.id
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn request(&self) -> &InferenceRequest {
        &self.request
    }

    pub fn payload(&self) -> &Payload {
        &self.request.payload
    }

    pub fn deadline(&self) -> Instant {
        self.request.deadline()
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline()
    }

    /// The caller dropped its handle; nobody is waiting for this result.
    pub fn is_cancelled(&self) -> bool {
        self.tx.as_ref().map_or(true, |tx| tx.is_closed())
    }

    pub(crate) fn transition(&mut self, state: RequestState) {
        tracing::debug!(request_id = %self.id(), model = %self.model_id, state = ?state, "Request state");
        self.status.send_replace(state);
    }

    /// Count this request against the queue depth of its current model.
    pub(crate) fn track_depth(&mut self, depths: &Arc<QueueDepths>) {
        let needs_new = self
            .depth
            .as_ref()
            .map_or(true, |guard| guard.model_id() != self.model_id);
        if needs_new {
            self.depth = Some(depths.enter(&self.model_id));
        }
    }

    /// Move to a different model after a `smaller_model` decision.
    pub(crate) fn reroute(&mut self, model_id: &str, depths: &Arc<QueueDepths>) {
        self.model_id = model_id.to_string();
        self.forced_backend = None;
        self.lease = None;
        self.track_depth(depths);
    }

    /// Shared view of the degradations applied so far.
    pub(crate) fn trail(&self) -> Arc<Mutex<DegradationTrail>> {
        self.trail.clone()
    }

    /// Remember a fallback decision taken for this request.
    pub(crate) fn record(&mut self, decision: FallbackDecision) {
        {
            let mut trail = self.trail.lock();
            if !decision.is_terminal() {
                trail.strategy = Some(decision.strategy);
            }
            if let Some(eta) = decision.eta() {
                trail.eta = Some(eta);
            }
        }
        self.history.push(decision);
    }

    /// Most recent degradation strategy applied, for error reporting.
    pub(crate) fn last_strategy(&self) -> Option<FallbackStrategy> {
        self.history
            .iter()
            .rev()
            .map(|d| d.strategy)
            .find(|s| *s != FallbackStrategy::TerminalError)
    }

    pub(crate) fn complete(mut self, output: Output, backend: Backend) {
        self.transition(RequestState::Completed);
        let completion = Completion {
            request_id: self.id(),
            model_id: self.model_id.clone(),
            backend,
            output,
            degradations: std::mem::take(&mut self.history),
        };
        self.send(Ok(completion));
    }

    pub(crate) fn fail(mut self, err: SchedulerError) {
        tracing::debug!(request_id = %self.id(), model = %self.model_id, "Request failed: {}", err);
        self.transition(RequestState::Failed);
        self.send(Err(err));
    }

    fn send(&mut self, result: Result<Completion>) {
        if let Some(tx) = self.tx.take() {
            if tx.send(result).is_err() {
                tracing::debug!(request_id = %self.id(), "Caller gone, result discarded");
            }
        }
    }
}

/// A request dropped without resolving still answers its caller.
impl Drop for PendingRequest {
    fn drop(&mut self) {
        if self.tx.as_ref().is_some_and(|tx| !tx.is_closed()) {
            tracing::warn!(request_id = %self.id(), model = %self.model_id, "Request abandoned without a result");
            self.status.send_replace(RequestState::Failed);
            self.send(Err(SchedulerError::execution("Request abandoned by the scheduler")));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> InferenceRequest {
        InferenceRequest::new("minilm", Payload::embedding("hello"))
    }

    #[tokio::test]
    async fn test_deadline_from_submission() {
        let now = Instant::now();
        let req = request()
            .submitted_at(now)
            .with_max_wait(Duration::from_millis(100));
        assert_eq!(req.deadline(), now + Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_complete_sends_result_and_status() {
        let (pending, rx, status) = PendingRequest::new(request());
        let id = pending.id();
        pending.complete(Output::Embedding { vector: vec![1.0] }, Backend::General);

        let completion = rx.await.unwrap().unwrap();
        assert_eq!(completion.request_id, id);
        assert_eq!(completion.backend, Backend::General);
        assert_eq!(*status.borrow(), RequestState::Completed);
    }

    #[tokio::test]
    async fn test_cancelled_when_receiver_dropped() {
        let (pending, rx, _status) = PendingRequest::new(request());
        assert!(!pending.is_cancelled());
        drop(rx);
        assert!(pending.is_cancelled());
        // Resolving a cancelled request must not panic.
        pending.fail(SchedulerError::timeout("late"));
    }

    #[tokio::test]
    async fn test_reroute_moves_queue_depth() {
        let depths = Arc::new(QueueDepths::new());
        let (mut pending, _rx, _status) = PendingRequest::new(request());
        pending.track_depth(&depths);
        assert_eq!(depths.get("minilm"), 1);

        pending.forced_backend = Some(Backend::General);
        pending.reroute("minilm-small", &depths);
        assert_eq!(depths.get("minilm"), 0);
        assert_eq!(depths.get("minilm-small"), 1);
        assert_eq!(pending.model_id(), "minilm-small");
        assert!(pending.forced_backend.is_none());

        drop(pending);
        assert_eq!(depths.get("minilm-small"), 0);
    }

    #[tokio::test]
    async fn test_last_strategy_skips_terminal() {
        let (mut pending, _rx, _status) = PendingRequest::new(request());
        assert_eq!(pending.last_strategy(), None);
        pending.record(FallbackDecision::smaller_model("minilm-small", 0.85));
        pending.record(FallbackDecision::terminal());
        assert_eq!(pending.last_strategy(), Some(FallbackStrategy::SmallerModel));
    }

    #[tokio::test]
    async fn test_trail_keeps_last_strategy_and_eta() {
        let (mut pending, _rx, _status) = PendingRequest::new(request());
        let trail = pending.trail();
        assert_eq!(*trail.lock(), DegradationTrail::default());

        pending.record(FallbackDecision::queue_with_eta(Duration::from_millis(40)));
        pending.record(FallbackDecision::smaller_model("minilm-small", 0.85));
        pending.record(FallbackDecision::terminal());

        let seen = *trail.lock();
        assert_eq!(seen.strategy, Some(FallbackStrategy::SmallerModel));
        assert_eq!(seen.eta, Some(Duration::from_millis(40)));
        assert_eq!(pending.history.len(), 3);
    }

    #[tokio::test]
    async fn test_dropped_request_still_resolves() {
        let (pending, rx, status) = PendingRequest::new(request());
        drop(pending);

        let err = rx.await.unwrap().unwrap_err();
        assert_eq!(err.kind, infergate_common::ErrorKind::Execution);
        assert_eq!(*status.borrow(), RequestState::Failed);
    }
}
