pub mod batching;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod models;
pub mod monitor;
pub mod request;
pub mod routes;
pub mod routing;
pub mod scheduler;
pub mod test_util;

pub use config::Config;
pub use engine::{EngineError, ExecutionEngine, HttpEngine};
pub use error::{Result, SchedulerError};
pub use models::{ModelLifecycleManager, ModelRegistry};
pub use monitor::{FixedProbe, ResourceMonitor, ResourceProbe, SystemProbe};
pub use request::{Completion, InferenceRequest, RequestState};
pub use scheduler::{Scheduler, SubmitHandle};

use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    /// Engine handle for health reporting.
    pub engine: Arc<dyn ExecutionEngine>,
}
