//! infergate common types
//!
//! Shared types used by the scheduler and by execution engine runners.

pub mod capability;
pub mod error;
pub mod fallback;
pub mod model;
pub mod payload;
pub mod protocol;
pub mod snapshot;

pub use capability::Capability;
pub use error::ErrorKind;
pub use fallback::{FallbackDecision, FallbackStrategy, FallbackTarget};
pub use model::{Backend, ModelDescriptor};
pub use payload::{Output, Payload, Priority, RequestKind};
pub use protocol::{
    BackendLoadReport, EngineErrorBody, EngineErrorDetail, EngineErrorKind, ExecuteBatchRequest,
    ExecuteBatchResponse, LoadModelRequest, UnloadModelRequest,
};
pub use snapshot::{BackendLoad, ResourceSnapshot};
