//! Model metadata and residency.
//!
//! - `ModelRegistry`: read-only descriptors, validated at startup
//! - `ModelLifecycleManager`: loads and evicts models under a memory budget

mod lifecycle;
mod registry;

pub use lifecycle::{ModelLease, ModelLifecycleManager, ResidentModelInfo};
pub use registry::ModelRegistry;
