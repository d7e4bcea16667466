//! Backend selection and degradation policy.

mod fallback;
mod selector;

pub use fallback::{FallbackManager, FallbackReason};
pub use selector::BackendSelector;
