//! Small helpers shared by the listeners
pub mod backoff;

pub use backoff::{BackoffCounter, exponential_backoff};
