//! Isolated background workers: registry, status files, steering,
//! timeouts, and the completion bridge into archival memory.
//!
//! A worker is a background session with a scoped tool set and its own
//! transcript. It cannot touch memory, projections, or messaging; its only
//! output channel is `result.md` plus the completion fact the registry
//! writes when it terminates.

pub mod error;
pub mod registry;
pub mod status;
pub mod types;

pub use error::{Result, WorkerError};
pub use registry::{WorkerRegistry, WorkerRunner};
pub use types::{WorkerCompletion, WorkerContext, WorkerInfo, WorkerStatus};
