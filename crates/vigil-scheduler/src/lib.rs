//! Time-driven surfacing: the daily review, the fine-grained exact-due
//! check, the periodic reflection tick, and user-configured cron prompts.
//!
//! The scheduler never talks to a channel directly. Every firing becomes a
//! [`SchedulerEvent`] delivered over mpsc; the daemon wraps synthetic
//! prompts into inbound messages on the primary channel so that scheduled
//! activity is serialised with user traffic through the same queue.

pub mod engine;
pub mod error;
pub mod prompts;

pub use engine::{Scheduler, SchedulerEvent};
pub use error::{Result, SchedulerError};
