//! Channel plumbing shared by every adapter: the adapter contract, the
//! transport error taxonomy, outbound chunking, and the per-channel
//! message queue that serialises all agent activity.

pub mod adapter;
pub mod chunk;
pub mod error;
pub mod queue;
pub mod types;

pub use adapter::{ChannelAdapter, InboundHandler};
pub use error::{classify_transport_error, with_backoff, ChannelError, TransportErrorKind};
pub use queue::{MessageQueue, QueueConfig};
pub use types::{ApprovalResult, OutboundMessage};
