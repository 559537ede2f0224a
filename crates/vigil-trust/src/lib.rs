//! Capability-level trust gate: every tool invocation passes through here.
//! Safe and guarded tools run freely; elevated tools need an approval —
//! pre-configured, persisted (`always`), or granted for this process
//! (`once`) — obtained through a yes/no/always handshake with the user.

pub mod error;
pub mod gate;
pub mod store;
pub mod types;

pub use error::{Result, TrustError};
pub use gate::{GateDecision, HandshakeOutcome, TrustGate};
pub use store::TrustStore;
pub use types::{ApprovalDuration, ApprovalReply, Capability, ToolLevel, TrustApproval};
