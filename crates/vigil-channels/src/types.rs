use serde::{Deserialize, Serialize};

use vigil_core::types::ChannelId;

/// A message to be delivered to an external channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel_id: ChannelId,
    pub text: String,
}

/// Resolution of a channel-rendered approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalResult {
    Allow,
    AllowAlways,
    Deny,
}
