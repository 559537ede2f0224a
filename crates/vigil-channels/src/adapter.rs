use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use vigil_core::types::{ChannelId, InboundMessage};

use crate::error::ChannelError;
use crate::types::ApprovalResult;

/// Callback invoked for every inbound message an adapter receives.
pub type InboundHandler = Arc<dyn Fn(InboundMessage) + Send + Sync>;

/// Contract implemented by every platform adapter (Telegram, WhatsApp).
///
/// Adapters own their transport, classify its errors (recoverable ones are
/// retried internally with backoff; permanent ones surface), and chunk
/// outbound text to the platform's message size limit.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Stable lowercase identifier (`"telegram"`, `"whatsapp"`).
    fn name(&self) -> &str;

    /// Connect and begin delivering inbound messages to the registered
    /// handler. Returns once the adapter is running.
    async fn start(&self) -> Result<(), ChannelError>;

    /// Gracefully disconnect.
    async fn stop(&self) -> Result<(), ChannelError>;

    /// Register the single inbound handler. Must be called before `start`.
    fn on_message(&self, handler: InboundHandler);

    /// Deliver `text`, chunking internally; returns the platform message id
    /// of the last chunk sent.
    async fn send_message(&self, channel_id: &ChannelId, text: &str)
        -> Result<String, ChannelError>;

    /// Best-effort typing indicator; default no-op.
    async fn send_typing(&self, _channel_id: &ChannelId) -> Result<(), ChannelError> {
        Ok(())
    }

    /// Render the trust handshake in a channel-appropriate way and resolve
    /// it. Times out to `Deny`.
    async fn send_approval_request(
        &self,
        channel_id: &ChannelId,
        prompt: &str,
        key: &str,
        timeout: Option<Duration>,
    ) -> Result<ApprovalResult, ChannelError>;
}
