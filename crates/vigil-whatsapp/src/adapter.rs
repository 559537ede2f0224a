use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use dashmap::DashMap;
use tokio::sync::{oneshot, watch};
use tracing::{info, warn};

use vigil_channels::{ApprovalResult, ChannelAdapter, ChannelError, InboundHandler};
use vigil_core::config::WhatsappConfig;
use vigil_core::types::{ChannelId, InboundMessage, Platform};
use vigil_trust::ApprovalReply;

use crate::send::WhatsappSender;
use crate::webhook::{extract_texts, VerifyParams};

const APPROVAL_TIMEOUT: Duration = Duration::from_secs(5 * 60);

struct Shared {
    config: WhatsappConfig,
    handler: RwLock<Option<InboundHandler>>,
    /// Text-handshake waiters keyed by sender phone number. WhatsApp has
    /// no inline buttons; the next message from the channel resolves the
    /// approval instead of reaching the agent.
    approval_waiters: DashMap<String, oneshot::Sender<ApprovalResult>>,
}

pub struct WhatsappAdapter {
    shared: Arc<Shared>,
    sender: WhatsappSender,
    shutdown_tx: RwLock<Option<watch::Sender<bool>>>,
}

impl WhatsappAdapter {
    pub fn new(config: &WhatsappConfig) -> Self {
        Self {
            sender: WhatsappSender::new(config.access_token.clone(), config.phone_number_id.clone()),
            shared: Arc::new(Shared {
                config: config.clone(),
                handler: RwLock::new(None),
                approval_waiters: DashMap::new(),
            }),
            shutdown_tx: RwLock::new(None),
        }
    }
}

#[async_trait]
impl ChannelAdapter for WhatsappAdapter {
    fn name(&self) -> &str {
        "whatsapp"
    }

    async fn start(&self) -> Result<(), ChannelError> {
        let app = Router::new()
            .route("/webhook", get(verify_webhook).post(receive_webhook))
            .with_state(Arc::clone(&self.shared));

        let addr = format!("0.0.0.0:{}", self.shared.config.webhook_port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| ChannelError::ConnectionFailed(format!("bind {addr}: {e}")))?;

        let (tx, mut rx) = watch::channel(false);
        *self.shutdown_tx.write().unwrap() = Some(tx);

        info!(addr = %addr, "WhatsApp: webhook listener started");
        tokio::spawn(async move {
            let shutdown = async move {
                while rx.changed().await.is_ok() {
                    if *rx.borrow() {
                        break;
                    }
                }
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                warn!(error = %e, "WhatsApp webhook server exited with error");
            }
        });
        Ok(())
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        if let Some(tx) = self.shutdown_tx.write().unwrap().take() {
            let _ = tx.send(true);
        }
        Ok(())
    }

    fn on_message(&self, handler: InboundHandler) {
        *self.shared.handler.write().unwrap() = Some(handler);
    }

    async fn send_message(
        &self,
        channel_id: &ChannelId,
        text: &str,
    ) -> Result<String, ChannelError> {
        self.sender.send_text(channel_id.as_str(), text).await
    }

    /// Text rendering of the trust handshake: the prompt goes out as a
    /// normal message; the next inbound text from this channel resolves
    /// it (yes/always/no), or the request times out to deny.
    async fn send_approval_request(
        &self,
        channel_id: &ChannelId,
        prompt: &str,
        _key: &str,
        timeout: Option<Duration>,
    ) -> Result<ApprovalResult, ChannelError> {
        let (tx, rx) = oneshot::channel();
        self.shared
            .approval_waiters
            .insert(channel_id.as_str().to_string(), tx);
        self.sender.send_text(channel_id.as_str(), prompt).await?;

        let timeout = timeout.unwrap_or(APPROVAL_TIMEOUT);
        let result = tokio::time::timeout(timeout, rx).await;
        self.shared.approval_waiters.remove(channel_id.as_str());
        match result {
            Ok(Ok(decision)) => Ok(decision),
            _ => Ok(ApprovalResult::Deny),
        }
    }
}

async fn verify_webhook(
    State(shared): State<Arc<Shared>>,
    Query(params): Query<VerifyParams>,
) -> (StatusCode, String) {
    let token_ok = params.verify_token.as_deref() == Some(shared.config.verify_token.as_str());
    let mode_ok = params.mode.as_deref() == Some("subscribe");
    if token_ok && mode_ok {
        (StatusCode::OK, params.challenge.unwrap_or_default())
    } else {
        warn!("WhatsApp: webhook verification failed");
        (StatusCode::FORBIDDEN, String::new())
    }
}

async fn receive_webhook(
    State(shared): State<Arc<Shared>>,
    axum::Json(payload): axum::Json<serde_json::Value>,
) -> StatusCode {
    for text in extract_texts(&payload) {
        if !shared.config.allowed_users.is_empty()
            && !shared.config.allowed_users.iter().any(|u| u == &text.from)
        {
            warn!(from = %text.from, "whatsapp: message from unlisted number ignored");
            continue;
        }

        // An open approval waiter intercepts an unambiguous reply.
        if let Some(entry) = shared.approval_waiters.remove(&text.from) {
            let (_, tx) = entry;
            match ApprovalReply::parse(&text.body) {
                Some(ApprovalReply::Approve) => {
                    let _ = tx.send(ApprovalResult::Allow);
                    continue;
                }
                Some(ApprovalReply::ApproveAlways) => {
                    let _ = tx.send(ApprovalResult::AllowAlways);
                    continue;
                }
                Some(ApprovalReply::Deny) => {
                    let _ = tx.send(ApprovalResult::Deny);
                    continue;
                }
                // Not a handshake reply: dropping the waiter denies the
                // request and the message flows to the agent normally.
                None => {}
            }
        }

        let inbound = InboundMessage::new(
            ChannelId(text.from.clone()),
            text.from.clone().into(),
            text.body,
            Platform::Whatsapp,
        );
        let handler = shared.handler.read().unwrap().clone();
        match handler {
            Some(handler) => handler(inbound),
            None => warn!("whatsapp: inbound message dropped, no handler registered"),
        }
    }
    StatusCode::OK
}
