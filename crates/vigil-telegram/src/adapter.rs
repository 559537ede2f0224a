use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use teloxide::dispatching::ShutdownToken;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, InlineKeyboardButton, InlineKeyboardMarkup};
use tokio::sync::oneshot;
use tracing::{info, warn};

use vigil_channels::{ApprovalResult, ChannelAdapter, ChannelError, InboundHandler};
use vigil_core::config::TelegramConfig;
use vigil_core::types::{ChannelId, InboundMessage, Platform};

use crate::allow;
use crate::attach;
use crate::send;

/// Default approval handshake timeout.
const APPROVAL_TIMEOUT: Duration = Duration::from_secs(5 * 60);

struct Shared {
    config: TelegramConfig,
    handler: RwLock<Option<InboundHandler>>,
    /// Open inline approval requests keyed by the caller-supplied key.
    approvals: DashMap<String, oneshot::Sender<ApprovalResult>>,
}

pub struct TelegramAdapter {
    bot: Bot,
    shared: Arc<Shared>,
    shutdown: RwLock<Option<ShutdownToken>>,
}

impl TelegramAdapter {
    pub fn new(config: &TelegramConfig) -> Self {
        Self {
            bot: Bot::new(&config.token),
            shared: Arc::new(Shared {
                config: config.clone(),
                handler: RwLock::new(None),
                approvals: DashMap::new(),
            }),
            shutdown: RwLock::new(None),
        }
    }
}

#[async_trait]
impl ChannelAdapter for TelegramAdapter {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> Result<(), ChannelError> {
        let bot = self.bot.clone();
        let shared = Arc::clone(&self.shared);

        let handler = dptree::entry()
            .branch(Update::filter_message().endpoint(handle_update))
            .branch(Update::filter_callback_query().endpoint(handle_callback));

        let mut dispatcher = Dispatcher::builder(bot, handler)
            .dependencies(dptree::deps![shared])
            .default_handler(|_upd| async {})
            .build();

        *self.shutdown.write().unwrap() = Some(dispatcher.shutdown_token());
        info!("Telegram: starting long-polling dispatcher");
        tokio::spawn(async move {
            dispatcher.dispatch().await;
            warn!("Telegram dispatcher exited");
        });
        Ok(())
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        let token = self.shutdown.write().unwrap().take();
        if let Some(token) = token {
            if let Ok(fut) = token.shutdown() {
                fut.await;
            }
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
        let chat_id = parse_chat_id(channel_id)?;
        send::send_chunked(&self.bot, chat_id, text).await
    }

    /// One-shot chat action; Telegram shows "typing…" for ~5 seconds.
    /// The queue fires this once per dispatched turn.
    async fn send_typing(&self, channel_id: &ChannelId) -> Result<(), ChannelError> {
        let chat_id = parse_chat_id(channel_id)?;
        self.bot
            .send_chat_action(chat_id, ChatAction::Typing)
            .await
            .map(|_| ())
            .map_err(|e| ChannelError::SendFailed(e.to_string()))
    }

    /// Inline-button rendering of the trust handshake.
    async fn send_approval_request(
        &self,
        channel_id: &ChannelId,
        prompt: &str,
        key: &str,
        timeout: Option<Duration>,
    ) -> Result<ApprovalResult, ChannelError> {
        let chat_id = parse_chat_id(channel_id)?;
        let keyboard = InlineKeyboardMarkup::new([[
            InlineKeyboardButton::callback("Allow once", format!("appr:{key}:allow")),
            InlineKeyboardButton::callback("Always", format!("appr:{key}:always")),
            InlineKeyboardButton::callback("Deny", format!("appr:{key}:deny")),
        ]]);

        let (tx, rx) = oneshot::channel();
        self.shared.approvals.insert(key.to_string(), tx);

        self.bot
            .send_message(chat_id, prompt)
            .reply_markup(keyboard)
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;

        let timeout = timeout.unwrap_or(APPROVAL_TIMEOUT);
        let result = tokio::time::timeout(timeout, rx).await;
        self.shared.approvals.remove(key);
        match result {
            Ok(Ok(decision)) => Ok(decision),
            // Channel dropped or timer fired: deny.
            _ => Ok(ApprovalResult::Deny),
        }
    }
}

fn parse_chat_id(channel_id: &ChannelId) -> Result<ChatId, ChannelError> {
    channel_id
        .as_str()
        .parse::<i64>()
        .map(ChatId)
        .map_err(|_| ChannelError::SendFailed(format!("invalid telegram chat id: {channel_id}")))
}

/// Runs for every incoming message: bot filter, allowlist, media
/// extraction, then hand-off to the registered inbound handler.
async fn handle_update(bot: Bot, msg: Message, shared: Arc<Shared>) -> ResponseResult<()> {
    if msg.from.as_ref().map(|u| u.is_bot).unwrap_or(false) {
        return Ok(());
    }
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };
    let username = from.username.as_deref().unwrap_or("");
    let user_id = from.id.0.to_string();

    if !allow::is_allowed(&shared.config.allowed_users, username, &user_id) {
        warn!(user = %user_id, "telegram: message from unlisted user ignored");
        return Ok(());
    }

    let text = msg.text().or(msg.caption()).unwrap_or("").to_string();
    let images = attach::extract_images(&bot, &msg).await;
    if text.is_empty() && images.is_empty() {
        return Ok(());
    }

    let mut inbound = InboundMessage::new(
        ChannelId(msg.chat.id.0.to_string()),
        user_id.into(),
        if text.is_empty() {
            "[photo]".to_string()
        } else {
            text
        },
        Platform::Telegram,
    );
    inbound.images = images;

    let handler = shared.handler.read().unwrap().clone();
    match handler {
        Some(handler) => handler(inbound),
        None => warn!("telegram: inbound message dropped, no handler registered"),
    }
    Ok(())
}

/// Resolves inline approval buttons back into the waiting request.
async fn handle_callback(bot: Bot, query: CallbackQuery, shared: Arc<Shared>) -> ResponseResult<()> {
    let Some(data) = query.data.as_deref() else {
        return Ok(());
    };
    let Some(rest) = data.strip_prefix("appr:") else {
        return Ok(());
    };
    let Some((key, verdict)) = rest.rsplit_once(':') else {
        return Ok(());
    };
    let decision = match verdict {
        "allow" => ApprovalResult::Allow,
        "always" => ApprovalResult::AllowAlways,
        _ => ApprovalResult::Deny,
    };

    if let Some((_, tx)) = shared.approvals.remove(key) {
        let _ = tx.send(decision);
    }
    let ack = match decision {
        ApprovalResult::Allow => "Allowed once",
        ApprovalResult::AllowAlways => "Always allowed",
        ApprovalResult::Deny => "Denied",
    };
    bot.answer_callback_query(query.id.clone()).text(ack).await?;
    Ok(())
}
