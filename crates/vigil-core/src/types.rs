use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The principal user this deployment serves. Single-principal: every store
/// is keyed by one of these, but a deployment only ever creates one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifies a conversation endpoint on a platform (Telegram chat id,
/// WhatsApp phone number, or a synthetic id for scheduler traffic).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub String);

impl ChannelId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ChannelId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Where an inbound message originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Telegram,
    Whatsapp,
    /// Not originated by a human: scheduler ticks, worker completions.
    Synthetic,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Telegram => write!(f, "telegram"),
            Self::Whatsapp => write!(f, "whatsapp"),
            Self::Synthetic => write!(f, "synthetic"),
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "telegram" => Ok(Self::Telegram),
            "whatsapp" => Ok(Self::Whatsapp),
            "synthetic" => Ok(Self::Synthetic),
            other => Err(format!("unknown platform: {other}")),
        }
    }
}

/// Inline image carried with an inbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageAttachment {
    pub media_type: String,
    /// Base64-encoded image bytes.
    pub data: String,
}

/// A single inbound message entering the per-channel queue. Scheduler
/// ticks and worker completions synthesise these so that every path into
/// the agent is serialised the same way.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub text: String,
    pub platform: Platform,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageAttachment>,
    pub arrived_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(channel_id: ChannelId, user_id: UserId, text: impl Into<String>, platform: Platform) -> Self {
        Self {
            channel_id,
            user_id,
            text: text.into(),
            platform,
            images: Vec::new(),
            arrived_at: Utc::now(),
        }
    }

    /// A message fabricated by the scheduler or worker bridge.
    pub fn synthetic(channel_id: ChannelId, user_id: UserId, text: impl Into<String>) -> Self {
        Self::new(channel_id, user_id, text, Platform::Synthetic)
    }
}

/// Generate an opaque unique id (facts, projections, workers).
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_round_trips_through_str() {
        for p in [Platform::Telegram, Platform::Whatsapp, Platform::Synthetic] {
            let s = p.to_string();
            assert_eq!(s.parse::<Platform>().unwrap(), p);
        }
    }

    #[test]
    fn synthetic_message_has_platform_synthetic() {
        let msg = InboundMessage::synthetic("c1".into(), "u1".into(), "tick");
        assert_eq!(msg.platform, Platform::Synthetic);
        assert!(msg.images.is_empty());
    }
}
