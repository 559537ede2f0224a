//! Outbound sends via the Graph API. WhatsApp caps text messages at 4096
//! characters; longer replies are chunked.

use vigil_channels::chunk::chunk_text;
use vigil_channels::{with_backoff, ChannelError};

pub const CHUNK_MAX: usize = 4096;
const GRAPH_BASE: &str = "https://graph.facebook.com/v19.0";

pub struct WhatsappSender {
    client: reqwest::Client,
    access_token: String,
    phone_number_id: String,
}

impl WhatsappSender {
    pub fn new(access_token: String, phone_number_id: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            access_token,
            phone_number_id,
        }
    }

    /// Send `text` to `recipient` in chunks; returns the id of the last
    /// chunk. Recoverable transport errors retry with backoff.
    pub async fn send_text(&self, recipient: &str, text: &str) -> Result<String, ChannelError> {
        let mut last_id = String::new();
        for chunk in chunk_text(text, CHUNK_MAX) {
            last_id = with_backoff("whatsapp send", 4, || async {
                self.send_one(recipient, &chunk).await
            })
            .await?;
        }
        Ok(last_id)
    }

    async fn send_one(&self, recipient: &str, body: &str) -> Result<String, ChannelError> {
        let url = format!("{GRAPH_BASE}/{}/messages", self.phone_number_id);
        let payload = serde_json::json!({
            "messaging_product": "whatsapp",
            "to": recipient,
            "type": "text",
            "text": { "body": body },
        });
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ChannelError::from_reqwest("graph API send", e))?;

        let status = resp.status();
        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ChannelError::from_reqwest("graph API body", e))?;
        if !status.is_success() {
            let message = format!("graph API {status}: {json}");
            return Err(match status.as_u16() {
                429 => ChannelError::RateLimited(message),
                401 | 403 => ChannelError::AuthFailed(message),
                s if s >= 500 => ChannelError::ConnectionFailed(message),
                _ => ChannelError::SendFailed(message),
            });
        }
        Ok(json
            .pointer("/messages/0/id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }
}
