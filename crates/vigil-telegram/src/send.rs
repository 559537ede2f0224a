//! Outbound sending: chunking at Telegram's 4096-char limit (4090 for
//! safety), MarkdownV2 first with plain-text fallback, backoff on
//! recoverable transport errors.

use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::ParseMode;

use vigil_channels::chunk::chunk_text;
use vigil_channels::{with_backoff, ChannelError};

/// Telegram's limit is 4096; leave headroom for escaping artefacts.
pub const CHUNK_MAX: usize = 4090;

/// Escape special characters for Telegram MarkdownV2.
pub fn escape_markdown_v2(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    for ch in text.chars() {
        match ch {
            '_' | '*' | '[' | ']' | '(' | ')' | '~' | '`' | '#' | '+' | '-' | '=' | '|' | '{'
            | '}' | '.' | '!' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Send `text` to `chat_id` in chunks; returns the id of the last chunk.
///
/// Each chunk tries MarkdownV2 and falls back to plain text when Telegram
/// rejects the parse mode. Recoverable transport errors are retried with
/// exponential backoff; permanent ones surface.
pub async fn send_chunked(bot: &Bot, chat_id: ChatId, text: &str) -> Result<String, ChannelError> {
    let chunks = chunk_text(text, CHUNK_MAX);
    let mut last_id = String::new();
    for (i, chunk) in chunks.iter().enumerate() {
        let sent = with_backoff("telegram send", 4, || async {
            send_one(bot, chat_id, chunk).await
        })
        .await?;
        last_id = sent;
        if i + 1 < chunks.len() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
    Ok(last_id)
}

async fn send_one(bot: &Bot, chat_id: ChatId, chunk: &str) -> Result<String, ChannelError> {
    let escaped = escape_markdown_v2(chunk);
    match bot
        .send_message(chat_id, &escaped)
        .parse_mode(ParseMode::MarkdownV2)
        .await
    {
        Ok(sent) => Ok(sent.id.0.to_string()),
        Err(_) => {
            // MarkdownV2 rejected (usually bad escaping) — plain text.
            bot.send_message(chat_id, chunk)
                .await
                .map(|sent| sent.id.0.to_string())
                .map_err(|e| ChannelError::SendFailed(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_specials() {
        let escaped = escape_markdown_v2("Hello. World! (test) [x]");
        assert!(escaped.contains("\\."));
        assert!(escaped.contains("\\!"));
        assert!(escaped.contains("\\("));
        assert!(escaped.contains("\\["));
    }

    #[test]
    fn leaves_normal_text_alone() {
        assert_eq!(escape_markdown_v2("Hello world 123"), "Hello world 123");
    }

    #[test]
    fn chunking_respects_limit() {
        let text = "line\n".repeat(2000);
        for chunk in chunk_text(&text, CHUNK_MAX) {
            assert!(chunk.len() <= CHUNK_MAX);
        }
    }
}
