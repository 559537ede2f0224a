use std::sync::OnceLock;

use thiserror::Error;

/// Errors surfaced by any channel adapter.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Transport could not be established or dropped mid-flight.
    /// Retry-worthy.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The remote rejected or lost a message. Permanent unless the
    /// message text matches a known-transient shape.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// The remote asked us to slow down. Retry-worthy.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Operation timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Not connected")]
    NotConnected,
}

impl ChannelError {
    /// Should a retry loop try again? Classification is variant-driven;
    /// only `SendFailed` falls back to message matching, for SDKs that
    /// expose nothing but strings.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ChannelError::ConnectionFailed(_)
            | ChannelError::RateLimited(_)
            | ChannelError::Timeout { .. } => true,
            ChannelError::SendFailed(msg) => {
                classify_transport_error(msg) == TransportErrorKind::Recoverable
            }
            ChannelError::AuthFailed(_)
            | ChannelError::ConfigError(_)
            | ChannelError::NotConnected => false,
        }
    }

    /// Classify a raw reqwest transport failure using its typed
    /// predicates. Used where the adapter still holds the concrete error
    /// (WhatsApp Graph calls); SDKs that wrap their transport (teloxide)
    /// go through the string fallback instead.
    pub fn from_reqwest(context: &str, err: reqwest::Error) -> ChannelError {
        if err.is_timeout() || err.is_connect() {
            return ChannelError::ConnectionFailed(format!("{context}: {err}"));
        }
        ChannelError::SendFailed(format!("{context}: {err}"))
    }
}

/// Transport errors split into retry-worthy and give-up classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Network glitch, timeout, rate limit — retry with backoff.
    Recoverable,
    /// Auth failures, oversized payloads, other 4xx-style errors.
    Permanent,
}

/// Substrings that hyper/reqwest-backed SDK errors stringify to for
/// transient network failures. Wrapped SDK errors only expose messages,
/// so the string match is centralised here and nowhere else.
const RECOVERABLE_MARKERS: &[&str] = &[
    "connection reset",
    "connection refused",
    "connection closed before message completed",
    "broken pipe",
    "timed out",
    "dns error",
    "failed to lookup address",
    "incomplete message",
    "429",
    "Too Many Requests",
];

fn file_too_big_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"(?i)file (?:is )?too big").unwrap())
}

/// Classify a transport error message. "File too big" is always permanent,
/// even when it arrives wrapped in a timeout-ish envelope.
pub fn classify_transport_error(message: &str) -> TransportErrorKind {
    if file_too_big_re().is_match(message) {
        return TransportErrorKind::Permanent;
    }
    if RECOVERABLE_MARKERS.iter().any(|m| message.contains(m)) {
        return TransportErrorKind::Recoverable;
    }
    TransportErrorKind::Permanent
}

/// Retry `op` with exponential backoff while it fails recoverably.
/// Schedule: 1s, 2s, 4s, ... capped at 30s, up to `max_attempts`.
pub async fn with_backoff<T, F, Fut>(
    label: &str,
    max_attempts: u32,
    mut op: F,
) -> Result<T, ChannelError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ChannelError>>,
{
    let mut delay_secs = 1u64;
    for attempt in 1..=max_attempts {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if !e.is_recoverable() || attempt == max_attempts {
                    return Err(e);
                }
                tracing::warn!(
                    op = label,
                    attempt,
                    max = max_attempts,
                    error = %e,
                    retry_after_secs = delay_secs,
                    "recoverable transport error, retrying"
                );
                tokio::time::sleep(std::time::Duration::from_secs(delay_secs)).await;
                delay_secs = (delay_secs * 2).min(30);
            }
        }
    }
    unreachable!("backoff loop exited without returning")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hyper_shaped_messages_are_recoverable() {
        for msg in [
            "error sending request: connection reset by peer",
            "tcp connect error: connection refused",
            "error sending request: operation timed out",
            "dns error: failed to lookup address information",
            "connection closed before message completed",
            "API error: 429 Too Many Requests",
        ] {
            assert_eq!(classify_transport_error(msg), TransportErrorKind::Recoverable, "{msg}");
        }
    }

    #[test]
    fn file_too_big_is_always_permanent() {
        assert_eq!(
            classify_transport_error("Bad Request: file is too big"),
            TransportErrorKind::Permanent
        );
        // Even combined with a recoverable-looking marker.
        assert_eq!(
            classify_transport_error("request timed out while uploading: file too big"),
            TransportErrorKind::Permanent
        );
    }

    #[test]
    fn unknown_errors_default_to_permanent() {
        assert_eq!(
            classify_transport_error("401 Unauthorized"),
            TransportErrorKind::Permanent
        );
    }

    #[test]
    fn variant_classification_wins_over_message_text() {
        // An auth failure stays permanent no matter what the text says.
        assert!(!ChannelError::AuthFailed("connection reset".into()).is_recoverable());
        assert!(ChannelError::RateLimited("HTTP 429".into()).is_recoverable());
        assert!(ChannelError::ConnectionFailed("bind failed".into()).is_recoverable());
        assert!(ChannelError::Timeout { ms: 5000 }.is_recoverable());
        assert!(!ChannelError::SendFailed("Bad Request: chat not found".into()).is_recoverable());
    }

    #[tokio::test]
    async fn backoff_gives_up_on_permanent() {
        let mut calls = 0;
        let result: Result<(), _> = with_backoff("test", 5, || {
            calls += 1;
            async { Err(ChannelError::AuthFailed("401 Unauthorized".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1, "permanent errors must not be retried");
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_retries_recoverable_until_success() {
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let calls2 = calls.clone();
        let result = with_backoff("test", 5, move || {
            let calls = calls2.clone();
            async move {
                let n = calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                if n < 2 {
                    Err(ChannelError::ConnectionFailed("connection reset by peer".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }
}
