//! Optional per-call LLM guardrail for elevated tools. A minimal
//! classification call runs alongside the static approval check; BLOCK
//! always wins, and an unparseable verdict fails safe to ASK.

use tracing::warn;

use crate::provider::{ChatMessage, ChatRequest};
use crate::router::ProviderRouter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Ask,
    Block,
}

const GUARDRAIL_PROMPT: &str = "\
You judge whether an assistant should run a privileged tool right now. \
Consider the tool, its arguments, and the user's last message. \
Reply with exactly one word: ALLOW, ASK, or BLOCK.";

/// Classify one elevated call. Transport failures degrade to ASK — the
/// static handshake then decides.
pub async fn classify(
    router: &ProviderRouter,
    model: &str,
    tool_name: &str,
    arguments: &serde_json::Value,
    last_user_message: &str,
) -> Verdict {
    let request = ChatRequest {
        model: model.to_string(),
        system: GUARDRAIL_PROMPT.to_string(),
        messages: vec![ChatMessage::user_text(format!(
            "Tool: {tool_name}\nArguments: {arguments}\nLast user message: {last_user_message}"
        ))],
        max_tokens: 16,
        tools: Vec::new(),
    };
    match router.send_model(model, request).await {
        Ok(routed) => parse_verdict(&routed.response.content),
        Err(e) => {
            warn!(error = %e, tool = %tool_name, "guardrail call failed; failing safe to ASK");
            Verdict::Ask
        }
    }
}

/// Parse the verdict word. Unparseable responses fail safe to ASK.
pub fn parse_verdict(response: &str) -> Verdict {
    let upper = response.trim().to_uppercase();
    match upper.as_str() {
        "ALLOW" => Verdict::Allow,
        "ASK" => Verdict::Ask,
        "BLOCK" => Verdict::Block,
        _ => {
            // A verbose model may still lead with the verdict.
            if upper.starts_with("BLOCK") {
                Verdict::Block
            } else if upper.starts_with("ALLOW") {
                Verdict::Allow
            } else {
                Verdict::Ask
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_exact_words() {
        assert_eq!(parse_verdict("ALLOW"), Verdict::Allow);
        assert_eq!(parse_verdict(" ask \n"), Verdict::Ask);
        assert_eq!(parse_verdict("Block"), Verdict::Block);
    }

    #[test]
    fn verbose_responses_use_leading_word() {
        assert_eq!(parse_verdict("BLOCK — this looks destructive"), Verdict::Block);
        assert_eq!(parse_verdict("ALLOW, it is harmless"), Verdict::Allow);
    }

    #[test]
    fn garbage_fails_safe_to_ask() {
        assert_eq!(parse_verdict("I think maybe yes?"), Verdict::Ask);
        assert_eq!(parse_verdict(""), Verdict::Ask);
    }
}
