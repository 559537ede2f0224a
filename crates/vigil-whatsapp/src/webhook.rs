//! Cloud API webhook: GET verification handshake plus POST message
//! delivery. Payload parsing is tolerant — unknown change types and
//! non-text messages are ignored rather than erroring.

use serde::Deserialize;

/// Query parameters of the GET verification request.
#[derive(Debug, Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// One inbound text message extracted from a webhook payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundText {
    pub from: String,
    pub message_id: String,
    pub body: String,
}

/// Pull every text message out of a webhook POST body.
pub fn extract_texts(payload: &serde_json::Value) -> Vec<InboundText> {
    let mut out = Vec::new();
    let Some(entries) = payload.get("entry").and_then(|v| v.as_array()) else {
        return out;
    };
    for entry in entries {
        let Some(changes) = entry.get("changes").and_then(|v| v.as_array()) else {
            continue;
        };
        for change in changes {
            let Some(messages) = change
                .pointer("/value/messages")
                .and_then(|v| v.as_array())
            else {
                continue;
            };
            for msg in messages {
                let from = msg.get("from").and_then(|v| v.as_str());
                let id = msg.get("id").and_then(|v| v.as_str());
                let body = msg.pointer("/text/body").and_then(|v| v.as_str());
                if let (Some(from), Some(id), Some(body)) = (from, id, body) {
                    out.push(InboundText {
                        from: from.to_string(),
                        message_id: id.to_string(),
                        body: body.to_string(),
                    });
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_text_messages() {
        let payload = serde_json::json!({
            "entry": [{
                "changes": [{
                    "value": {
                        "messages": [{
                            "from": "15551234567",
                            "id": "wamid.abc",
                            "type": "text",
                            "text": { "body": "hello" },
                        }]
                    }
                }]
            }]
        });
        let texts = extract_texts(&payload);
        assert_eq!(texts.len(), 1);
        assert_eq!(texts[0].from, "15551234567");
        assert_eq!(texts[0].body, "hello");
    }

    #[test]
    fn ignores_statuses_and_media() {
        let payload = serde_json::json!({
            "entry": [{
                "changes": [
                    { "value": { "statuses": [{ "id": "wamid.x", "status": "delivered" }] } },
                    { "value": { "messages": [{ "from": "1", "id": "wamid.y", "type": "image" }] } },
                ]
            }]
        });
        assert!(extract_texts(&payload).is_empty());
    }

    #[test]
    fn tolerates_garbage() {
        assert!(extract_texts(&serde_json::json!({})).is_empty());
        assert!(extract_texts(&serde_json::json!({"entry": 42})).is_empty());
    }
}
