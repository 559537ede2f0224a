use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Declared risk level of a tool. Only elevated tools hit the trust store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolLevel {
    Safe,
    Guarded,
    Elevated,
}

/// What an elevated tool touches. Shown to the user in the approval prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Network,
    Filesystem,
    Shell,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Filesystem => write!(f, "filesystem"),
            Self::Shell => write!(f, "shell"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalDuration {
    /// Persisted to disk; survives restarts.
    Always,
    /// Lives only in this process; consumed on first use.
    Once,
}

/// One persisted entry in `trust-approvals.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustApproval {
    pub tool: String,
    #[serde(rename = "grantedAt")]
    pub granted_at: DateTime<Utc>,
    pub duration: ApprovalDuration,
}

/// Parsed user reply in the approval handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalReply {
    Approve,
    ApproveAlways,
    Deny,
}

impl ApprovalReply {
    /// Classify a message as an unambiguous handshake reply. Anything else
    /// returns `None` and flows to the LLM as a normal message.
    pub fn parse(text: &str) -> Option<Self> {
        let normalised = text.trim().to_lowercase();
        let normalised = normalised.trim_end_matches(['.', '!']);
        match normalised {
            "always" | "always allow" | "allow always" | "yes always" => Some(Self::ApproveAlways),
            "yes" | "y" | "ok" | "okay" | "sure" | "allow" | "approve" | "go ahead" | "yes please" => {
                Some(Self::Approve)
            }
            "no" | "n" | "deny" | "nope" | "never" | "don't" | "dont" | "stop" => Some(Self::Deny),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_affirmatives() {
        assert_eq!(ApprovalReply::parse("yes"), Some(ApprovalReply::Approve));
        assert_eq!(ApprovalReply::parse(" OK! "), Some(ApprovalReply::Approve));
        assert_eq!(ApprovalReply::parse("go ahead"), Some(ApprovalReply::Approve));
    }

    #[test]
    fn parses_always_before_plain_yes() {
        assert_eq!(ApprovalReply::parse("always"), Some(ApprovalReply::ApproveAlways));
        assert_eq!(ApprovalReply::parse("Always allow"), Some(ApprovalReply::ApproveAlways));
    }

    #[test]
    fn parses_negatives() {
        assert_eq!(ApprovalReply::parse("no"), Some(ApprovalReply::Deny));
        assert_eq!(ApprovalReply::parse("Never."), Some(ApprovalReply::Deny));
    }

    #[test]
    fn ambiguous_text_is_not_a_reply() {
        assert_eq!(ApprovalReply::parse("yes, but tell me more first"), None);
        assert_eq!(ApprovalReply::parse("what does this tool do?"), None);
    }
}
