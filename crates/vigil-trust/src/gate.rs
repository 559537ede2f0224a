use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, info};

use crate::error::Result;
use crate::store::TrustStore;
use crate::types::{ApprovalDuration, ApprovalReply, Capability, ToolLevel};

/// Pending approvals expire after this long; an expired entry is a deny.
pub const APPROVAL_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Outcome of gating one tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allowed,
    /// The tool must not run; the caller returns a structured
    /// "permission required" result and waits for the handshake.
    PermissionRequired {
        tool: String,
        capabilities: Vec<Capability>,
    },
}

/// Result of testing a user message against an open handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// The message resolved the handshake; respond directly, no LLM turn.
    Resolved { tool: String, reply: ApprovalReply },
    /// No open handshake, or the message was not an unambiguous reply.
    /// Any open handshake is cleared either way — its lifetime is bounded
    /// by the user's next message.
    NotAReply,
}

struct Pending {
    tool: String,
    requested_at: Instant,
}

/// Process-wide trust gate: the store plus the per-user pending map.
pub struct TrustGate {
    store: Arc<TrustStore>,
    pending: DashMap<String, Pending>,
}

impl TrustGate {
    pub fn new(store: Arc<TrustStore>) -> Self {
        Self {
            store,
            pending: DashMap::new(),
        }
    }

    pub fn store(&self) -> &TrustStore {
        &self.store
    }

    /// Gate one tool invocation for `user_id`. Safe and guarded levels
    /// execute freely; elevated levels consult approvals. A blocked call
    /// opens a pending approval for this user.
    pub fn check(
        &self,
        user_id: &str,
        tool: &str,
        level: ToolLevel,
        capabilities: &[Capability],
    ) -> GateDecision {
        match level {
            ToolLevel::Safe | ToolLevel::Guarded => GateDecision::Allowed,
            ToolLevel::Elevated => {
                if self.store.is_always_approved(tool) || self.store.consume_once(tool) {
                    debug!(tool, "elevated tool approved");
                    return GateDecision::Allowed;
                }
                self.request_approval(user_id, tool, capabilities)
            }
        }
    }

    /// Open a handshake unconditionally, bypassing stored approvals. Used
    /// when the guardrail downgrades an otherwise-approved call to ASK.
    pub fn request_approval(
        &self,
        user_id: &str,
        tool: &str,
        capabilities: &[Capability],
    ) -> GateDecision {
        info!(tool, user = %user_id, "elevated tool blocked, awaiting approval");
        self.pending.insert(
            user_id.to_string(),
            Pending {
                tool: tool.to_string(),
                requested_at: Instant::now(),
            },
        );
        GateDecision::PermissionRequired {
            tool: tool.to_string(),
            capabilities: capabilities.to_vec(),
        }
    }

    /// True when `user_id` has an open (unexpired) handshake.
    pub fn has_pending(&self, user_id: &str) -> bool {
        match self.pending.get(user_id) {
            Some(p) => p.requested_at.elapsed() < APPROVAL_TIMEOUT,
            None => false,
        }
    }

    /// Test the user's next message against the open handshake. The
    /// pending entry is removed regardless of the outcome; an expired
    /// entry counts as deny-by-timeout and the message flows on normally.
    pub fn try_resolve(&self, user_id: &str, text: &str) -> Result<HandshakeOutcome> {
        let Some((_, pending)) = self.pending.remove(user_id) else {
            return Ok(HandshakeOutcome::NotAReply);
        };
        if pending.requested_at.elapsed() >= APPROVAL_TIMEOUT {
            info!(tool = %pending.tool, "approval handshake expired; denied");
            return Ok(HandshakeOutcome::NotAReply);
        }
        let Some(reply) = ApprovalReply::parse(text) else {
            debug!(tool = %pending.tool, "message is not a handshake reply; pending cleared");
            return Ok(HandshakeOutcome::NotAReply);
        };
        self.apply(&pending.tool, reply)?;
        Ok(HandshakeOutcome::Resolved {
            tool: pending.tool,
            reply,
        })
    }

    /// Apply a reply that arrived out-of-band (inline button callback).
    pub fn resolve_inline(&self, user_id: &str, reply: ApprovalReply) -> Result<Option<String>> {
        let Some((_, pending)) = self.pending.remove(user_id) else {
            return Ok(None);
        };
        self.apply(&pending.tool, reply)?;
        Ok(Some(pending.tool))
    }

    fn apply(&self, tool: &str, reply: ApprovalReply) -> Result<()> {
        match reply {
            ApprovalReply::Approve => self.store.approve(tool, ApprovalDuration::Once),
            ApprovalReply::ApproveAlways => self.store.approve(tool, ApprovalDuration::Always),
            ApprovalReply::Deny => {
                info!(tool, "approval denied by user");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> (tempfile::TempDir, TrustGate) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TrustStore::load(dir.path().join("trust-approvals.json"), []));
        (dir, TrustGate::new(store))
    }

    #[test]
    fn safe_and_guarded_always_pass() {
        let (_dir, gate) = gate();
        assert_eq!(gate.check("u", "archival_search", ToolLevel::Safe, &[]), GateDecision::Allowed);
        assert_eq!(
            gate.check("u", "core_memory_append", ToolLevel::Guarded, &[]),
            GateDecision::Allowed
        );
        assert!(!gate.has_pending("u"));
    }

    #[test]
    fn elevated_blocks_and_sets_pending() {
        let (_dir, gate) = gate();
        let decision = gate.check(
            "u",
            "shell_exec",
            ToolLevel::Elevated,
            &[Capability::Shell],
        );
        assert!(matches!(decision, GateDecision::PermissionRequired { ref tool, .. } if tool == "shell_exec"));
        assert!(gate.has_pending("u"));
    }

    #[test]
    fn handshake_once_allows_next_call_only() {
        let (_dir, gate) = gate();
        gate.check("u", "shell_exec", ToolLevel::Elevated, &[Capability::Shell]);
        let outcome = gate.try_resolve("u", "yes").unwrap();
        assert!(matches!(
            outcome,
            HandshakeOutcome::Resolved { reply: ApprovalReply::Approve, .. }
        ));
        // Retry succeeds, consuming the grant.
        assert_eq!(
            gate.check("u", "shell_exec", ToolLevel::Elevated, &[Capability::Shell]),
            GateDecision::Allowed
        );
        // A third call blocks again.
        assert!(matches!(
            gate.check("u", "shell_exec", ToolLevel::Elevated, &[Capability::Shell]),
            GateDecision::PermissionRequired { .. }
        ));
    }

    #[test]
    fn handshake_always_persists() {
        let (_dir, gate) = gate();
        gate.check("u", "shell_exec", ToolLevel::Elevated, &[Capability::Shell]);
        gate.try_resolve("u", "always").unwrap();
        for _ in 0..3 {
            assert_eq!(
                gate.check("u", "shell_exec", ToolLevel::Elevated, &[Capability::Shell]),
                GateDecision::Allowed
            );
        }
    }

    #[test]
    fn deny_clears_without_granting() {
        let (_dir, gate) = gate();
        gate.check("u", "shell_exec", ToolLevel::Elevated, &[Capability::Shell]);
        let outcome = gate.try_resolve("u", "no").unwrap();
        assert!(matches!(
            outcome,
            HandshakeOutcome::Resolved { reply: ApprovalReply::Deny, .. }
        ));
        assert!(matches!(
            gate.check("u", "shell_exec", ToolLevel::Elevated, &[Capability::Shell]),
            GateDecision::PermissionRequired { .. }
        ));
    }

    #[test]
    fn unrelated_message_clears_pending() {
        let (_dir, gate) = gate();
        gate.check("u", "shell_exec", ToolLevel::Elevated, &[Capability::Shell]);
        let outcome = gate.try_resolve("u", "actually, what's the weather?").unwrap();
        assert_eq!(outcome, HandshakeOutcome::NotAReply);
        assert!(!gate.has_pending("u"));
    }

    #[test]
    fn pending_is_per_user() {
        let (_dir, gate) = gate();
        gate.check("alice", "shell_exec", ToolLevel::Elevated, &[Capability::Shell]);
        assert!(!gate.has_pending("bob"));
        assert_eq!(gate.try_resolve("bob", "yes").unwrap(), HandshakeOutcome::NotAReply);
        assert!(gate.has_pending("alice"));
    }
}
