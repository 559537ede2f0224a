use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Mutex, RwLock};

use chrono::Utc;
use tracing::{info, warn};

use vigil_core::datadir::write_atomic;

use crate::error::Result;
use crate::types::{ApprovalDuration, TrustApproval};

/// Persisted approvals plus process-local `once` grants.
///
/// `always` entries live in `trust-approvals.json`, rewritten atomically on
/// every change. `once` entries never touch disk and are consumed by the
/// first matching check.
pub struct TrustStore {
    path: PathBuf,
    always: RwLock<Vec<TrustApproval>>,
    once: Mutex<HashSet<String>>,
    /// Tools pre-approved by configuration (no handshake needed).
    preapproved: HashSet<String>,
}

impl TrustStore {
    pub fn load(path: impl Into<PathBuf>, preapproved: impl IntoIterator<Item = String>) -> Self {
        let path = path.into();
        let always = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Vec<TrustApproval>>(&raw) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(error = %e, "trust-approvals.json unreadable; starting empty");
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };
        Self {
            path,
            always: RwLock::new(always),
            once: Mutex::new(HashSet::new()),
            preapproved: preapproved.into_iter().collect(),
        }
    }

    /// Durable or configured approval for this tool?
    pub fn is_always_approved(&self, tool: &str) -> bool {
        if self.preapproved.contains(tool) {
            return true;
        }
        self.always.read().unwrap().iter().any(|a| a.tool == tool)
    }

    /// Consume a process-local `once` grant, if present.
    pub fn consume_once(&self, tool: &str) -> bool {
        self.once.lock().unwrap().remove(tool)
    }

    /// Record an approval. `Always` is persisted immediately.
    pub fn approve(&self, tool: &str, duration: ApprovalDuration) -> Result<()> {
        match duration {
            ApprovalDuration::Once => {
                self.once.lock().unwrap().insert(tool.to_string());
                info!(tool, "one-time approval granted");
                Ok(())
            }
            ApprovalDuration::Always => {
                {
                    let mut always = self.always.write().unwrap();
                    if !always.iter().any(|a| a.tool == tool) {
                        always.push(TrustApproval {
                            tool: tool.to_string(),
                            granted_at: Utc::now(),
                            duration: ApprovalDuration::Always,
                        });
                    }
                }
                self.persist()?;
                info!(tool, "permanent approval granted and persisted");
                Ok(())
            }
        }
    }

    /// Remove a persisted approval (administrative revoke).
    pub fn revoke(&self, tool: &str) -> Result<bool> {
        let removed = {
            let mut always = self.always.write().unwrap();
            let before = always.len();
            always.retain(|a| a.tool != tool);
            always.len() != before
        };
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    pub fn list(&self) -> Vec<TrustApproval> {
        self.always.read().unwrap().clone()
    }

    fn persist(&self) -> Result<()> {
        let entries = self.always.read().unwrap().clone();
        let json = serde_json::to_string_pretty(&entries)?;
        write_atomic(&self.path, json.as_bytes())
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        Ok(())
    }
}
