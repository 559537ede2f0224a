//! Append-only JSONL journals: conversation audit (`history/`) and the
//! per-call token/cost ledger (`usage/`). Files roll daily by name.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One line in `history/YYYY-MM-DD.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: String,
    pub content: String,
    pub channel: String,
    pub timestamp: DateTime<Utc>,
}

/// One line in `usage/YYYY-MM-DD.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEntry {
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_usd: f64,
    pub latency_ms: u64,
}

/// Date-rolled JSONL appender bound to one directory.
#[derive(Debug, Clone)]
pub struct Journal {
    dir: PathBuf,
}

impl Journal {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn file_for(&self, date: DateTime<Utc>) -> PathBuf {
        self.dir.join(format!("{}.jsonl", date.format("%Y-%m-%d")))
    }

    /// Append one serialisable record to today's file.
    pub fn append<T: Serialize>(&self, record: &T) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file_for(Utc::now()))?;
        let line = serde_json::to_string(record)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Read every history entry from the last `minutes`, oldest first.
    /// Scans today's and yesterday's files so windows crossing midnight work.
    pub fn read_since(&self, minutes: i64) -> Result<Vec<HistoryEntry>> {
        let cutoff = Utc::now() - Duration::minutes(minutes);
        let mut out = Vec::new();
        for date in [cutoff, Utc::now()] {
            let path = self.file_for(date);
            if !path.exists() {
                continue;
            }
            let reader = BufReader::new(std::fs::File::open(&path)?);
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                if let Ok(entry) = serde_json::from_str::<HistoryEntry>(&line) {
                    if entry.timestamp >= cutoff {
                        out.push(entry);
                    }
                }
            }
        }
        out.sort_by_key(|e| e.timestamp);
        out.dedup_by(|a, b| a.timestamp == b.timestamp && a.content == b.content);
        Ok(out)
    }

    /// Last `n` raw lines of today's file, for the `/log` command.
    pub fn tail_today(&self, n: usize) -> Result<Vec<String>> {
        let path = self.file_for(Utc::now());
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(std::fs::File::open(&path)?);
        let lines: Vec<String> = reader.lines().collect::<std::io::Result<_>>()?;
        let skip = lines.len().saturating_sub(n);
        Ok(lines.into_iter().skip(skip).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_read_back() {
        let tmp = tempfile::tempdir().unwrap();
        let journal = Journal::new(tmp.path());
        journal
            .append(&HistoryEntry {
                role: "user".into(),
                content: "hello".into(),
                channel: "telegram".into(),
                timestamp: Utc::now(),
            })
            .unwrap();
        let entries = journal.read_since(5).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].content, "hello");
    }

    #[test]
    fn read_since_filters_old_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let journal = Journal::new(tmp.path());
        journal
            .append(&HistoryEntry {
                role: "user".into(),
                content: "ancient".into(),
                channel: "telegram".into(),
                timestamp: Utc::now() - Duration::hours(3),
            })
            .unwrap();
        journal
            .append(&HistoryEntry {
                role: "user".into(),
                content: "fresh".into(),
                channel: "telegram".into(),
                timestamp: Utc::now(),
            })
            .unwrap();
        let entries = journal.read_since(30).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].content, "fresh");
    }

    #[test]
    fn tail_returns_last_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let journal = Journal::new(tmp.path());
        for i in 0..5 {
            journal
                .append(&HistoryEntry {
                    role: "user".into(),
                    content: format!("m{i}"),
                    channel: "telegram".into(),
                    timestamp: Utc::now(),
                })
                .unwrap();
        }
        let tail = journal.tail_today(2).unwrap();
        assert_eq!(tail.len(), 2);
        assert!(tail[1].contains("m4"));
    }
}
