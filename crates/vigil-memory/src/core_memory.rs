//! Core memory: the small always-visible markdown block injected into
//! every system prompt, structured by `## Section` headings.
//!
//! Writes are full-file atomic rewrites, so a crash leaves either the old
//! or the new contents intact. The size limit is checked before writing;
//! a rejected write leaves the previous contents untouched.

use std::path::PathBuf;

use vigil_core::datadir::write_atomic;

use crate::error::{MemoryError, Result};

/// Hard cap on the rendered document, in bytes.
pub const CORE_MEMORY_LIMIT: usize = 4096;

pub struct CoreMemory {
    path: PathBuf,
    limit: usize,
}

impl CoreMemory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            limit: CORE_MEMORY_LIMIT,
        }
    }

    #[cfg(test)]
    fn with_limit(path: impl Into<PathBuf>, limit: usize) -> Self {
        Self { path: path.into(), limit }
    }

    /// Whole document. A missing file reads as empty.
    pub fn read(&self) -> Result<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(s) => Ok(s),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Append `content` under `## section`, creating the heading at the end
    /// of the document when absent.
    pub fn append(&self, section: &str, content: &str) -> Result<()> {
        let current = self.read()?;
        let updated = match section_bounds(&current, section) {
            Some((_, end)) => {
                let mut s = current.clone();
                let insertion = format!("{}\n", content.trim_end());
                s.insert_str(end, &insertion);
                s
            }
            None => {
                let mut s = current.clone();
                if !s.is_empty() && !s.ends_with('\n') {
                    s.push('\n');
                }
                if !s.is_empty() {
                    s.push('\n');
                }
                s.push_str(&format!("## {}\n{}\n", section.trim(), content.trim_end()));
                s
            }
        };
        self.write_checked(&updated)
    }

    /// Replace the first occurrence of `old` strictly inside `section`.
    pub fn replace(&self, section: &str, old: &str, new: &str) -> Result<()> {
        let current = self.read()?;
        let (start, end) = section_bounds(&current, section)
            .ok_or_else(|| MemoryError::SectionNotFound(section.to_string()))?;
        let body = &current[start..end];
        let offset = body.find(old).ok_or_else(|| MemoryError::TextNotFound {
            section: section.to_string(),
        })?;
        let mut updated = String::with_capacity(current.len());
        updated.push_str(&current[..start + offset]);
        updated.push_str(new);
        updated.push_str(&current[start + offset + old.len()..]);
        self.write_checked(&updated)
    }

    fn write_checked(&self, contents: &str) -> Result<()> {
        if contents.len() > self.limit {
            return Err(MemoryError::SizeLimitExceeded {
                size: contents.len(),
                limit: self.limit,
            });
        }
        write_atomic(&self.path, contents.as_bytes())?;
        Ok(())
    }
}

/// Byte range of a section's body: from the line after its `## heading`
/// to the start of the next `## ` heading (or end of document).
fn section_bounds(doc: &str, section: &str) -> Option<(usize, usize)> {
    let wanted = section.trim().to_lowercase();
    let mut offset = 0;
    let mut start: Option<usize> = None;
    for line in doc.split_inclusive('\n') {
        let trimmed = line.trim_end();
        if let Some(heading) = trimmed.strip_prefix("## ") {
            if start.is_some() {
                return Some((start.unwrap(), offset));
            }
            if heading.trim().to_lowercase() == wanted {
                start = Some(offset + line.len());
            }
        }
        offset += line.len();
    }
    start.map(|s| (s, doc.len()))
}
