//! File tools scoped to one directory — the tool set handed to workers.
//! Every path is resolved inside the root; traversal out is refused.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{str_arg, Tool, ToolResult};

/// Maximum bytes returned from a single read.
const READ_CAP: usize = 64 * 1024;

fn resolve_scoped(root: &Path, relative: &str) -> Result<PathBuf, ToolResult> {
    let candidate = root.join(relative.trim_start_matches('/'));
    // Normalise without touching the filesystem: reject any `..` component.
    if candidate
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(ToolResult::error("path escapes the working directory"));
    }
    Ok(candidate)
}

pub struct ScopedReadFileTool {
    pub root: PathBuf,
}

#[async_trait]
impl Tool for ScopedReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file inside the working directory."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let rel = match str_arg(&input, "path") {
            Ok(p) => p,
            Err(e) => return e,
        };
        let path = match resolve_scoped(&self.root, rel) {
            Ok(p) => p,
            Err(e) => return e,
        };
        match tokio::fs::read_to_string(&path).await {
            Ok(mut content) => {
                if content.len() > READ_CAP {
                    content.truncate(READ_CAP);
                    content.push_str("\n… (truncated)");
                }
                ToolResult::success(content)
            }
            Err(e) => ToolResult::error(format!("read failed: {e}")),
        }
    }
}

pub struct ScopedWriteFileTool {
    pub root: PathBuf,
}

#[async_trait]
impl Tool for ScopedWriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write (or overwrite) a file inside the working directory. Findings go in result.md."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "content": { "type": "string" }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let rel = match str_arg(&input, "path") {
            Ok(p) => p,
            Err(e) => return e,
        };
        let content = input.get("content").and_then(|v| v.as_str()).unwrap_or("");
        let path = match resolve_scoped(&self.root, rel) {
            Ok(p) => p,
            Err(e) => return e,
        };
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolResult::error(format!("write failed: {e}"));
            }
        }
        match tokio::fs::write(&path, content).await {
            Ok(()) => ToolResult::success(format!("wrote {} bytes to {rel}", content.len())),
            Err(e) => ToolResult::error(format!("write failed: {e}")),
        }
    }
}

pub struct ScopedListFilesTool {
    pub root: PathBuf,
}

#[async_trait]
impl Tool for ScopedListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List files in the working directory."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "path": { "type": "string", "default": "." } }
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let rel = input.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let path = match resolve_scoped(&self.root, rel) {
            Ok(p) => p,
            Err(e) => return e,
        };
        let mut entries = match tokio::fs::read_dir(&path).await {
            Ok(rd) => rd,
            Err(e) => return ToolResult::error(format!("list failed: {e}")),
        };
        let mut names = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let suffix = if entry.path().is_dir() { "/" } else { "" };
            names.push(format!("{}{suffix}", entry.file_name().to_string_lossy()));
        }
        names.sort();
        ToolResult::success(if names.is_empty() {
            "(empty)".to_string()
        } else {
            names.join("\n")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_inside_scope() {
        let dir = tempfile::tempdir().unwrap();
        let write = ScopedWriteFileTool { root: dir.path().to_path_buf() };
        let read = ScopedReadFileTool { root: dir.path().to_path_buf() };

        let r = write
            .execute(serde_json::json!({ "path": "result.md", "content": "# Findings" }))
            .await;
        assert!(!r.is_error);
        let r = read.execute(serde_json::json!({ "path": "result.md" })).await;
        assert_eq!(r.content, "# Findings");
    }

    #[tokio::test]
    async fn traversal_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let read = ScopedReadFileTool { root: dir.path().to_path_buf() };
        let r = read
            .execute(serde_json::json!({ "path": "../../etc/passwd" }))
            .await;
        assert!(r.is_error);
        assert!(r.content.contains("escapes"));
    }
}
