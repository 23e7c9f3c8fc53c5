use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use rho_agent_core::{Tool, ToolManifest, ToolOutcome, Toolbox};

const READ_FILE_MANIFEST: &str = include_str!("manifests/read_file.json");

const DEFAULT_MAX_SIZE: u64 = 100_000;
const HARD_MAX_SIZE: u64 = 1_000_000;

pub fn filesystem_toolbox() -> Toolbox {
    Toolbox::new("filesystem", "Local file access").add_tool(ReadFileTool::new())
}

pub struct ReadFileTool {
    manifest: ToolManifest,
    base_dir: Option<PathBuf>,
}

impl ReadFileTool {
    pub fn new() -> Self {
        Self {
            manifest: ToolManifest::parse(READ_FILE_MANIFEST).expect("embedded manifest is valid"),
            base_dir: None,
        }
    }

    /// Resolves relative paths against `base_dir` instead of the process
    /// working directory.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            manifest: ToolManifest::parse(READ_FILE_MANIFEST).expect("embedded manifest is valid"),
            base_dir: Some(base_dir.into()),
        }
    }

    fn resolve(&self, relative: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) => base.join(relative),
            None => relative.to_path_buf(),
        }
    }
}

impl Default for ReadFileTool {
    fn default() -> Self {
        Self::new()
    }
}

/// Local means relative and never climbing out of the working directory.
pub fn is_local_path(path: &Path) -> bool {
    if path.as_os_str().is_empty() || path.is_absolute() {
        return false;
    }
    path.components()
        .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}

fn effective_max_size(requested: Option<u64>) -> u64 {
    match requested {
        None | Some(0) => DEFAULT_MAX_SIZE,
        Some(size) if size > HARD_MAX_SIZE => HARD_MAX_SIZE,
        Some(size) => size,
    }
}

/// Falls back to a case-insensitive sibling match when the exact name does
/// not exist.
fn case_insensitive_lookup(path: &Path) -> Result<PathBuf, String> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    let dir = dir.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
    let Some(base) = path.file_name() else {
        return Err(format!("File not found: {}", path.display()));
    };
    let base = base.to_string_lossy();

    let entries = std::fs::read_dir(&dir).map_err(|error| {
        format!(
            "Directory not found or not accessible: {} ({error})",
            dir.display()
        )
    })?;

    for entry in entries.flatten() {
        let name = entry.file_name();
        if name.to_string_lossy().eq_ignore_ascii_case(&base) {
            return Ok(dir.join(name));
        }
    }

    Err(format!(
        "File not found: {} (no case-insensitive match found)",
        path.display()
    ))
}

#[async_trait]
impl Tool for ReadFileTool {
    fn manifest(&self) -> &ToolManifest {
        &self.manifest
    }

    async fn execute(&self, input: Value, _cancel: &CancellationToken) -> ToolOutcome {
        #[derive(Deserialize)]
        struct ReadFileInput {
            path: String,
            #[serde(default)]
            max_size: Option<u64>,
            #[serde(default)]
            detect_encoding: bool,
            #[serde(default)]
            include_stats: bool,
        }

        let input: ReadFileInput = match serde_json::from_value(input) {
            Ok(input) => input,
            Err(error) => {
                return ToolOutcome::error(format!("Error parsing input parameters: {error}"))
            }
        };

        if input.path.is_empty() {
            return ToolOutcome::error("Path parameter is required");
        }

        let requested = Path::new(&input.path);
        if !is_local_path(requested) {
            return ToolOutcome::error("Path must be local for security reasons");
        }

        let max_size = effective_max_size(input.max_size);
        let mut path = self.resolve(requested);

        if !path.exists() {
            path = match case_insensitive_lookup(&path) {
                Ok(found) => found,
                Err(message) => return ToolOutcome::error(message),
            };
        }

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(error) => return ToolOutcome::error(format!("Error accessing file: {error}")),
        };

        if metadata.is_dir() {
            return ToolOutcome::error(format!(
                "Path points to a directory, not a file: {}",
                path.display()
            ));
        }

        if metadata.len() > max_size {
            return ToolOutcome::error(format!(
                "File size ({} bytes) exceeds maximum allowed size ({} bytes)",
                metadata.len(),
                max_size
            ));
        }

        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(error) => return ToolOutcome::error(format!("Error reading file: {error}")),
        };

        let (content, is_binary) = match String::from_utf8(data.clone()) {
            Ok(content) => (content, false),
            Err(_) if input.detect_encoding => {
                (String::from_utf8_lossy(&data).to_string(), true)
            }
            Err(_) => {
                return ToolOutcome::error(
                    "File contains invalid UTF-8 sequences. Set detect_encoding=true to attempt conversion.",
                );
            }
        };

        if !input.include_stats {
            return ToolOutcome::ok(content);
        }

        let content_hash = BASE64.encode(Sha256::digest(&data));
        let lines = content.matches('\n').count() + 1;
        let modified_at = metadata
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map(|duration| duration.as_secs())
            .unwrap_or_default();

        let stats = json!({
            "content": content,
            "path": path.display().to_string(),
            "size_bytes": metadata.len(),
            "lines": lines,
            "modified_at": modified_at,
            "content_hash": content_hash,
            "is_binary": is_binary,
        });

        match serde_json::to_string_pretty(&stats) {
            Ok(rendered) => ToolOutcome::ok(rendered),
            Err(_) => ToolOutcome::error("Error generating stats JSON"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use rho_agent_core::Tool;

    use super::{effective_max_size, is_local_path, ReadFileTool};

    #[tokio::test]
    async fn reads_a_relative_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("notes.txt"), "X").expect("write file");

        let tool = ReadFileTool::with_base_dir(temp.path());
        let outcome = tool
            .execute(json!({"path": "notes.txt"}), &CancellationToken::new())
            .await;

        assert!(!outcome.is_error);
        assert_eq!(outcome.content, "X");
    }

    #[tokio::test]
    async fn falls_back_to_case_insensitive_match() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("README.md"), "docs").expect("write file");

        let tool = ReadFileTool::with_base_dir(temp.path());
        let outcome = tool
            .execute(json!({"path": "readme.md"}), &CancellationToken::new())
            .await;

        assert!(!outcome.is_error);
        assert_eq!(outcome.content, "docs");
    }

    #[tokio::test]
    async fn rejects_missing_files_with_a_clear_message() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tool = ReadFileTool::with_base_dir(temp.path());
        let outcome = tool
            .execute(json!({"path": "absent.txt"}), &CancellationToken::new())
            .await;

        assert!(outcome.is_error);
        assert!(outcome.content.contains("no case-insensitive match"));
    }

    #[tokio::test]
    async fn rejects_non_local_paths() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tool = ReadFileTool::with_base_dir(temp.path());

        for path in ["/etc/passwd", "../escape.txt", "a/../../escape.txt", ""] {
            let outcome = tool
                .execute(json!({ "path": path }), &CancellationToken::new())
                .await;
            assert!(outcome.is_error, "path {path:?} must be rejected");
        }
    }

    #[tokio::test]
    async fn rejects_directories() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(temp.path().join("subdir")).expect("create dir");

        let tool = ReadFileTool::with_base_dir(temp.path());
        let outcome = tool
            .execute(json!({"path": "subdir"}), &CancellationToken::new())
            .await;

        assert!(outcome.is_error);
        assert!(outcome.content.contains("directory"));
    }

    #[tokio::test]
    async fn rejects_files_exceeding_max_size() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("big.txt"), "x".repeat(64)).expect("write file");

        let tool = ReadFileTool::with_base_dir(temp.path());
        let outcome = tool
            .execute(
                json!({"path": "big.txt", "max_size": 16}),
                &CancellationToken::new(),
            )
            .await;

        assert!(outcome.is_error);
        assert!(outcome.content.contains("exceeds maximum allowed size"));
    }

    #[tokio::test]
    async fn refuses_invalid_utf8_unless_detection_is_requested() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("blob.bin"), [0xff, 0xfe, 0x41]).expect("write file");

        let tool = ReadFileTool::with_base_dir(temp.path());
        let outcome = tool
            .execute(json!({"path": "blob.bin"}), &CancellationToken::new())
            .await;
        assert!(outcome.is_error);
        assert!(outcome.content.contains("invalid UTF-8"));

        let outcome = tool
            .execute(
                json!({"path": "blob.bin", "detect_encoding": true}),
                &CancellationToken::new(),
            )
            .await;
        assert!(!outcome.is_error);
        assert!(outcome.content.contains('A'));
    }

    #[tokio::test]
    async fn include_stats_returns_metadata_and_digest() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("notes.txt"), "line one\nline two\n").expect("write file");

        let tool = ReadFileTool::with_base_dir(temp.path());
        let outcome = tool
            .execute(
                json!({"path": "notes.txt", "include_stats": true}),
                &CancellationToken::new(),
            )
            .await;

        assert!(!outcome.is_error);
        let stats: serde_json::Value =
            serde_json::from_str(&outcome.content).expect("stats should be JSON");
        assert_eq!(stats["content"], "line one\nline two\n");
        assert_eq!(stats["size_bytes"], 18);
        assert_eq!(stats["lines"], 3);
        assert_eq!(stats["is_binary"], false);
        assert!(stats["modified_at"].as_u64().expect("modified_at") > 0);

        let digest = stats["content_hash"].as_str().expect("content_hash");
        // base64 of a SHA-256 digest is 44 characters with padding
        assert_eq!(digest.len(), 44);
        assert!(digest.ends_with('='));
    }

    #[test]
    fn local_path_policy() {
        assert!(is_local_path(Path::new("notes.txt")));
        assert!(is_local_path(Path::new("./nested/notes.txt")));
        assert!(!is_local_path(Path::new("/etc/passwd")));
        assert!(!is_local_path(Path::new("../outside.txt")));
        assert!(!is_local_path(Path::new("nested/../../outside.txt")));
        assert!(!is_local_path(Path::new("")));
    }

    #[test]
    fn max_size_defaults_and_hard_cap() {
        assert_eq!(effective_max_size(None), 100_000);
        assert_eq!(effective_max_size(Some(0)), 100_000);
        assert_eq!(effective_max_size(Some(5_000)), 5_000);
        assert_eq!(effective_max_size(Some(2_000_000)), 1_000_000);
    }
}
