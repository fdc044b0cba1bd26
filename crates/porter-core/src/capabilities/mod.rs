//! Atomic file capabilities. Each one is usable directly (pipelines call
//! them in-process) and as a queue handler for its own task type.

pub mod classify;
pub mod rename;
pub mod screenshot;

pub use screenshot::sanitize_filename;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{AutoFileSection, DaemonConfig, RenameSection, ScreenshotsSection};
use crate::models::{CoreError, PathPayload, TaskType};
use crate::orchestration::{ExecutionContext, OrchestrationResult, TaskQueue};
use crate::provider::ProviderRegistry;

const PREVIEW_CHARS: usize = 1000;
const PREVIEW_MAX_BYTES: u64 = 1 << 20;

pub struct Capabilities {
    providers: Arc<ProviderRegistry>,
    auto_file: AutoFileSection,
    rename: RenameSection,
    screenshots: ScreenshotsSection,
}

impl Capabilities {
    pub fn new(providers: Arc<ProviderRegistry>, config: &DaemonConfig) -> Self {
        Self {
            providers,
            auto_file: config.auto_file.clone(),
            rename: config.rename.clone(),
            screenshots: config.screenshots.clone(),
        }
    }

    /// Binds `file.classify`, `file.rename` and `screenshot.tag`.
    pub fn register_handlers(self: &Arc<Self>, queue: &TaskQueue) -> OrchestrationResult<()> {
        let capabilities = self.clone();
        queue.register_handler(
            TaskType::FileClassify,
            move |context: ExecutionContext, payload: Vec<u8>| {
                let capabilities = capabilities.clone();
                async move {
                    let path = parse_path_payload(&payload)?;
                    let classification = capabilities.classify(&context, &path).await?;
                    Ok::<Vec<u8>, CoreError>(serde_json::to_vec(&classification)?)
                }
            },
        )?;

        let capabilities = self.clone();
        queue.register_handler(
            TaskType::FileRename,
            move |context: ExecutionContext, payload: Vec<u8>| {
                let capabilities = capabilities.clone();
                async move {
                    let path = parse_path_payload(&payload)?;
                    let suggestion = capabilities.suggest_rename(&context, &path).await?;
                    Ok::<Vec<u8>, CoreError>(serde_json::to_vec(&suggestion)?)
                }
            },
        )?;

        let capabilities = self.clone();
        queue.register_handler(
            TaskType::ScreenshotTag,
            move |context: ExecutionContext, payload: Vec<u8>| {
                let capabilities = capabilities.clone();
                async move {
                    let path = parse_path_payload(&payload)?;
                    let tags = capabilities.tag_screenshot(&context, &path).await?;
                    Ok::<Vec<u8>, CoreError>(serde_json::to_vec(&tags)?)
                }
            },
        )
    }
}

/// Decodes `{"path": "..."}`. Malformed payloads are permanent failures.
pub fn parse_path_payload(payload: &[u8]) -> Result<PathBuf, CoreError> {
    let parsed: PathPayload = serde_json::from_slice(payload)
        .map_err(|error| CoreError::invalid_input(format!("parse payload: {error}")))?;
    if parsed.path.as_os_str().is_empty() {
        return Err(CoreError::invalid_input("empty path"));
    }
    Ok(parsed.path)
}

pub fn path_payload(path: &Path) -> Result<Vec<u8>, CoreError> {
    Ok(serde_json::to_vec(&PathPayload {
        path: path.to_path_buf(),
    })?)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn extension(path: &Path) -> String {
    path.extension()
        .map(|ext| ext.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// First characters of a small text file, or empty when unreadable.
async fn content_preview(path: &Path, size: u64) -> String {
    if size >= PREVIEW_MAX_BYTES {
        return String::new();
    }
    match tokio::fs::read(path).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes)
            .chars()
            .take(PREVIEW_CHARS)
            .collect(),
        Err(_) => String::new(),
    }
}
