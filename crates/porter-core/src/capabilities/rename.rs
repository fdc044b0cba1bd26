use std::path::Path;
use std::time::SystemTime;

use time::OffsetDateTime;

use crate::capabilities::{Capabilities, content_preview, extension, file_name};
use crate::config::DatePosition;
use crate::models::{CoreError, CoreErrorKind, RenameSuggestion};
use crate::orchestration::ExecutionContext;
use crate::provider::{CompletionRequest, Message};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "svg", "bmp"];
const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "csv", "json", "xml", "html"];

const SYSTEM_PROMPT: &str = "You are a file naming assistant. Generate descriptive, clean \
    filenames. Return only the filename without extension.";

impl Capabilities {
    pub async fn suggest_rename(
        &self,
        context: &ExecutionContext,
        path: &Path,
    ) -> Result<RenameSuggestion, CoreError> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|error| CoreError::io("stat file", error))?;
        let original_name = file_name(path);
        let ext = extension(path);
        let lower_ext = ext.to_ascii_lowercase();
        let stem = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();

        let file_kind = if IMAGE_EXTENSIONS.contains(&lower_ext.as_str()) {
            "image"
        } else {
            "file"
        };
        let preview = if TEXT_EXTENSIONS.contains(&lower_ext.as_str()) {
            content_preview(path, metadata.len()).await
        } else {
            String::new()
        };
        let prompt = format!(
            "Generate a descriptive filename for this {file_kind}.\n\
             Current name: {stem}\nSize: {} bytes\nContent preview: {preview}\n\n\
             Use {} naming convention.\nKeep under {} characters.\n\
             Return ONLY the new filename without the extension, nothing else.",
            metadata.len(),
            self.rename.naming_convention,
            self.rename.max_length,
        );

        tracing::info!(file = %original_name, "generating rename via provider");
        let provider = self.providers.text_provider()?;
        let response = provider
            .complete(
                context,
                CompletionRequest {
                    model: None,
                    messages: vec![Message::system(SYSTEM_PROMPT), Message::user(prompt)],
                    temperature: 0.3,
                    max_tokens: 64,
                },
            )
            .await?;

        let mut new_name = clean_suggestion(&response.content, &ext, self.rename.max_length);
        if new_name.is_empty() {
            return Err(CoreError::new(
                CoreErrorKind::Provider,
                "provider returned an empty file name",
            ));
        }

        if self.rename.include_date {
            let stamp = date_stamp(metadata.modified().unwrap_or_else(|_| SystemTime::now()));
            new_name = match self.rename.date_position {
                DatePosition::Suffix => format!("{new_name}-{stamp}"),
                DatePosition::Prefix => format!("{stamp}-{new_name}"),
            };
        }
        if self.rename.preserve_extension && !ext.is_empty() {
            new_name = format!("{new_name}.{ext}");
        }

        tracing::info!(file = %original_name, suggested = %new_name, "suggested rename");
        Ok(RenameSuggestion {
            original_name,
            new_name,
            reason: "LLM-generated descriptive name".to_string(),
        })
    }
}

/// Strips quoting and a repeated extension, then caps the length.
fn clean_suggestion(raw: &str, ext: &str, max_length: usize) -> String {
    let trimmed = raw
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`'))
        .trim();
    let without_ext = if ext.is_empty() {
        trimmed
    } else {
        trimmed
            .strip_suffix(&format!(".{ext}"))
            .unwrap_or(trimmed)
    };
    let limit = if max_length == 0 { usize::MAX } else { max_length };
    without_ext.chars().take(limit).collect::<String>().trim().to_string()
}

fn date_stamp(value: SystemTime) -> String {
    let date = OffsetDateTime::from(value).date();
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}
