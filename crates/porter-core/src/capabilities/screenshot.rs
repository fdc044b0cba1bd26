use std::path::Path;

use crate::capabilities::{Capabilities, extension, file_name};
use crate::models::{CoreError, ScreenshotTags};
use crate::orchestration::ExecutionContext;
use crate::provider::{CompletionRequest, ImageInput, Message, VisionRequest};

const ANALYSIS_PROMPT: &str = r#"Analyze this screenshot and provide:
1. App or website shown (if identifiable)
2. Brief description of content (under 10 words)
3. Up to 5 relevant tags

Return as JSON: {"app": "", "description": "", "tags": []}"#;

impl Capabilities {
    pub async fn tag_screenshot(
        &self,
        context: &ExecutionContext,
        path: &Path,
    ) -> Result<ScreenshotTags, CoreError> {
        let image = tokio::fs::read(path)
            .await
            .map_err(|error| CoreError::io("read image", error))?;
        let ext = extension(path);

        tracing::info!(file = %file_name(path), "tagging screenshot via vision provider");
        let provider = self
            .providers
            .vision_provider(self.screenshots.vision_provider.as_deref())?;
        let response = provider
            .complete_with_vision(
                context,
                VisionRequest {
                    completion: CompletionRequest {
                        model: None,
                        messages: vec![
                            Message::system("You are a screenshot analysis assistant."),
                            Message::user(ANALYSIS_PROMPT),
                        ],
                        temperature: 0.2,
                        max_tokens: 256,
                    },
                    images: vec![ImageInput {
                        data: image,
                        mime_type: mime_type(&ext).to_string(),
                    }],
                },
            )
            .await?;

        let mut tags = parse_tags(&response.content);
        tags.suggested_name = suggested_name(&tags, path, &ext);
        tracing::info!(
            app = %tags.app,
            description = %tags.description,
            tags = ?tags.tags,
            "tagged screenshot"
        );
        Ok(tags)
    }
}

/// Lowercase ASCII letters, digits and single dashes; spaces and underscores
/// become dashes, everything else is dropped.
pub fn sanitize_filename(raw: &str) -> String {
    let mut sanitized = String::with_capacity(raw.len());
    for c in raw.to_lowercase().chars() {
        let mapped = match c {
            'a'..='z' | '0'..='9' => c,
            '-' | ' ' | '_' => '-',
            _ => continue,
        };
        if mapped == '-' && sanitized.ends_with('-') {
            continue;
        }
        sanitized.push(mapped);
    }
    sanitized.trim_matches('-').to_string()
}

fn mime_type(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "image/png",
    }
}

/// Extracts the outermost JSON object; falls back to treating the whole
/// response as a description.
fn parse_tags(content: &str) -> ScreenshotTags {
    let content = content.trim();
    let candidate = match (content.find('{'), content.rfind('}')) {
        (Some(start), Some(end)) if end > start => &content[start..=end],
        _ => content,
    };
    serde_json::from_str::<ScreenshotTags>(candidate).unwrap_or_else(|_| ScreenshotTags {
        app: "unknown".to_string(),
        description: candidate.to_string(),
        tags: Vec::new(),
        suggested_name: String::new(),
    })
}

fn suggested_name(tags: &ScreenshotTags, path: &Path, ext: &str) -> String {
    let parts: Vec<String> = [
        (!tags.app.is_empty() && tags.app != "unknown").then(|| sanitize_filename(&tags.app)),
        (!tags.description.is_empty()).then(|| sanitize_filename(&tags.description)),
    ]
    .into_iter()
    .flatten()
    .filter(|part| !part.is_empty())
    .collect();

    if parts.is_empty() {
        return file_name(path);
    }
    let suffix = if ext.is_empty() {
        String::new()
    } else {
        format!(".{}", ext.to_ascii_lowercase())
    };
    format!("{}{suffix}", parts.join("-"))
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{parse_tags, sanitize_filename, suggested_name};

    #[test]
    fn sanitize_collapses_and_trims_dashes() {
        assert_eq!(sanitize_filename("  Visual Studio_Code!! "), "visual-studio-code");
        assert_eq!(sanitize_filename("--a -- b--"), "a-b");
        assert_eq!(sanitize_filename("日本"), "");
    }

    #[test]
    fn tags_are_extracted_from_chatty_responses() {
        let tags = parse_tags(
            "Sure! {\"app\": \"Safari\", \"description\": \"Rust docs page\", \"tags\": [\"rust\"]} Hope that helps",
        );
        assert_eq!(tags.app, "Safari");
        assert_eq!(tags.tags, vec!["rust".to_string()]);
        assert_eq!(
            suggested_name(&tags, Path::new("/tmp/Screen Shot.PNG"), "PNG"),
            "safari-rust-docs-page.png"
        );
    }

    #[test]
    fn unparseable_response_becomes_description() {
        let tags = parse_tags("a terminal window");
        assert_eq!(tags.app, "unknown");
        assert_eq!(tags.description, "a terminal window");
        assert_eq!(
            suggested_name(&tags, Path::new("/tmp/shot.png"), "png"),
            "a-terminal-window.png"
        );
    }
}
