use std::path::Path;

use crate::capabilities::{Capabilities, content_preview, extension, file_name};
use crate::models::{Classification, CoreError};
use crate::orchestration::ExecutionContext;
use crate::provider::{CompletionRequest, Message};

const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "csv", "json", "xml", "html", "log", "pdf"];

const SYSTEM_PROMPT: &str = "You are a file classification assistant. \
    Return only the exact category name from the provided list.";

impl Capabilities {
    /// Extension rules first; the text provider only when no rule matches
    /// and LLM classification is enabled.
    pub async fn classify(
        &self,
        context: &ExecutionContext,
        path: &Path,
    ) -> Result<Classification, CoreError> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|error| CoreError::io("stat file", error))?;
        let name = file_name(path);
        let ext = extension(path);

        if let Some(category) = self
            .auto_file
            .categories
            .iter()
            .find(|category| !ext.is_empty() && category.matches_extension(&ext))
        {
            tracing::info!(file = %name, category = %category.name, "classified by extension");
            return Ok(Classification {
                category: category.name.clone(),
                destination: category.path.join(&name),
                confidence: "high".to_string(),
            });
        }

        if !self.auto_file.use_llm_classification {
            return Ok(Classification {
                category: "unknown".to_string(),
                destination: self.auto_file.destination_root.join(&name),
                confidence: "none".to_string(),
            });
        }

        let preview = if TEXT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
            content_preview(path, metadata.len()).await
        } else {
            String::new()
        };
        let categories = self
            .auto_file
            .categories
            .iter()
            .map(|category| match &category.description {
                Some(description) => format!("- {}: {description}", category.name),
                None if !category.extensions.is_empty() => {
                    format!("- {} ({})", category.name, category.extensions.join(", "))
                }
                None => format!("- {}", category.name),
            })
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Classify this file into one of the available categories.\n\n\
             File: {name}\nExtension: {ext}\nSize: {} bytes\nContent preview: {preview}\n\n\
             Available categories:\n{categories}\n\n\
             Return ONLY the category name, nothing else.",
            metadata.len()
        );

        tracing::info!(file = %name, "classifying file via provider");
        let provider = self.providers.text_provider()?;
        let response = provider
            .complete(
                context,
                CompletionRequest {
                    model: None,
                    messages: vec![Message::system(SYSTEM_PROMPT), Message::user(prompt)],
                    temperature: 0.1,
                    max_tokens: 32,
                },
            )
            .await?;

        let category = response.content.trim().to_lowercase();
        let classification = match self
            .auto_file
            .categories
            .iter()
            .find(|candidate| candidate.name.eq_ignore_ascii_case(&category))
        {
            Some(matched) => Classification {
                category,
                destination: matched.path.join(&name),
                confidence: "high".to_string(),
            },
            None => Classification {
                category,
                destination: self.auto_file.destination_root.join(&name),
                confidence: "medium".to_string(),
            },
        };
        tracing::info!(
            file = %name,
            category = %classification.category,
            confidence = %classification.confidence,
            "classified by provider"
        );
        Ok(classification)
    }
}
