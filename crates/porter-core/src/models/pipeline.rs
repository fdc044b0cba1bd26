use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Ok,
    Error,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PipelineStep {
    pub name: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl PipelineStep {
    pub fn ok(name: &str, detail: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            status: StepStatus::Ok,
            detail,
        }
    }

    pub fn error(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: StepStatus::Error,
            detail: Some(detail.into()),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct AutoFileOutcome {
    pub original_path: PathBuf,
    pub final_path: PathBuf,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_name: Option<String>,
    pub steps: Vec<PipelineStep>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotOutcome {
    pub original_path: PathBuf,
    pub final_path: PathBuf,
    pub app: String,
    pub description: String,
    pub tags: Vec<String>,
    pub steps: Vec<PipelineStep>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PathPayload {
    pub path: PathBuf,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: String,
    pub destination: PathBuf,
    pub confidence: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RenameSuggestion {
    pub original_name: String,
    pub new_name: String,
    pub reason: String,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotTags {
    #[serde(default)]
    pub app: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub suggested_name: String,
}
