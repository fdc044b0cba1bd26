use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::models::wire;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl Display for TaskId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TaskType {
    FileClassify,
    FileRename,
    ScreenshotTag,
    PipelineAutoFile,
    PipelineScreenshot,
}

impl TaskType {
    pub const ALL: [TaskType; 5] = [
        TaskType::FileClassify,
        TaskType::FileRename,
        TaskType::ScreenshotTag,
        TaskType::PipelineAutoFile,
        TaskType::PipelineScreenshot,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::FileClassify => "file.classify",
            TaskType::FileRename => "file.rename",
            TaskType::ScreenshotTag => "screenshot.tag",
            TaskType::PipelineAutoFile => "pipeline.auto_file",
            TaskType::PipelineScreenshot => "pipeline.screenshot",
        }
    }

    pub fn is_pipeline(self) -> bool {
        matches!(
            self,
            TaskType::PipelineAutoFile | TaskType::PipelineScreenshot
        )
    }
}

impl Display for TaskType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        TaskType::ALL
            .into_iter()
            .find(|task_type| task_type.as_str() == raw)
            .ok_or_else(|| format!("unknown task type '{raw}'"))
    }
}

impl Serialize for TaskType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            _ => Err(format!("unknown task status '{raw}'")),
        }
    }
}

/// Sentinel error stored on tasks forced to failed by `cancel_task`.
pub const CANCELLED_BY_USER: &str = "cancelled by user";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NewTask {
    pub task_type: TaskType,
    pub priority: i32,
    pub payload: Vec<u8>,
    pub max_retries: u32,
    pub created_at: SystemTime,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Task {
    pub id: TaskId,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub priority: i32,
    #[serde(serialize_with = "wire::opaque_bytes")]
    pub payload: Vec<u8>,
    pub status: TaskStatus,
    #[serde(
        serialize_with = "wire::optional_opaque_bytes",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(serialize_with = "wire::timestamp")]
    pub created_at: SystemTime,
    #[serde(
        serialize_with = "wire::optional_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub started_at: Option<SystemTime>,
    #[serde(
        serialize_with = "wire::optional_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub finished_at: Option<SystemTime>,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl Task {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
