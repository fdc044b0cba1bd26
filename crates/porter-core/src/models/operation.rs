use std::path::PathBuf;
use std::str::FromStr;
use std::time::SystemTime;

use serde::Serialize;

use crate::models::{TaskId, wire};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Move,
    Rename,
}

impl OperationType {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationType::Move => "move",
            OperationType::Rename => "rename",
        }
    }
}

impl FromStr for OperationType {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "move" => Ok(OperationType::Move),
            "rename" => Ok(OperationType::Rename),
            _ => Err(format!("unknown operation type '{raw}'")),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NewOperation {
    pub task_id: TaskId,
    pub operation_type: OperationType,
    pub original_path: PathBuf,
    pub new_path: PathBuf,
    pub created_at: SystemTime,
}

impl NewOperation {
    pub fn new(
        task_id: TaskId,
        operation_type: OperationType,
        original_path: impl Into<PathBuf>,
        new_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            task_id,
            operation_type,
            original_path: original_path.into(),
            new_path: new_path.into(),
            created_at: SystemTime::now(),
        }
    }
}

/// One reversible filesystem mutation. Rows are written once and only ever
/// deleted (by undo or retention cleanup).
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Operation {
    pub id: u64,
    pub task_id: TaskId,
    #[serde(rename = "type")]
    pub operation_type: OperationType,
    pub original_path: PathBuf,
    pub new_path: PathBuf,
    #[serde(serialize_with = "wire::timestamp")]
    pub created_at: SystemTime,
}
