use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use serde::Deserialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::capabilities::path_payload;
use crate::config::DaemonConfig;
use crate::fileops;
use crate::logging::{RecentLogs, parse_level};
use crate::models::wire::format_rfc3339;
use crate::models::{OperationType, Task, TaskId, TaskStatus, TaskType};
use crate::orchestration::TaskQueue;
use crate::rpc::{METHOD_NOT_FOUND, MethodError, MethodResult, parse_params};
use crate::sqlite::SqliteStore;
use crate::undo::UndoLedger;

pub const HISTORY_DEFAULT_LIMIT: usize = 50;
pub const QUEUE_VIEW_LIMIT: usize = 100;
pub const PIPELINE_STATUS_WINDOW: usize = 200;
pub const PIPELINE_STATUS_RECENT: usize = 10;
pub const LOGS_DEFAULT_LIMIT: usize = 100;
const PIPELINE_PRIORITY: i32 = 1;
const CAPABILITY_PRIORITY: i32 = 0;

/// The method set served by the control plane.
#[derive(Clone)]
pub struct ControlMethods {
    queue: TaskQueue,
    ledger: UndoLedger,
    store: Arc<SqliteStore>,
    config: Arc<DaemonConfig>,
    recent_logs: RecentLogs,
    started_at: SystemTime,
    started: Instant,
    wait_timeout: Option<Duration>,
}

#[derive(Deserialize)]
struct PathParams {
    path: PathBuf,
}

#[derive(Deserialize)]
struct TaskIdParams {
    id: u64,
}

#[derive(Deserialize)]
struct UndoParams {
    task_id: u64,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct HistoryParams {
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct MoveParams {
    source: PathBuf,
    destination: PathBuf,
    #[serde(default)]
    task_id: Option<u64>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct LogsParams {
    limit: Option<usize>,
    level: Option<String>,
}

impl ControlMethods {
    pub fn new(
        queue: TaskQueue,
        ledger: UndoLedger,
        store: Arc<SqliteStore>,
        config: Arc<DaemonConfig>,
        recent_logs: RecentLogs,
    ) -> Self {
        Self {
            queue,
            ledger,
            store,
            config,
            recent_logs,
            started_at: SystemTime::now(),
            started: Instant::now(),
            wait_timeout: None,
        }
    }

    /// Bounds how long `pipeline.*` and capability methods wait for their
    /// task. Unbounded by default; the queue's own timeout and retry limits
    /// still apply.
    pub fn with_wait_timeout(mut self, wait_timeout: Option<Duration>) -> Self {
        self.wait_timeout = wait_timeout;
        self
    }

    pub async fn dispatch(
        &self,
        method: &str,
        params: Option<Value>,
        cancellation: &CancellationToken,
    ) -> MethodResult {
        match method {
            "task.queue" => self.task_list(QUEUE_VIEW_LIMIT).await,
            "task.history" => {
                let params: HistoryParams = parse_params(params)?;
                self.task_list(params.limit.unwrap_or(HISTORY_DEFAULT_LIMIT))
                    .await
            }
            "task.get" => {
                let params: TaskIdParams = parse_params(params)?;
                let task = self.queue.get_task(TaskId(params.id)).await?;
                to_value(&task)
            }
            "task.cancel" => {
                let params: TaskIdParams = parse_params(params)?;
                self.queue.cancel_task(TaskId(params.id)).await?;
                Ok(json!({ "status": "cancelled", "id": params.id }))
            }
            "pipeline.auto_file" => {
                self.run_and_wait(TaskType::PipelineAutoFile, PIPELINE_PRIORITY, params, cancellation)
                    .await
            }
            "pipeline.screenshot" => {
                self.run_and_wait(
                    TaskType::PipelineScreenshot,
                    PIPELINE_PRIORITY,
                    params,
                    cancellation,
                )
                .await
            }
            "pipeline.status" => self.pipeline_status().await,
            "file.classify" => {
                self.run_and_wait(TaskType::FileClassify, CAPABILITY_PRIORITY, params, cancellation)
                    .await
            }
            "file.rename" => {
                self.run_and_wait(TaskType::FileRename, CAPABILITY_PRIORITY, params, cancellation)
                    .await
            }
            "screenshot.tag" => {
                self.run_and_wait(TaskType::ScreenshotTag, CAPABILITY_PRIORITY, params, cancellation)
                    .await
            }
            "file.move" => self.file_move(parse_params(params)?).await,
            "undo" => {
                let params: UndoParams = parse_params(params)?;
                let undone = self.ledger.undo(TaskId(params.task_id)).await?;
                Ok(json!({ "undone": undone, "task_id": params.task_id }))
            }
            "undo.list" => {
                let params: UndoParams = parse_params(params)?;
                let operations = self.ledger.list_by_task(TaskId(params.task_id)).await?;
                to_value(&operations)
            }
            "status.get" => Ok(self.status()),
            "status.health" => self.health().await,
            "config.get" => to_value(self.config.as_ref()),
            "logs.get" => {
                let params: LogsParams = parse_params(params)?;
                self.logs(params)
            }
            _ => Err(MethodError::new(METHOD_NOT_FOUND, "method not found").with_data(json!(method))),
        }
    }

    async fn task_list(&self, limit: usize) -> MethodResult {
        let tasks = self.queue.list_tasks(limit).await?;
        to_value(&tasks)
    }

    async fn run_and_wait(
        &self,
        task_type: TaskType,
        priority: i32,
        params: Option<Value>,
        cancellation: &CancellationToken,
    ) -> MethodResult {
        let params: PathParams = parse_params(params)?;
        if params.path.as_os_str().is_empty() {
            return Err(MethodError::invalid_params("path is required"));
        }
        let payload = path_payload(&params.path)?;
        let task = self
            .queue
            .enqueue_and_wait(cancellation, self.wait_timeout, task_type, payload, priority)
            .await?;

        match task.status {
            TaskStatus::Completed => Ok(decode_result(&task)),
            _ => Err(MethodError::internal(format!(
                "task failed: {}",
                task.error.as_deref().unwrap_or("unknown error")
            ))
            .with_data(json!({ "task_id": task.id.0 }))),
        }
    }

    async fn pipeline_status(&self) -> MethodResult {
        let tasks = self.queue.list_tasks(PIPELINE_STATUS_WINDOW).await?;
        let pipeline_tasks: Vec<&Task> = tasks
            .iter()
            .filter(|task| task.task_type.is_pipeline())
            .collect();

        let count = |status: TaskStatus| {
            pipeline_tasks
                .iter()
                .filter(|task| task.status == status)
                .count()
        };
        let recent: Vec<&Task> = pipeline_tasks
            .iter()
            .copied()
            .take(PIPELINE_STATUS_RECENT)
            .collect();

        Ok(json!({
            "counts": {
                "pending": count(TaskStatus::Pending),
                "running": count(TaskStatus::Running),
                "completed": count(TaskStatus::Completed),
                "failed": count(TaskStatus::Failed),
            },
            "total": pipeline_tasks.len(),
            "recent": to_value(&recent)?,
        }))
    }

    async fn file_move(&self, params: MoveParams) -> MethodResult {
        if params.source.as_os_str().is_empty() || params.destination.as_os_str().is_empty() {
            return Err(MethodError::invalid_params(
                "source and destination are required",
            ));
        }
        let destination = params.destination;
        let actual = self
            .ledger
            .mutate_and_record(
                params.task_id.map(TaskId),
                OperationType::Move,
                params.source,
                move |source| fileops::move_file(source, &destination),
            )
            .await??;
        Ok(json!({ "destination": actual }))
    }

    fn status(&self) -> Value {
        json!({
            "running": true,
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_seconds": self.started.elapsed().as_secs(),
            "started_at": format_rfc3339(self.started_at),
            "pid": std::process::id(),
        })
    }

    async fn health(&self) -> MethodResult {
        let store = self.store.clone();
        let store_check = match tokio::task::spawn_blocking(move || store.ping()).await {
            Ok(Ok(())) => "ok".to_string(),
            Ok(Err(error)) => format!("error: {}", error.message),
            Err(error) => format!("error: {error}"),
        };
        let status = if store_check == "ok" {
            "healthy"
        } else {
            "degraded"
        };
        Ok(json!({
            "status": status,
            "checks": {
                "daemon": "ok",
                "store": store_check,
            },
        }))
    }

    fn logs(&self, params: LogsParams) -> MethodResult {
        let level = match params.level.as_deref().filter(|level| !level.is_empty()) {
            Some(raw) => Some(
                parse_level(raw)
                    .ok_or_else(|| MethodError::invalid_params(format!("unknown log level '{raw}'")))?,
            ),
            None => None,
        };
        let lines = self
            .recent_logs
            .snapshot(params.limit.unwrap_or(LOGS_DEFAULT_LIMIT), level);
        to_value(&lines)
    }
}

fn decode_result(task: &Task) -> Value {
    match task.result.as_deref() {
        None | Some([]) => Value::Null,
        Some(bytes) => serde_json::from_slice(bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned())),
    }
}

fn to_value<T: serde::Serialize + ?Sized>(value: &T) -> MethodResult {
    serde_json::to_value(value)
        .map_err(|error| MethodError::internal(format!("failed to encode result: {error}")))
}
