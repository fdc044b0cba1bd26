//! Fixed multi-step workflows built from the atomic capabilities.
//!
//! Both pipelines thread a single current path through their steps and
//! ledger every filesystem mutation under the executing task before moving
//! on. A re-executed task (retry or crash recovery) reads its own ledger
//! rows first and skips the mutations that already happened.
//!
//! Each mutation and its ledger insert run as one blocking unit, so a timeout
//! or cancellation cannot separate them. A process crash between the two is
//! not recoverable: the re-run sees no row and works from the payload path,
//! which no longer exists, so settle fails.

pub mod auto_file;
pub mod screenshot;
pub mod settle;

pub use settle::{DEFAULT_SETTLE_DELAY_MS, wait_for_settle};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::capabilities::Capabilities;
use crate::config::{AutoFileSection, DaemonConfig, ScreenshotsSection};
use crate::fileops;
use crate::models::{CoreError, OperationType, PipelineStep, TaskType};
use crate::notify::Notifier;
use crate::orchestration::{ExecutionContext, OrchestrationResult, TaskQueue};
use crate::undo::UndoLedger;

pub const NOTIFICATION_TITLE: &str = "Porter";

pub struct PipelineRunner {
    capabilities: Arc<Capabilities>,
    ledger: UndoLedger,
    notifier: Arc<dyn Notifier>,
    auto_file: AutoFileSection,
    screenshots: ScreenshotsSection,
}

impl PipelineRunner {
    pub fn new(
        capabilities: Arc<Capabilities>,
        ledger: UndoLedger,
        notifier: Arc<dyn Notifier>,
        config: &DaemonConfig,
    ) -> Self {
        Self {
            capabilities,
            ledger,
            notifier,
            auto_file: config.auto_file.clone(),
            screenshots: config.screenshots.clone(),
        }
    }

    pub fn register_handlers(self: &Arc<Self>, queue: &TaskQueue) -> OrchestrationResult<()> {
        let runner = self.clone();
        queue.register_handler(
            TaskType::PipelineAutoFile,
            move |context: ExecutionContext, payload: Vec<u8>| {
                let runner = runner.clone();
                async move { runner.run_auto_file(&context, &payload).await }
            },
        )?;

        let runner = self.clone();
        queue.register_handler(
            TaskType::PipelineScreenshot,
            move |context: ExecutionContext, payload: Vec<u8>| {
                let runner = runner.clone();
                async move { runner.run_screenshot(&context, &payload).await }
            },
        )
    }

    async fn resume_state(&self, context: &ExecutionContext) -> Result<ResumeState, CoreError> {
        let Some(task_id) = context.task_id else {
            return Ok(ResumeState::default());
        };
        let operations = self.ledger.list_by_task(task_id).await?;
        let state = ResumeState {
            current_path: operations.first().map(|operation| operation.new_path.clone()),
            moved: operations
                .iter()
                .find(|operation| operation.operation_type == OperationType::Move)
                .map(|operation| operation.new_path.clone()),
            renamed: operations
                .iter()
                .find(|operation| operation.operation_type == OperationType::Rename)
                .map(|operation| operation.new_path.clone()),
        };
        if let Some(current) = &state.current_path {
            tracing::info!(
                task_id = task_id.0,
                attempt = context.attempt,
                current_path = %current.display(),
                "resuming pipeline from ledgered steps"
            );
        }
        Ok(state)
    }

    /// Runs the move and ledgers it as one unit. Mutation failures become
    /// non-fatal `error` steps; a ledger failure is fatal.
    async fn tracked_move(
        &self,
        context: &ExecutionContext,
        current: &mut PathBuf,
        destination: PathBuf,
        steps: &mut Vec<PipelineStep>,
    ) -> Result<(), CoreError> {
        let moved = self
            .ledger
            .mutate_and_record(
                context.task_id,
                OperationType::Move,
                current.clone(),
                move |source| fileops::move_file(source, &destination),
            )
            .await
            .map_err(|error| error.context("move"))?;
        match moved {
            Ok(actual) => {
                steps.push(PipelineStep::ok("move", Some(actual.display().to_string())));
                *current = actual;
            }
            Err(error) => steps.push(PipelineStep::error("move", error.message)),
        }
        Ok(())
    }

    async fn tracked_rename(
        &self,
        context: &ExecutionContext,
        current: &mut PathBuf,
        new_name: String,
        steps: &mut Vec<PipelineStep>,
    ) -> Result<bool, CoreError> {
        let name = new_name.clone();
        let renamed = self
            .ledger
            .mutate_and_record(
                context.task_id,
                OperationType::Rename,
                current.clone(),
                move |source| fileops::rename_file(source, &name),
            )
            .await
            .map_err(|error| error.context("rename"))?;
        match renamed {
            Ok(actual) => {
                steps.push(PipelineStep::ok("rename", Some(new_name)));
                *current = actual;
                Ok(true)
            }
            Err(error) => {
                steps.push(PipelineStep::error("rename", error.message));
                Ok(false)
            }
        }
    }

    fn notify(&self, subtitle: &str, message: &str) {
        if let Err(error) = self
            .notifier
            .send_with_subtitle(NOTIFICATION_TITLE, subtitle, message)
        {
            tracing::debug!(error = %error.message, "notification failed");
        }
    }
}

#[derive(Debug, Default)]
struct ResumeState {
    current_path: Option<PathBuf>,
    moved: Option<PathBuf>,
    renamed: Option<PathBuf>,
}

fn resumed_step(name: &str, path: &Path) -> PipelineStep {
    PipelineStep::ok(name, Some(format!("{} (resumed)", path.display())))
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
