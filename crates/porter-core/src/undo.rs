use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::fileops;
use crate::models::{CoreError, NewOperation, Operation, OperationType, TaskId};
use crate::persistence::{OperationStore, PersistenceResult};

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Durable log of reversible filesystem mutations, keyed by task id.
#[derive(Clone)]
pub struct UndoLedger {
    store: Arc<dyn OperationStore>,
    retention: Duration,
}

impl UndoLedger {
    pub fn new(store: Arc<dyn OperationStore>) -> Self {
        Self::with_retention(store, DEFAULT_RETENTION)
    }

    pub fn with_retention(store: Arc<dyn OperationStore>, retention: Duration) -> Self {
        Self { store, retention }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub async fn record(&self, operation: NewOperation) -> Result<Operation, CoreError> {
        let recorded = self
            .blocking(move |store| store.insert_operation(&operation))
            .await?;
        tracing::debug!(
            task_id = recorded.task_id.0,
            operation_type = recorded.operation_type.as_str(),
            original_path = %recorded.original_path.display(),
            new_path = %recorded.new_path.display(),
            "recorded file operation"
        );
        Ok(recorded)
    }

    /// Runs `mutation` on `source` and ledgers its result under `task_id` in
    /// one blocking unit. Dropping the returned future cannot separate the
    /// two: once started, the mutation and its row both land.
    ///
    /// The outer error is a ledger failure after a successful mutation; the
    /// inner one is the mutation's own failure, with nothing recorded.
    pub async fn mutate_and_record<F>(
        &self,
        task_id: Option<TaskId>,
        operation_type: OperationType,
        source: PathBuf,
        mutation: F,
    ) -> Result<Result<PathBuf, CoreError>, CoreError>
    where
        F: FnOnce(&Path) -> Result<PathBuf, CoreError> + Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || -> Result<Result<PathBuf, CoreError>, CoreError> {
            let actual = match mutation(&source) {
                Ok(actual) => actual,
                Err(error) => return Ok(Err(error)),
            };
            if let Some(task_id) = task_id {
                let recorded = store.insert_operation(&NewOperation::new(
                    task_id,
                    operation_type,
                    source.clone(),
                    actual.clone(),
                ))?;
                tracing::debug!(
                    task_id = task_id.0,
                    operation_id = recorded.id,
                    operation_type = operation_type.as_str(),
                    original_path = %source.display(),
                    new_path = %actual.display(),
                    "recorded file operation"
                );
            }
            Ok(Ok(actual))
        })
        .await
        .map_err(join_failure)?
    }

    /// Moves every ledgered file of `task_id` back, newest first, and purges
    /// the task's rows. Rows are purged even when a move-back fails; the
    /// failure is returned after the purge.
    pub async fn undo(&self, task_id: TaskId) -> Result<usize, CoreError> {
        let store = self.store.clone();
        let (undone, failure) = tokio::task::spawn_blocking(move || {
            let operations = store.list_operations_for_task(task_id)?;
            let mut undone = 0;
            let mut failure = None;

            for operation in &operations {
                if fs::symlink_metadata(&operation.new_path).is_err() {
                    continue;
                }
                if let Err(error) = move_back(operation) {
                    failure = Some(error);
                    break;
                }
                undone += 1;
            }

            store.delete_operations_for_task(task_id)?;
            Ok::<_, CoreError>((undone, failure))
        })
        .await
        .map_err(join_failure)??;

        if let Some(error) = failure {
            tracing::warn!(
                task_id = task_id.0,
                undone,
                kind = ?error.kind,
                error = %error.message,
                "undo aborted"
            );
            return Err(error);
        }
        tracing::info!(task_id = task_id.0, undone, "undo completed");
        Ok(undone)
    }

    pub async fn list_by_task(&self, task_id: TaskId) -> Result<Vec<Operation>, CoreError> {
        self.blocking(move |store| store.list_operations_for_task(task_id))
            .await
    }

    /// Deletes rows older than the retention window.
    pub async fn cleanup(&self) -> Result<usize, CoreError> {
        let cutoff = SystemTime::now()
            .checked_sub(self.retention)
            .unwrap_or(UNIX_EPOCH);
        let removed = self
            .blocking(move |store| store.delete_operations_before(cutoff))
            .await?;
        if removed > 0 {
            tracing::debug!(removed, "pruned expired undo ledger rows");
        }
        Ok(removed)
    }

    async fn blocking<T, F>(&self, operation: F) -> Result<T, CoreError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn OperationStore) -> PersistenceResult<T> + Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || operation(store.as_ref()))
            .await
            .map_err(join_failure)?
    }
}

/// Restores a file next to anything that has since taken its original name,
/// never over it.
fn move_back(operation: &Operation) -> Result<PathBuf, CoreError> {
    if let Some(parent) = operation
        .original_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
    {
        fs::create_dir_all(parent).map_err(|error| {
            CoreError::io(
                &format!("create directory for undo '{}'", parent.display()),
                error,
            )
        })?;
    }
    let target = fileops::resolve_conflict(&operation.original_path)?;
    fileops::relocate(&operation.new_path, &target).map_err(|error| {
        CoreError::io(
            &format!(
                "undo move '{}' -> '{}'",
                operation.new_path.display(),
                target.display()
            ),
            error,
        )
    })?;
    if target != operation.original_path {
        tracing::warn!(
            original_path = %operation.original_path.display(),
            restored_path = %target.display(),
            "original path is occupied; restored alongside it"
        );
    }
    Ok(target)
}

fn join_failure(error: tokio::task::JoinError) -> CoreError {
    CoreError::internal(format!("undo ledger join failure: {error}"))
}
