use std::time::{Duration, SystemTime};

use crate::models::{CoreError, NewOperation, NewTask, Operation, Task, TaskId};

pub type PersistenceResult<T> = Result<T, CoreError>;

pub trait MigrationStore: Send + Sync {
    fn current_version(&self) -> PersistenceResult<i64>;

    fn apply_migration(&self, target_version: i64) -> PersistenceResult<()>;
}

/// Durable task history. Every status transition is a guarded update that
/// reports whether the row was in a state allowing it; callers treat `false`
/// as "someone else already moved this task on".
pub trait TaskStore: Send + Sync {
    fn create_task(&self, task: &NewTask) -> PersistenceResult<Task>;

    fn get_task(&self, task_id: TaskId) -> PersistenceResult<Option<Task>>;

    fn list_recent_tasks(&self, limit: usize) -> PersistenceResult<Vec<Task>>;

    /// Pending and running rows, priority DESC then creation ASC.
    fn list_unfinished_tasks(&self) -> PersistenceResult<Vec<Task>>;

    /// Resets rows left `running` by a previous process back to `pending`.
    fn requeue_interrupted_tasks(&self) -> PersistenceResult<usize>;

    fn mark_task_running(&self, task_id: TaskId, started_at: SystemTime)
    -> PersistenceResult<bool>;

    fn mark_task_completed(
        &self,
        task_id: TaskId,
        result: &[u8],
        finished_at: SystemTime,
    ) -> PersistenceResult<bool>;

    fn mark_task_retrying(&self, task_id: TaskId, retry_count: u32) -> PersistenceResult<bool>;

    /// Fails a pending or running task.
    fn mark_task_failed(
        &self,
        task_id: TaskId,
        error: &str,
        finished_at: SystemTime,
    ) -> PersistenceResult<bool>;

    fn prune_finished_tasks(&self, max_age: Duration) -> PersistenceResult<usize>;
}

/// Append-only storage for the undo ledger.
pub trait OperationStore: Send + Sync {
    fn insert_operation(&self, operation: &NewOperation) -> PersistenceResult<Operation>;

    /// Most recent first.
    fn list_operations_for_task(&self, task_id: TaskId) -> PersistenceResult<Vec<Operation>>;

    fn delete_operations_for_task(&self, task_id: TaskId) -> PersistenceResult<usize>;

    fn delete_operations_before(&self, cutoff: SystemTime) -> PersistenceResult<usize>;
}
