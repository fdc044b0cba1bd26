use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::models::{CoreError, TaskId, TaskType};

/// Per-invocation context handed to every task handler.
///
/// Carries the identity of the task being executed so that handlers which
/// mutate the filesystem can attribute ledger rows to it, plus the deadline
/// and cancellation signal they are expected to honour cooperatively.
#[derive(Clone, Debug)]
pub struct ExecutionContext {
    pub task_id: Option<TaskId>,
    pub task_type: Option<TaskType>,
    pub attempt: u32,
    pub deadline: Option<Instant>,
    cancellation: CancellationToken,
}

impl ExecutionContext {
    pub fn for_task(
        task_id: TaskId,
        task_type: TaskType,
        attempt: u32,
        timeout: Duration,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            task_id: Some(task_id),
            task_type: Some(task_type),
            attempt,
            deadline: Some(Instant::now() + timeout),
            cancellation,
        }
    }

    /// A context with no task identity, used when a capability runs outside
    /// the queue (for instance from a test or an ad hoc call).
    pub fn detached() -> Self {
        Self::with_cancellation(CancellationToken::new())
    }

    pub fn with_cancellation(cancellation: CancellationToken) -> Self {
        Self {
            task_id: None,
            task_type: None,
            attempt: 1,
            deadline: None,
            cancellation,
        }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Sleeps for `duration` unless the context is cancelled first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), CoreError> {
        if self.is_cancelled() {
            return Err(CoreError::cancelled());
        }
        tokio::select! {
            _ = self.cancellation.cancelled() => Err(CoreError::cancelled()),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}
