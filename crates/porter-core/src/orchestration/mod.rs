pub mod context;
pub mod dispatch;
pub mod handler;
pub mod task_queue;

pub use context::ExecutionContext;
pub use dispatch::{DispatchBuffer, DispatchEntry, PushError};
pub use handler::{HandlerFuture, TaskHandler};
pub use task_queue::{DEFAULT_LIST_LIMIT, QUEUE_FULL_MESSAGE, QueueConfig, TaskQueue};

use crate::models::CoreError;

pub type OrchestrationResult<T> = Result<T, CoreError>;
