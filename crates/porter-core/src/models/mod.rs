pub mod error;
pub mod operation;
pub mod pipeline;
pub mod task;
pub mod wire;

pub use error::{CoreError, CoreErrorKind};
pub use operation::{NewOperation, Operation, OperationType};
pub use pipeline::{
    AutoFileOutcome, Classification, PathPayload, PipelineStep, RenameSuggestion,
    ScreenshotOutcome, ScreenshotTags, StepStatus,
};
pub use task::{CANCELLED_BY_USER, NewTask, Task, TaskId, TaskStatus, TaskType};
