use std::future::Future;
use std::pin::Pin;

use crate::models::CoreError;
use crate::orchestration::ExecutionContext;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Vec<u8>, CoreError>> + Send>>;

/// Executes one task type. Handlers own their payload and must tolerate being
/// invoked more than once for the same task.
pub trait TaskHandler: Send + Sync {
    fn handle(&self, context: ExecutionContext, payload: Vec<u8>) -> HandlerFuture;
}

impl<F, Fut> TaskHandler for F
where
    F: Fn(ExecutionContext, Vec<u8>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<u8>, CoreError>> + Send + 'static,
{
    fn handle(&self, context: ExecutionContext, payload: Vec<u8>) -> HandlerFuture {
        Box::pin(self(context, payload))
    }
}
