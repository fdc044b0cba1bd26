pub mod registry;

pub use registry::ProviderRegistry;

use std::future::Future;
use std::pin::Pin;

use crate::models::CoreError;
use crate::orchestration::ExecutionContext;

pub type ProviderResult<T> = Result<T, CoreError>;

pub type ProviderFuture<'a> = Pin<Box<dyn Future<Output = ProviderResult<CompletionResponse>> + Send + 'a>>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompletionRequest {
    pub model: Option<String>,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageInput {
    pub data: Vec<u8>,
    pub mime_type: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VisionRequest {
    pub completion: CompletionRequest,
    pub images: Vec<ImageInput>,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CompletionResponse {
    pub content: String,
    pub finish_reason: String,
    pub usage: Usage,
}

/// A text (and optionally vision) completion backend.
///
/// Implementations should race their I/O against
/// `context.cancellation()` and report failures with
/// [`CoreErrorKind::Provider`](crate::models::CoreErrorKind::Provider) so the
/// queue treats them as transient.
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    fn supports_vision(&self) -> bool;

    fn complete<'a>(
        &'a self,
        context: &'a ExecutionContext,
        request: CompletionRequest,
    ) -> ProviderFuture<'a>;

    fn complete_with_vision<'a>(
        &'a self,
        context: &'a ExecutionContext,
        request: VisionRequest,
    ) -> ProviderFuture<'a>;
}
