use thiserror::Error;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CoreErrorKind {
    InvalidInput,
    ParseFailure,
    NotFound,
    Timeout,
    Cancelled,
    CapacityExceeded,
    Io,
    Provider,
    StorageFailure,
    Internal,
}

impl CoreErrorKind {
    /// Permanent failures are terminal on the first attempt; everything else
    /// is eligible for the queue's retry path.
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::InvalidInput | Self::ParseFailure)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("{kind:?}: {message}")]
pub struct CoreError {
    pub kind: CoreErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(CoreErrorKind::InvalidInput, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(CoreErrorKind::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(CoreErrorKind::Internal, message)
    }

    pub fn io(context: &str, error: std::io::Error) -> Self {
        Self::new(CoreErrorKind::Io, format!("{context}: {error}"))
    }

    pub fn cancelled() -> Self {
        Self::new(CoreErrorKind::Cancelled, "operation cancelled")
    }

    /// Prefixes the message with the name of the step that produced it while
    /// keeping the original kind, so retry classification survives wrapping.
    pub fn context(self, step: &str) -> Self {
        Self {
            kind: self.kind,
            message: format!("{step}: {}", self.message),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(error: serde_json::Error) -> Self {
        Self::new(CoreErrorKind::ParseFailure, error.to_string())
    }
}
