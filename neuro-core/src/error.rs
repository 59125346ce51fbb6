//! Error types shared by every subsystem of the core.

use thiserror::Error;

use crate::task::{TaskId, TaskState};

/// Coarse classification of a [`CoreError`].
///
/// Callers branch on this when deciding whether to retry, abandon or surface a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    NoFreeSlot,
    AlreadyRunning,
    AlreadyTerminal,
    LimitExceeded,
    ModelNotLoaded,
    ModelLoad,
    TokenizeFailed,
    UnsupportedLanguage,
    SpawnFailed,
    OutputTooLarge,
    BufferTooSmall,
    NotCompleted,
    Timeout,
    Io,
    Config,
    Serialization,
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error("task table is full ({capacity} slots)")]
    NoFreeSlot { capacity: usize },

    #[error("task {0} is already running")]
    AlreadyRunning(TaskId),

    #[error("task {id} is already {state}")]
    AlreadyTerminal { id: TaskId, state: TaskState },

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("no model is loaded")]
    ModelNotLoaded,

    #[error("model load failed: {0}")]
    ModelLoad(String),

    #[error("tokenization failed: {0}")]
    TokenizeFailed(String),

    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("failed to spawn process: {0}")]
    SpawnFailed(String),

    #[error("captured output too large: {0}")]
    OutputTooLarge(String),

    #[error("buffer too small: {required} bytes required, {available} available")]
    BufferTooSmall { required: usize, available: usize },

    #[error("task {id} has no result (state: {state})")]
    NotCompleted { id: TaskId, state: TaskState },

    #[error("timed out after {waited_ms}ms")]
    Timeout { waited_ms: u64 },

    #[error("IO error: {0}")]
    Io(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            CoreError::NotFound(_) => ErrorKind::NotFound,
            CoreError::NoFreeSlot { .. } => ErrorKind::NoFreeSlot,
            CoreError::AlreadyRunning(_) => ErrorKind::AlreadyRunning,
            CoreError::AlreadyTerminal { .. } => ErrorKind::AlreadyTerminal,
            CoreError::LimitExceeded(_) => ErrorKind::LimitExceeded,
            CoreError::ModelNotLoaded => ErrorKind::ModelNotLoaded,
            CoreError::ModelLoad(_) => ErrorKind::ModelLoad,
            CoreError::TokenizeFailed(_) => ErrorKind::TokenizeFailed,
            CoreError::UnsupportedLanguage(_) => ErrorKind::UnsupportedLanguage,
            CoreError::SpawnFailed(_) => ErrorKind::SpawnFailed,
            CoreError::OutputTooLarge(_) => ErrorKind::OutputTooLarge,
            CoreError::BufferTooSmall { .. } => ErrorKind::BufferTooSmall,
            CoreError::NotCompleted { .. } => ErrorKind::NotCompleted,
            CoreError::Timeout { .. } => ErrorKind::Timeout,
            CoreError::Io(_) => ErrorKind::Io,
            CoreError::Config(_) => ErrorKind::Config,
            CoreError::Serialization(_) => ErrorKind::Serialization,
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for CoreError {
    fn from(e: toml::de::Error) -> Self {
        CoreError::Config(e.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        let err = CoreError::BufferTooSmall {
            required: 10,
            available: 4,
        };
        assert_eq!(err.kind(), ErrorKind::BufferTooSmall);
        assert!(err.to_string().contains("10 bytes required"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: CoreError = io.into();
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
