use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error surface of the engine and registry.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid engine state: expected {expected}, actual {actual}")]
    InvalidState { expected: &'static str, actual: String },
    #[error("no reaction provider registered for kind '{0}'")]
    UnknownReactionKind(String),
    #[error("invalid reaction config: {}", .0.join("; "))]
    InvalidReactionConfig(Vec<String>),
    #[error("reaction '{0}' not found")]
    ReactionNotFound(String),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Reaction(#[from] ReactionError),
}

/// Terminal failures carried in a source's change stream.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source connect failed: {0}")]
    Connect(String),
    #[error("source stream failed: {0}")]
    Stream(String),
    #[error("source is stopped")]
    Stopped,
    #[error("{0}")]
    Other(String),
}

/// Classification of a reaction failure; retry eligibility is decided by
/// membership in the config's retryable set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Io,
    Timeout,
    Serialization,
    Config,
    InvalidState,
    Other,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Io => "IO",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Serialization => "SERIALIZATION",
            ErrorKind::Config => "CONFIG",
            ErrorKind::InvalidState => "INVALID_STATE",
            ErrorKind::Other => "OTHER",
        };
        f.write_str(s)
    }
}

/// Failure in a reaction's side effect, transient or terminal.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct ReactionError {
    pub kind: ErrorKind,
    pub message: String,
    #[source]
    pub cause: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl ReactionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), cause: None }
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn io(message: impl Into<String>) -> Self { Self::new(ErrorKind::Io, message) }

    pub fn timeout(message: impl Into<String>) -> Self { Self::new(ErrorKind::Timeout, message) }

    pub fn serialization(message: impl Into<String>) -> Self { Self::new(ErrorKind::Serialization, message) }

    pub fn config(message: impl Into<String>) -> Self { Self::new(ErrorKind::Config, message) }

    pub fn invalid_state(message: impl Into<String>) -> Self { Self::new(ErrorKind::InvalidState, message) }

    pub fn other(message: impl Into<String>) -> Self { Self::new(ErrorKind::Other, message) }

    pub fn is_retryable(&self, retryable: &[ErrorKind]) -> bool { retryable.contains(&self.kind) }
}
