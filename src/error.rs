//! Error types for the chat client.

use thiserror::Error;

/// Every failure a chat operation can report.
///
/// A malformed stream line is a `Protocol` error that the decoder logs and
/// skips. `Protocol` also covers a conversation payload without an id. Everything else is surfaced to the user once and aborts the
/// operation that raised it, leaving the client usable for the next one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// Network or HTTP failure before (or instead of) a structured response
    #[error("Transport error: {0}")]
    Transport(String),

    /// A single stream line that could not be decoded
    #[error("Malformed stream event: {0}")]
    Protocol(String),

    /// An in-band `error` event or an error field in a JSON response
    #[error("{0}")]
    ServerReported(String),

    /// A stream was begun while another one is still active
    #[error("A response is already streaming")]
    Concurrency,

    /// An exchange was requested while the controller is not idle
    #[error("Please wait for the current reply to finish")]
    Busy,

    /// The referenced conversation does not exist remotely
    #[error("Conversation not found: '{0}'")]
    NotFound(String),

    #[error("Message cannot be empty")]
    EmptyMessage,

    #[error("Unsupported file type: {0}")]
    UnsupportedFile(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl ChatError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    /// Whether retrying the same call could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Busy | Self::Concurrency)
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<std::io::Error> for ChatError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
