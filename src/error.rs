//! Error types for the document client.

use thiserror::Error;

/// Main error type for client operations.
///
/// Cloneable so a single failure can be fanned out to every consumer of a
/// snapshot stream.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Remote operation failed ({code}): {message}")]
    RemoteOperation { code: String, message: String },

    #[error("Malformed reply: {0}")]
    MalformedReply(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Database instance has been shut down")]
    Shutdown,

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ClientError {
    /// Shorthand for a service rejection.
    pub fn remote(code: impl Into<String>, message: impl Into<String>) -> Self {
        ClientError::RemoteOperation {
            code: code.into(),
            message: message.into(),
        }
    }

    /// True for failures of the channel itself rather than of the request.
    pub fn is_transport(&self) -> bool {
        matches!(self, ClientError::Transport(_))
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for ClientError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        ClientError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for ClientError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        ClientError::MalformedReply(e.to_string())
    }
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::Transport(e.to_string())
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
