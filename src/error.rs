//! Crate-wide error type for the dispatcher.

use thiserror::Error;

use crate::task::TaskId;

/// Result type for dispatcher operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Errors that can occur in the dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Constructing an outbound request to a peer failed (bad URL).
    #[error("failed to build request for peer {addr}: {source}")]
    RequestBuild {
        addr: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The outbound HTTP call itself failed (transport error).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The in-flight request was aborted via its cancel token.
    #[error("request was cancelled")]
    Cancelled,

    /// No task with this id is registered.
    #[error("unknown task: {0}")]
    TaskNotFound(TaskId),

    /// A `mode` string at ingress did not match a known execution mode.
    #[error("invalid mode: {0:?}")]
    InvalidMode(String),

    /// `client_id` at ingress did not parse as a non-negative integer.
    #[error("invalid client_id: {0:?}")]
    InvalidClientId(String),

    /// A required query parameter was missing.
    #[error("missing required query parameter: {0}")]
    MissingParam(&'static str),
}
