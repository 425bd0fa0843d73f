//! Error types for chat requests.

use thiserror::Error;

/// Errors that can occur while talking to an inference server.
#[derive(Debug, Error)]
pub enum ChatError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Server answered with a non-200 status.
    #[error("server error {status}: {body}")]
    Status { status: u16, body: String },

    /// Server is not running or not reachable.
    #[error("server not reachable at {0}")]
    ServerNotRunning(String),

    /// The response body failed mid-stream.
    #[error("failed to read stream: {0}")]
    Stream(String),
}
