//! Error types for server supervision.

use thiserror::Error;

/// Errors returned synchronously by [`crate::ServerManager`] operations.
///
/// Asynchronous failures (a server crashing, an output read failing) are
/// never returned here; they surface as [`crate::ServerUpdate`] events or
/// as lines in the instance's log buffer.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Another registered instance already holds the port.
    #[error("port {0} already in use")]
    PortInUse(u16),

    /// No instance is registered on the port.
    #[error("no server on port {0}")]
    NoServer(u16),

    /// The server binary could not be spawned.
    #[error("failed to start server: {0}")]
    Spawn(String),

    /// The pseudo-terminal could not be opened or cloned.
    #[error("pseudo-terminal error: {0}")]
    Pty(String),
}
