//! Manager configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::output::DEFAULT_LOG_LINES;

/// Name of the server binary looked up on `PATH`.
pub const SERVER_BINARY: &str = "mlx-openai-server";

/// Default depth of the shared update channel.
pub const DEFAULT_UPDATE_CAPACITY: usize = 100;

/// Configuration for a [`crate::ServerManager`].
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Program spawned for every server.
    pub binary: PathBuf,
    /// Lines kept per instance log buffer.
    pub log_lines: usize,
    /// Capacity of the shared update channel. Producers block when it is full.
    pub update_capacity: usize,
    /// When set, `stop` waits this long for the process to exit after
    /// SIGTERM and then force-kills it. `None` escalates only when the
    /// signal itself cannot be delivered.
    pub stop_grace: Option<Duration>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from(SERVER_BINARY),
            log_lines: DEFAULT_LOG_LINES,
            update_capacity: DEFAULT_UPDATE_CAPACITY,
            stop_grace: None,
        }
    }
}

impl ManagerConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let binary = std::env::var("EFX_SERVER_BINARY")
            .map(PathBuf::from)
            .unwrap_or(defaults.binary);

        let log_lines = std::env::var("EFX_LOG_LINES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.log_lines);

        let update_capacity = std::env::var("EFX_UPDATE_CAPACITY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.update_capacity);

        let stop_grace = std::env::var("EFX_STOP_GRACE_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis);

        Self {
            binary,
            log_lines,
            update_capacity,
            stop_grace,
        }
    }

    /// Create a builder for configuration.
    pub fn builder() -> ManagerConfigBuilder {
        ManagerConfigBuilder::default()
    }
}

/// Builder for manager configuration.
#[derive(Debug, Default)]
pub struct ManagerConfigBuilder {
    config: ManagerConfig,
}

impl ManagerConfigBuilder {
    pub fn binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.config.binary = binary.into();
        self
    }

    pub fn log_lines(mut self, lines: usize) -> Self {
        self.config.log_lines = lines;
        self
    }

    pub fn update_capacity(mut self, capacity: usize) -> Self {
        self.config.update_capacity = capacity;
        self
    }

    pub fn stop_grace(mut self, grace: Duration) -> Self {
        self.config.stop_grace = Some(grace);
        self
    }

    pub fn build(self) -> ManagerConfig {
        self.config
    }
}
