//! Supervision of local `mlx-openai-server` processes.
//!
//! A [`ServerManager`] launches servers on pseudo-terminals, keeps the last
//! lines of each server's output in a [`LogBuffer`] and reports lifecycle
//! events on a single bounded channel.
//!
//! ```text
//! start(config) ──> spawn on PTY ──> registry[port]
//!                                      │
//!                     ┌────────────────┴───────────────┐
//!                output pump                      exit waiter
//!           (LogBuffer + NewOutput)                 (Stopped)
//!                     └──────────────> updates <───────┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use efx_server::{ServerConfig, ServerManager};
//!
//! let (manager, mut updates) = ServerManager::with_defaults();
//! manager.start(&ServerConfig::new("/models/Qwen3-8B")).await?;
//! while let Some(update) = updates.recv().await {
//!     println!("{}: {:?}", update.port, update.data);
//! }
//! ```

mod config;
pub mod detect;
mod error;
mod manager;
mod output;
mod settings;
mod templates;

pub use config::{ModelType, ServerConfig, DEFAULT_HOST, DEFAULT_PORT};
pub use error::ServerError;
pub use manager::{ServerInstance, ServerManager, ServerUpdate, UpdateKind, UpdateReceiver};
pub use output::{LogBuffer, DEFAULT_LOG_LINES};
pub use settings::{ManagerConfig, ManagerConfigBuilder, DEFAULT_UPDATE_CAPACITY, SERVER_BINARY};
pub use templates::{default_templates, find_template, ModelTemplate};
