//! CLI commands.

pub mod chat;
pub mod check;
pub mod serve;
pub mod templates;
