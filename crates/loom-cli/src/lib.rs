//! Loom CLI - configuration and commands for the `loom` binary

pub mod commands;
pub mod config;

pub use config::{ConfigError, LoomConfig};
