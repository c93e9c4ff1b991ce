//! Configuration for the Net64 client.
//!
//! Settings persist to disk as `config.ron`. Every section falls back to its
//! defaults when missing, unknown fields are ignored, and command-line flags
//! override whatever was loaded.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{Config, DebugConfig, NetworkConfig, PlayerConfig, ReconnectSettings};
pub use error::ConfigError;
