//! Configuration for the Nebula protocol node.
//!
//! Settings persist to disk as RON files and accept CLI overrides via clap.
//! Unknown or missing fields fall back to defaults, so older and newer
//! config files both load.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{Config, DebugConfig, NetworkConfig};
pub use error::ConfigError;
