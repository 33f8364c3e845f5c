//! Errors raised while loading or saving `config.ron`.

use std::path::PathBuf;

/// Failure reading, writing, or validating the node configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: ron::error::SpannedError,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[source] ron::Error),

    /// A value parsed but cannot drive a connection.
    #[error("invalid network.{field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}
