//! Directory resolution for the node's config and log files.

use std::path::{Path, PathBuf};

/// Errors that can occur while resolving directories.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    /// The OS did not provide a configuration directory.
    #[error("could not determine OS configuration directory")]
    NoConfigDir,
}

/// OS-specific directory paths for the node.
///
/// Resolves to the platform-appropriate location (XDG on Linux, Known Folders
/// on Windows, Library on macOS) unless the command line names a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformDirs {
    /// Holds `config.ron`.
    pub config_dir: PathBuf,
    /// Log files.
    pub log_dir: PathBuf,
}

const APP_NAME: &str = "nebula-server";

impl PlatformDirs {
    /// Resolve the OS default directories without creating them.
    pub fn resolve() -> Result<Self, PlatformError> {
        let config_base = dirs::config_dir().ok_or(PlatformError::NoConfigDir)?;
        Ok(Self::under(&config_base.join(APP_NAME)))
    }

    /// Use `config_dir` for config, with logs in a `logs` subdirectory.
    pub fn under(config_dir: &Path) -> Self {
        Self {
            config_dir: config_dir.to_path_buf(),
            log_dir: config_dir.join("logs"),
        }
    }

    /// Honour a `--config` override, else fall back to the OS default.
    pub fn from_override(config_dir: Option<&Path>) -> Result<Self, PlatformError> {
        match config_dir {
            Some(dir) => Ok(Self::under(dir)),
            None => Self::resolve(),
        }
    }
}
