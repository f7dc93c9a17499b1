//! TOML configuration file.
//!
//! The daemon is usually started with `--config synclink.toml`.  A missing
//! file is not an error: [`load_or_default`] returns [`P2pConfig::default`],
//! and every field the file leaves out takes its serde default.
//!
//! Folder ids in the file are hex strings; a malformed one makes the whole
//! file fail to parse rather than silently dropping that folder.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::domain::P2pConfig;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Parses the configuration file at `path`.
///
/// # Errors
///
/// [`ConfigError::Io`] if the file cannot be read (including when it does
/// not exist), [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<P2pConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}

/// Like [`load_config`], but a missing file yields the default configuration.
///
/// # Errors
///
/// Same as [`load_config`] for every failure other than "not found".
pub fn load_or_default(path: &Path) -> Result<P2pConfig, ConfigError> {
    match load_config(path) {
        Err(ConfigError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
            Ok(P2pConfig::default())
        }
        other => other,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
