//! Error types for the settings file.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Settings error type.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// No per-user configuration directory on this platform.
    #[error("Failed to locate the user configuration directory")]
    ConfigDirNotFound,

    /// Failed to read the settings file.
    #[error("Failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to create the settings directory.
    #[error("Failed to create directory: {0}")]
    DirectoryCreation(#[source] io::Error),

    /// Failed to write the settings file.
    #[error("Failed to write settings file: {0}")]
    Write(#[source] io::Error),

    /// The settings file is not valid JSON for this schema.
    #[error("Failed to parse settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Failed to serialize settings.
    #[error("Failed to serialize settings: {0}")]
    Serialize(#[source] serde_json::Error),

    /// A setting has an unusable value.
    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
