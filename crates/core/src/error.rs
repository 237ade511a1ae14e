//! Error types shared by the inflight crates.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for startup and configuration.
///
/// GPU-side failures use `inflight_rhi::RhiError`; this type covers what
/// happens before a device exists.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file could not be read
    #[error("failed to read config '{path}': {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid TOML for the expected schema
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration values are out of range
    #[error("invalid config: {0}")]
    Config(String),
}

/// Result type alias using the core error type.
pub type Result<T> = std::result::Result<T, Error>;
