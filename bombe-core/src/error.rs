//! Error types for the Bombe core library.
//!
//! Session lookups report absence through [`SessionError::NotFound`] and
//! [`SessionError::NoActiveSession`] instead of aborting, so callers decide
//! whether to recover or surface a message.

use std::path::PathBuf;

/// Errors from session lookup, mutation and persistence.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Training session not found: {key}")]
    NotFound { key: String },

    #[error("No training session is active")]
    NoActiveSession,

    #[error("Invalid session id '{id}': expected <src>-<tgt>_<ident>")]
    InvalidId { id: String },

    #[error("Invalid language pair '{value}': expected <src>-<tgt>")]
    InvalidLanguagePair { value: String },

    #[error("Result for fold {fold} is already recorded")]
    ResultExists { fold: u32 },

    #[error("Progress cannot move backwards: at fold {current}, requested {requested}")]
    ProgressRegression { current: u32, requested: u32 },

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SessionError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for the two "nothing to work on" conditions.
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::NoActiveSession)
    }
}

/// Errors reading or writing the session registry file.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Unsupported registry format version {found} in {path} (expected {expected})")]
    UnsupportedVersion {
        path: PathBuf,
        found: u32,
        expected: u32,
    },

    #[error("Registry checksum mismatch in {path}: file is corrupt or was edited by hand")]
    ChecksumMismatch { path: PathBuf },

    #[error("Malformed registry {path}: {message}")]
    Malformed { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration parse error: {0}")]
    Parse(#[from] Box<figment::Error>),

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }
}
