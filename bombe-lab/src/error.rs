//! Error types for the bombe-lab crate.

use bombe_core::SessionError;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for corpus, training, scoring and monitoring work.
#[derive(Debug, Error)]
pub enum LabError {
    /// An external program exited unsuccessfully. Never retried.
    #[error("Command failed ({status}): {command}\n{stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Corpus error: {0}")]
    Corpus(String),

    #[error("Split error: {0}")]
    Split(String),

    #[error("Fold files do not line up: {0}")]
    FoldMismatch(String),

    #[error("Missing artifact: {}", .0.display())]
    MissingArtifact(PathBuf),

    #[error("Scoring error: {0}")]
    Scoring(String),

    #[error("Monitor error: {0}")]
    Monitor(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("{failed} of {total} worker jobs failed; first failure: {first}")]
    Pool {
        failed: usize,
        total: usize,
        first: String,
    },

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl LabError {
    pub fn corpus(msg: impl Into<String>) -> Self {
        Self::Corpus(msg.into())
    }

    pub fn split(msg: impl Into<String>) -> Self {
        Self::Split(msg.into())
    }

    pub fn scoring(msg: impl Into<String>) -> Self {
        Self::Scoring(msg.into())
    }

    pub fn monitor(msg: impl Into<String>) -> Self {
        Self::Monitor(msg.into())
    }

    /// The wrapped session error, when this is a lookup failure.
    pub fn as_session(&self) -> Option<&SessionError> {
        match self {
            Self::Session(inner) => Some(inner),
            _ => None,
        }
    }
}
