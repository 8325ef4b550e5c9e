//! Resumable per-job monitor state.

use super::gap::GapState;
use crate::error::LabError;
use bombe_core::persistence::{atomic_write_json, load_json};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const CURSOR_FORMAT_VERSION: u32 = 1;

/// Where a job monitor left off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogCursor {
    pub format_version: u32,
    /// Log modification time (seconds since the epoch) at the last update.
    #[serde(default)]
    pub last_modified: Option<f64>,
    /// Zero-based index of the last line processed.
    #[serde(default)]
    pub last_line: Option<u64>,
    #[serde(default)]
    pub gpus: usize,
    /// Sentence count of the last training record.
    #[serde(default)]
    pub last_sentences: u64,
    /// Last step emitted per checkpoint-average log.
    #[serde(default)]
    pub averages: BTreeMap<String, u64>,
    #[serde(default)]
    pub gap: GapState,
}

impl Default for LogCursor {
    fn default() -> Self {
        Self {
            format_version: CURSOR_FORMAT_VERSION,
            last_modified: None,
            last_line: None,
            gpus: 0,
            last_sentences: 0,
            averages: BTreeMap::new(),
            gap: GapState::default(),
        }
    }
}

impl LogCursor {
    /// The cursor at `path`, or a fresh one if none was saved.
    pub fn load(path: &Path) -> Result<Self, LabError> {
        let cursor: Option<LogCursor> = load_json(path)?;
        match cursor {
            Some(cursor) if cursor.format_version != CURSOR_FORMAT_VERSION => {
                Err(LabError::monitor(format!(
                    "{}: unsupported cursor version {}",
                    path.display(),
                    cursor.format_version
                )))
            }
            Some(cursor) => Ok(cursor),
            None => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), LabError> {
        atomic_write_json(path, self)?;
        Ok(())
    }

    /// Index of the first line not yet processed.
    pub fn next_line(&self) -> u64 {
        self.last_line.map_or(0, |line| line + 1)
    }
}
