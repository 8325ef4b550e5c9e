//! Durable session registry.
//!
//! All sessions live in one JSON document keyed by session id, plus the
//! literal key `current` aliasing the active session. The document is a
//! versioned envelope carrying a SHA-256 checksum of its payload so that an
//! incompatible or damaged file is reported instead of silently misread.
//!
//! Every save re-reads the registry before writing, so sessions written by
//! other processes under other keys are preserved. Two writers saving the
//! same key concurrently is not supported: the last writer wins.

use crate::error::{RegistryError, SessionError};
use crate::persistence;
use crate::results::FoldResult;
use crate::session::{LanguagePair, Session, SessionId, SessionSettings};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Registry key aliasing the active session.
pub const CURRENT_KEY: &str = "current";

/// Version written into new registry files.
pub const REGISTRY_FORMAT_VERSION: u32 = 1;

type Sessions = BTreeMap<String, Session>;

#[derive(Debug, Serialize, Deserialize)]
struct RegistryEnvelope {
    format_version: u32,
    checksum: String,
    sessions: Sessions,
}

/// Version probe read before the full envelope, so a future format with a
/// different payload shape still yields a version error.
#[derive(Debug, Deserialize)]
struct VersionProbe {
    format_version: u32,
}

fn checksum(sessions: &Sessions) -> Result<String, serde_json::Error> {
    let canonical = serde_json::to_vec(sessions)?;
    Ok(format!("{:x}", Sha256::digest(&canonical)))
}

/// A session as shown by [`SessionStore::list`].
#[derive(Debug, Clone)]
pub struct SessionListing {
    pub session: Session,
    pub is_current: bool,
}

/// File-backed store of experiment sessions.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True once any session has been saved.
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Read every entry, including the `current` alias.
    pub fn read_registry(&self) -> Result<BTreeMap<String, Session>, RegistryError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let data = std::fs::read_to_string(&self.path)?;
        let malformed = |e: serde_json::Error| RegistryError::Malformed {
            path: self.path.clone(),
            message: e.to_string(),
        };

        let probe: VersionProbe = serde_json::from_str(&data).map_err(malformed)?;
        if probe.format_version != REGISTRY_FORMAT_VERSION {
            return Err(RegistryError::UnsupportedVersion {
                path: self.path.clone(),
                found: probe.format_version,
                expected: REGISTRY_FORMAT_VERSION,
            });
        }

        let envelope: RegistryEnvelope = serde_json::from_str(&data).map_err(malformed)?;
        if checksum(&envelope.sessions).map_err(malformed)? != envelope.checksum {
            return Err(RegistryError::ChecksumMismatch {
                path: self.path.clone(),
            });
        }
        Ok(envelope.sessions)
    }

    fn write_registry(&self, sessions: Sessions) -> Result<(), RegistryError> {
        let envelope = RegistryEnvelope {
            format_version: REGISTRY_FORMAT_VERSION,
            checksum: checksum(&sessions).map_err(std::io::Error::other)?,
            sessions,
        };
        persistence::atomic_write_json(&self.path, &envelope)?;
        debug!(path = %self.path.display(), "Session registry written");
        Ok(())
    }

    /// Create a session with a freshly generated id, persist it and mark it current.
    pub fn create(
        &self,
        langs: LanguagePair,
        comment: Option<String>,
        settings: SessionSettings,
    ) -> Result<Session, SessionError> {
        self.create_with_id(SessionId::generate(langs), comment, settings)
    }

    /// Create a session with an explicit id, persist it and mark it current.
    ///
    /// An existing session with the same id is replaced.
    pub fn create_with_id(
        &self,
        id: SessionId,
        comment: Option<String>,
        settings: SessionSettings,
    ) -> Result<Session, SessionError> {
        let session = Session::new(id, comment, settings);
        self.save(&session)?;
        info!(session = %session, "Created training session");
        Ok(session)
    }

    /// Look up a session by exact key, reporting absence as `Ok(None)`.
    pub fn find(&self, key: &str) -> Result<Option<Session>, SessionError> {
        Ok(self.read_registry()?.remove(key))
    }

    /// Look up a session by exact key.
    pub fn load(&self, key: &str) -> Result<Session, SessionError> {
        self.find(key)?.ok_or_else(|| SessionError::NotFound {
            key: key.to_string(),
        })
    }

    /// The session marked current.
    pub fn get_current(&self) -> Result<Session, SessionError> {
        self.find(CURRENT_KEY)?
            .ok_or(SessionError::NoActiveSession)
    }

    /// The session named by `key`, or the current one when `key` is `None`.
    pub fn load_or_current(&self, key: Option<&str>) -> Result<Session, SessionError> {
        match key {
            Some(key) => self.load(key),
            None => self.get_current(),
        }
    }

    /// Write `session` under its own key and as `current`.
    ///
    /// The session's directories are created as a side effect.
    pub fn save(&self, session: &Session) -> Result<(), SessionError> {
        session.paths().ensure_all()?;
        let mut sessions = self.read_registry()?;
        sessions.insert(session.id.to_string(), session.clone());
        sessions.insert(CURRENT_KEY.to_string(), session.clone());
        self.write_registry(sessions)?;
        Ok(())
    }

    /// Advance `session` to `fold` and persist.
    pub fn save_progress(&self, session: &mut Session, fold: u32) -> Result<(), SessionError> {
        session.advance_progress(fold)?;
        self.save(session)
    }

    /// Record the write-once result of `fold` and persist.
    pub fn record_result(
        &self,
        session: &mut Session,
        fold: u32,
        result: FoldResult,
    ) -> Result<(), SessionError> {
        session.record_result(fold, result)?;
        self.save(session)
    }

    /// Replace the session comment and persist.
    pub fn annotate(
        &self,
        session: &mut Session,
        comment: impl Into<String>,
    ) -> Result<(), SessionError> {
        session.comment = Some(comment.into());
        self.save(session)
    }

    /// Mark an existing session current.
    pub fn activate(&self, key: &str) -> Result<Session, SessionError> {
        let session = self.load(key)?;
        self.save(&session)?;
        Ok(session)
    }

    /// Remove the `current` alias if it points at `session`.
    ///
    /// The session's own entry is retained. Returns whether an alias was removed.
    pub fn end(&self, session: &Session) -> Result<bool, SessionError> {
        let mut sessions = self.read_registry()?;
        let is_current = sessions
            .get(CURRENT_KEY)
            .is_some_and(|current| current.id == session.id);
        if is_current {
            sessions.remove(CURRENT_KEY);
            self.write_registry(sessions)?;
            info!(session = %session, "Training session ended");
        }
        Ok(is_current)
    }

    /// Delete a session's entry, and the `current` alias when it points at it.
    pub fn delete(&self, key: &str) -> Result<Session, SessionError> {
        let mut sessions = self.read_registry()?;
        let session = sessions.remove(key).ok_or_else(|| SessionError::NotFound {
            key: key.to_string(),
        })?;
        if sessions
            .get(CURRENT_KEY)
            .is_some_and(|current| current.id == session.id)
        {
            sessions.remove(CURRENT_KEY);
        }
        self.write_registry(sessions)?;
        info!(session = %session, "Training session deleted");
        Ok(session)
    }

    /// Sessions newest first, capped at `limit` unless `include_all`.
    pub fn list(
        &self,
        limit: usize,
        include_all: bool,
    ) -> Result<Vec<SessionListing>, SessionError> {
        let mut sessions = self.read_registry()?;
        let current = sessions.remove(CURRENT_KEY).map(|s| s.id);
        let mut listings: Vec<SessionListing> = sessions
            .into_values()
            .map(|session| SessionListing {
                is_current: current.as_ref() == Some(&session.id),
                session,
            })
            .collect();
        listings.sort_by(|a, b| b.session.created.cmp(&a.session.created));
        if !include_all {
            listings.truncate(limit);
        }
        Ok(listings)
    }
}
