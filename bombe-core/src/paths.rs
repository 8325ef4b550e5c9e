//! Per-session directory layout.
//!
//! Every named directory is configured as a template containing the
//! `{session}` placeholder. Binding the templates to a [`SessionId`] yields a
//! [`SessionPaths`], which then resolves base directories and fold-scoped
//! leaf paths (`<base>/split_<k>/<leaf>...`).

use crate::error::SessionError;
use crate::session::SessionId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Placeholder substituted with the session's string identity.
pub const SESSION_PLACEHOLDER: &str = "{session}";

/// The named experiment directories a session owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirKind {
    /// Engine configuration files (shared base config, per-fold configs).
    Config,
    /// Engine training, validation and decoder logs.
    Logs,
    /// Trained models and the shared vocabulary.
    Models,
    /// Exported result summaries.
    Results,
    /// Spelling checker state.
    Spelling,
    /// Split corpus files, decoder output and review reports.
    Work,
    /// Cleaned corpus exports.
    Export,
}

impl DirKind {
    pub const ALL: [DirKind; 7] = [
        DirKind::Config,
        DirKind::Logs,
        DirKind::Models,
        DirKind::Results,
        DirKind::Spelling,
        DirKind::Work,
        DirKind::Export,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DirKind::Config => "config",
            DirKind::Logs => "logs",
            DirKind::Models => "models",
            DirKind::Results => "results",
            DirKind::Spelling => "spelling",
            DirKind::Work => "work",
            DirKind::Export => "export",
        }
    }
}

impl fmt::Display for DirKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DirKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().trim_end_matches("_dir");
        DirKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| format!("unknown directory '{s}'"))
    }
}

/// Directory templates, one per [`DirKind`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryTemplates {
    pub config: String,
    pub logs: String,
    pub models: String,
    pub results: String,
    pub spelling: String,
    pub work: String,
    pub export: String,
}

impl Default for DirectoryTemplates {
    fn default() -> Self {
        Self::under(Path::new("/experiments"))
    }
}

impl DirectoryTemplates {
    /// Templates of the form `<root>/{session}/<kind>`.
    pub fn under(root: &Path) -> Self {
        let t = |kind: DirKind| {
            root.join(SESSION_PLACEHOLDER)
                .join(kind.as_str())
                .to_string_lossy()
                .into_owned()
        };
        Self {
            config: t(DirKind::Config),
            logs: t(DirKind::Logs),
            models: t(DirKind::Models),
            results: t(DirKind::Results),
            spelling: t(DirKind::Spelling),
            work: t(DirKind::Work),
            export: t(DirKind::Export),
        }
    }

    pub fn template(&self, kind: DirKind) -> &str {
        match kind {
            DirKind::Config => &self.config,
            DirKind::Logs => &self.logs,
            DirKind::Models => &self.models,
            DirKind::Results => &self.results,
            DirKind::Spelling => &self.spelling,
            DirKind::Work => &self.work,
            DirKind::Export => &self.export,
        }
    }

    pub fn set(&mut self, kind: DirKind, template: impl Into<String>) {
        let slot = match kind {
            DirKind::Config => &mut self.config,
            DirKind::Logs => &mut self.logs,
            DirKind::Models => &mut self.models,
            DirKind::Results => &mut self.results,
            DirKind::Spelling => &mut self.spelling,
            DirKind::Work => &mut self.work,
            DirKind::Export => &mut self.export,
        };
        *slot = template.into();
    }

    /// Substitute the session identity into every template.
    pub fn bind(&self, session: &SessionId) -> SessionPaths {
        let ident = session.to_string();
        let dirs = DirKind::ALL
            .iter()
            .map(|&kind| {
                let path = self.template(kind).replace(SESSION_PLACEHOLDER, &ident);
                (kind, PathBuf::from(path))
            })
            .collect();
        SessionPaths { dirs }
    }
}

/// Directory templates bound to one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    dirs: BTreeMap<DirKind, PathBuf>,
}

impl SessionPaths {
    /// The directory for `kind`, without touching the filesystem.
    pub fn dir(&self, kind: DirKind) -> &Path {
        // Every kind is inserted by `bind`.
        self.dirs
            .get(&kind)
            .map(PathBuf::as_path)
            .unwrap_or_else(|| Path::new("."))
    }

    /// The directory for `kind`, created if absent.
    pub fn resolve(&self, kind: DirKind) -> Result<PathBuf, SessionError> {
        let dir = self.dir(kind).to_path_buf();
        ensure_dir(&dir)?;
        Ok(dir)
    }

    /// `<dir(kind)>/split_<fold>`, without touching the filesystem.
    pub fn fold_dir(&self, kind: DirKind, fold: u32) -> PathBuf {
        self.dir(kind).join(format!("split_{fold}"))
    }

    /// Fold-scoped path `<dir(kind)>/split_<fold>/<leafs...>`.
    ///
    /// The base and fold directories (and any intermediate leaf directories)
    /// are created; the final leaf segment is not.
    pub fn fold_path(
        &self,
        kind: DirKind,
        fold: u32,
        leafs: &[&str],
    ) -> Result<PathBuf, SessionError> {
        let mut path = self.fold_dir(kind, fold);
        for leaf in leafs {
            path.push(leaf);
        }
        let folder = if leafs.is_empty() {
            path.as_path()
        } else {
            path.parent().unwrap_or(&path)
        };
        ensure_dir(folder)?;
        Ok(path)
    }

    /// Create every directory of the session.
    pub fn ensure_all(&self) -> Result<(), SessionError> {
        for dir in self.dirs.values() {
            ensure_dir(dir)?;
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (DirKind, &Path)> {
        self.dirs.iter().map(|(kind, path)| (*kind, path.as_path()))
    }
}

fn ensure_dir(path: &Path) -> Result<(), SessionError> {
    std::fs::create_dir_all(path).map_err(|e| SessionError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::LanguagePair;
    use tempfile::TempDir;

    fn session_id() -> SessionId {
        SessionId::new(LanguagePair::new("en", "cy"), "1a2b3c4d")
    }

    #[test]
    fn test_bind_substitutes_identity() {
        let templates = DirectoryTemplates::default();
        let paths = templates.bind(&session_id());
        assert_eq!(
            paths.dir(DirKind::Logs),
            Path::new("/experiments/en-cy_1a2b3c4d/logs")
        );
        assert_eq!(
            paths.dir(DirKind::Export),
            Path::new("/experiments/en-cy_1a2b3c4d/export")
        );
    }

    #[test]
    fn test_custom_template_without_placeholder() {
        let mut templates = DirectoryTemplates::default();
        templates.set(DirKind::Export, "data/export");
        let paths = templates.bind(&session_id());
        assert_eq!(paths.dir(DirKind::Export), Path::new("data/export"));
    }

    #[test]
    fn test_resolve_creates_directory() {
        let root = TempDir::new().unwrap();
        let paths = DirectoryTemplates::under(root.path()).bind(&session_id());
        let dir = paths.resolve(DirKind::Models).unwrap();
        assert!(dir.is_dir());
        assert!(dir.ends_with("en-cy_1a2b3c4d/models"));
    }

    #[test]
    fn test_fold_path_creates_parents_but_not_leaf() {
        let root = TempDir::new().unwrap();
        let paths = DirectoryTemplates::under(root.path()).bind(&session_id());
        let log = paths.fold_path(DirKind::Logs, 3, &["marian.log"]).unwrap();
        assert!(log.ends_with("logs/split_3/marian.log"));
        assert!(log.parent().unwrap().is_dir());
        assert!(!log.exists());

        let fold_dir = paths.fold_path(DirKind::Models, 2, &[]).unwrap();
        assert!(fold_dir.is_dir());
        assert!(fold_dir.ends_with("models/split_2"));
    }

    #[test]
    fn test_dir_kind_parse() {
        assert_eq!("logs".parse::<DirKind>().unwrap(), DirKind::Logs);
        assert_eq!("models_dir".parse::<DirKind>().unwrap(), DirKind::Models);
        assert!("nope".parse::<DirKind>().is_err());
    }
}
