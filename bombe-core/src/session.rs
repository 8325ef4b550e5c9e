//! Experiment sessions.
//!
//! A session is identified by its language pair and a short random ident
//! (`en-cy_1a2b3c4d`). It carries its settings, the results recorded per
//! fold and the highest fold fully completed.

use crate::error::SessionError;
use crate::paths::{DirectoryTemplates, SessionPaths};
use crate::results::FoldResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Source and target language codes of a bitext.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LanguagePair {
    pub source: String,
    pub target: String,
}

impl LanguagePair {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    /// `[source, target]`, the order every per-language file list follows.
    pub fn codes(&self) -> [&str; 2] {
        [&self.source, &self.target]
    }

    /// Position of `lang` in [`codes`](Self::codes).
    pub fn index_of(&self, lang: &str) -> Option<usize> {
        self.codes().iter().position(|code| *code == lang)
    }

    /// True when `text` is exactly one of the two language codes.
    pub fn is_code(&self, text: &str) -> bool {
        self.index_of(text).is_some()
    }
}

impl fmt::Display for LanguagePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.source, self.target)
    }
}

impl FromStr for LanguagePair {
    type Err = SessionError;

    /// Accepts `en-cy` or `en_cy`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SessionError::InvalidLanguagePair {
            value: s.to_string(),
        };
        let (source, target) = s.split_once(['-', '_']).ok_or_else(invalid)?;
        let valid =
            |code: &str| !code.is_empty() && code.chars().all(|c| c.is_ascii_alphanumeric());
        if !valid(source) || !valid(target) {
            return Err(invalid());
        }
        Ok(Self::new(source, target))
    }
}

/// Session identity: language pair plus short random ident.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId {
    pub langs: LanguagePair,
    pub ident: String,
}

impl SessionId {
    pub fn new(langs: LanguagePair, ident: impl Into<String>) -> Self {
        Self {
            langs,
            ident: ident.into(),
        }
    }

    /// Fresh identity: the last 8 hex digits of the SHA-256 of a random UUID.
    pub fn generate(langs: LanguagePair) -> Self {
        let digest = Sha256::digest(uuid::Uuid::new_v4().as_bytes());
        let hex = format!("{digest:x}");
        let ident = hex[hex.len() - 8..].to_string();
        Self::new(langs, ident)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.langs, self.ident)
    }
}

impl FromStr for SessionId {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SessionError::InvalidId { id: s.to_string() };
        let (langs, ident) = s.rsplit_once('_').ok_or_else(invalid)?;
        if ident.is_empty() || !ident.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(invalid());
        }
        let langs = langs.parse::<LanguagePair>().map_err(|_| invalid())?;
        Ok(Self::new(langs, ident))
    }
}

/// Settings captured when a session is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    pub directories: DirectoryTemplates,
    /// Domain label of the curated subset the test set is drawn from.
    pub classified_label: String,
    /// Domain label of the general pool, always kept on the train side.
    pub unclassified_label: String,
    /// Root of the raw bitext files; a file's parent directory names its domain.
    pub data_dir: PathBuf,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            directories: DirectoryTemplates::default(),
            classified_label: "Health".to_string(),
            unclassified_label: "Unknown".to_string(),
            data_dir: PathBuf::from("data/src"),
        }
    }
}

/// An experiment session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub comment: Option<String>,
    pub settings: SessionSettings,
    #[serde(default)]
    results: BTreeMap<u32, FoldResult>,
    #[serde(default)]
    progress: u32,
}

impl Session {
    pub fn new(id: SessionId, comment: Option<String>, settings: SessionSettings) -> Self {
        Self {
            id,
            created: Utc::now(),
            comment,
            settings,
            results: BTreeMap::new(),
            progress: 0,
        }
    }

    pub fn langs(&self) -> &LanguagePair {
        &self.id.langs
    }

    /// Highest fold index fully completed (0 = nothing trained yet).
    pub fn progress(&self) -> u32 {
        self.progress
    }

    pub fn results(&self) -> &BTreeMap<u32, FoldResult> {
        &self.results
    }

    pub fn result(&self, fold: u32) -> Option<&FoldResult> {
        self.results.get(&fold)
    }

    /// Directory templates bound to this session.
    pub fn paths(&self) -> SessionPaths {
        self.settings.directories.bind(&self.id)
    }

    /// Record the result of `fold`. Results are write-once.
    pub fn record_result(&mut self, fold: u32, result: FoldResult) -> Result<(), SessionError> {
        if self.results.contains_key(&fold) {
            return Err(SessionError::ResultExists { fold });
        }
        self.results.insert(fold, result);
        Ok(())
    }

    /// Move progress forward to `fold`. Moving backwards is rejected.
    pub fn advance_progress(&mut self, fold: u32) -> Result<(), SessionError> {
        if fold < self.progress {
            return Err(SessionError::ProgressRegression {
                current: self.progress,
                requested: fold,
            });
        }
        self.progress = fold;
        Ok(())
    }

    /// The fold with the highest score for `metric`, if any fold has it.
    pub fn best_fold(&self, metric: &str) -> Option<(u32, f64)> {
        self.results
            .iter()
            .filter_map(|(fold, result)| result.score(metric).map(|s| (*fold, s)))
            .fold(None, |best: Option<(u32, f64)>, (fold, score)| match best {
                Some((_, best_score)) if best_score >= score => best,
                _ => Some((fold, score)),
            })
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.id.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::MetricScore;

    fn result_with_bleu(score: f64) -> FoldResult {
        FoldResult::new(BTreeMap::from([(
            "BLEU".to_string(),
            MetricScore::new(score),
        )]))
    }

    #[test]
    fn test_language_pair_parse() {
        let dash: LanguagePair = "en-cy".parse().unwrap();
        let underscore: LanguagePair = "en_cy".parse().unwrap();
        assert_eq!(dash, underscore);
        assert_eq!(dash.to_string(), "en-cy");
        assert_eq!(dash.index_of("cy"), Some(1));
        assert!("ency".parse::<LanguagePair>().is_err());
        assert!("en-".parse::<LanguagePair>().is_err());
    }

    #[test]
    fn test_session_id_roundtrip() {
        let id: SessionId = "en-cy_1a2b3c4d".parse().unwrap();
        assert_eq!(id.langs, LanguagePair::new("en", "cy"));
        assert_eq!(id.ident, "1a2b3c4d");
        assert_eq!(id.to_string(), "en-cy_1a2b3c4d");

        let legacy: SessionId = "en_cy_1a2b3c4d".parse().unwrap();
        assert_eq!(legacy, id);
    }

    #[test]
    fn test_session_id_rejects_garbage() {
        assert!("current".parse::<SessionId>().is_err());
        assert!("en-cy_".parse::<SessionId>().is_err());
    }

    #[test]
    fn test_generated_ids_are_short_and_distinct() {
        let langs = LanguagePair::new("en", "cy");
        let a = SessionId::generate(langs.clone());
        let b = SessionId::generate(langs);
        assert_eq!(a.ident.len(), 8);
        assert!(a.ident.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_results_are_write_once() {
        let id = SessionId::new(LanguagePair::new("en", "cy"), "abc");
        let mut session = Session::new(id, None, SessionSettings::default());
        session.record_result(1, result_with_bleu(20.0)).unwrap();
        let err = session.record_result(1, result_with_bleu(99.0)).unwrap_err();
        assert!(matches!(err, SessionError::ResultExists { fold: 1 }));
        assert_eq!(session.result(1).unwrap().score("BLEU"), Some(20.0));
    }

    #[test]
    fn test_progress_is_monotonic() {
        let id = SessionId::new(LanguagePair::new("en", "cy"), "abc");
        let mut session = Session::new(id, None, SessionSettings::default());
        session.advance_progress(3).unwrap();
        session.advance_progress(3).unwrap();
        let err = session.advance_progress(2).unwrap_err();
        assert!(matches!(
            err,
            SessionError::ProgressRegression {
                current: 3,
                requested: 2
            }
        ));
        assert_eq!(session.progress(), 3);
    }

    #[test]
    fn test_best_fold() {
        let id = SessionId::new(LanguagePair::new("en", "cy"), "abc");
        let mut session = Session::new(id, None, SessionSettings::default());
        assert!(session.best_fold("BLEU").is_none());
        session.record_result(1, result_with_bleu(20.0)).unwrap();
        session.record_result(2, result_with_bleu(33.5)).unwrap();
        session.record_result(3, result_with_bleu(30.0)).unwrap();
        assert_eq!(session.best_fold("BLEU"), Some((2, 33.5)));
    }
}
