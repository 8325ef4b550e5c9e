//! Per-fold artifact locations.

use crate::engine::config::BASE_CONFIG_FILENAME;
use crate::error::LabError;
use crate::logparse::lossy_lines;
use bombe_core::{DirKind, LanguagePair, Session, SessionPaths};
use std::io::BufReader;
use std::path::{Path, PathBuf};

pub const MODEL_FILENAME: &str = "model.npz";
pub const BEST_MODEL_FILENAME: &str = "model.npz.best-bleu-detok.npz";
pub const DECODER_CONFIG_FILENAME: &str = "model.npz.best-bleu-detok.npz.decoder.yml";
pub const TRAIN_LOG_FILENAME: &str = "marian.log";
pub const VALID_LOG_FILENAME: &str = "marian-validation.log";
pub const DECODER_LOG_FILENAME: &str = "marian-decoder.log";
pub const FOLD_CONFIG_FILENAME: &str = "engine.yml";

/// Line the engine writes to its log when training ends normally.
pub const TRAINING_FINISHED_MARKER: &str = "Training finished";

/// `vocab.<src>-<tgt>.spm`.
pub fn vocab_filename(langs: &LanguagePair) -> String {
    format!("vocab.{}-{}.spm", langs.source, langs.target)
}

/// Session-wide artifacts shared by every fold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedLayout {
    pub base_config: PathBuf,
    pub vocab: PathBuf,
    /// Directory holding the split corpus files.
    pub work_dir: PathBuf,
}

impl SharedLayout {
    pub fn new(paths: &SessionPaths, langs: &LanguagePair) -> Result<Self, LabError> {
        Ok(Self {
            base_config: paths.resolve(DirKind::Config)?.join(BASE_CONFIG_FILENAME),
            vocab: paths.resolve(DirKind::Models)?.join(vocab_filename(langs)),
            work_dir: paths.resolve(DirKind::Work)?,
        })
    }
}

/// Every path one fold reads or writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldLayout {
    pub fold: u32,
    pub langs: LanguagePair,
    pub models_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub model: PathBuf,
    pub best_model: PathBuf,
    pub decoder_config: PathBuf,
    pub log: PathBuf,
    pub valid_log: PathBuf,
    pub decoder_log: PathBuf,
    pub valid_translation_output: PathBuf,
    pub config: PathBuf,
    /// Directory holding the split corpus files and the test set.
    pub work_dir: PathBuf,
    /// Fold-scoped cache of decoder output and review material.
    pub fold_work_dir: PathBuf,
}

impl FoldLayout {
    /// Resolve (and create) the fold's directories.
    pub fn new(session: &Session, fold: u32) -> Result<Self, LabError> {
        let paths = session.paths();
        let langs = session.langs().clone();
        let model = paths.fold_path(DirKind::Models, fold, &[MODEL_FILENAME])?;
        let models_dir = paths.fold_dir(DirKind::Models, fold);
        let log = paths.fold_path(DirKind::Logs, fold, &[TRAIN_LOG_FILENAME])?;
        let logs_dir = paths.fold_dir(DirKind::Logs, fold);
        let fold_work_dir = paths.fold_path(DirKind::Work, fold, &[])?;
        Ok(Self {
            fold,
            model,
            best_model: models_dir.join(BEST_MODEL_FILENAME),
            decoder_config: models_dir.join(DECODER_CONFIG_FILENAME),
            valid_translation_output: models_dir.join(format!("valid.{}.out", langs.target)),
            log,
            valid_log: logs_dir.join(VALID_LOG_FILENAME),
            decoder_log: logs_dir.join(DECODER_LOG_FILENAME),
            config: paths.fold_path(DirKind::Config, fold, &[FOLD_CONFIG_FILENAME])?,
            work_dir: paths.resolve(DirKind::Work)?,
            fold_work_dir,
            models_dir,
            logs_dir,
            langs,
        })
    }

    /// `<work>/corpus.test.<lang>`.
    pub fn test_set(&self, lang: &str) -> PathBuf {
        self.work_dir.join(format!("corpus.test.{lang}"))
    }

    /// Cached reference copy, `<work>/split_k/corpus.test.<tgt>.ref`.
    pub fn reference_cache(&self) -> PathBuf {
        self.fold_work_dir
            .join(format!("corpus.test.{}.ref", self.langs.target))
    }

    /// Cached hypothesis copy, `<work>/split_k/corpus.test.<tgt>.hyp`.
    pub fn hypothesis_cache(&self) -> PathBuf {
        self.fold_work_dir
            .join(format!("corpus.test.{}.hyp", self.langs.target))
    }

    /// Raw decoder output, `<work>/split_k/corpus.test.<tgt>.output`.
    pub fn decoder_output(&self) -> PathBuf {
        self.fold_work_dir
            .join(format!("corpus.test.{}.output", self.langs.target))
    }

    /// Human review sample, `<work>/split_k/<tgt>.src-ref-hyp_combined.txt`.
    pub fn review_report(&self) -> PathBuf {
        self.fold_work_dir
            .join(format!("{}.src-ref-hyp_combined.txt", self.langs.target))
    }

    /// Whether a previous run already trained this fold to completion.
    pub fn training_complete(&self) -> bool {
        self.best_model.is_file() && log_has_marker(&self.log, TRAINING_FINISHED_MARKER)
    }
}

fn log_has_marker(log: &Path, marker: &str) -> bool {
    let Ok(file) = std::fs::File::open(log) else {
        return false;
    };
    lossy_lines(BufReader::new(file))
        .map_while(Result::ok)
        .any(|line| line.contains(marker))
}
