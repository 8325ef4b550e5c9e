//! Counting fakes for the external engine collaborators.

#![allow(dead_code)]

use async_trait::async_trait;
use bombe_core::{DirKind, DirectoryTemplates, LanguagePair, Session, SessionSettings, SessionStore};
use bombe_lab::corpus::BitextRow;
use bombe_lab::engine::{DecodeJob, Decoder, TrainJob, TranslationEngine, VocabBuilder, VocabJob};
use bombe_lab::error::LabError;
use bombe_lab::layout::{BEST_MODEL_FILENAME, TRAINING_FINISHED_MARKER};
use bombe_lab::splitting::{GroupLabels, save, split};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tempfile::TempDir;

/// Writes the artifacts a finished engine run leaves behind.
pub fn write_finished_artifacts(model: &Path, log: &Path) {
    let models_dir = model.parent().unwrap();
    std::fs::create_dir_all(models_dir).unwrap();
    std::fs::write(model, b"weights").unwrap();
    std::fs::write(models_dir.join(BEST_MODEL_FILENAME), b"best weights").unwrap();
    std::fs::create_dir_all(log.parent().unwrap()).unwrap();
    std::fs::write(
        log,
        format!(
            "[2023-03-01 10:00:00] Starting\n[2023-03-01 12:30:00] {TRAINING_FINISHED_MARKER}\n"
        ),
    )
    .unwrap();
}

/// Records the folds it trains; optionally fails on one fold.
#[derive(Default)]
pub struct CountingEngine {
    pub trained: Mutex<Vec<u32>>,
    pub fail_on: Option<u32>,
}

impl CountingEngine {
    pub fn failing_on(fold: u32) -> Self {
        Self {
            fail_on: Some(fold),
            ..Self::default()
        }
    }

    pub fn trained(&self) -> Vec<u32> {
        self.trained.lock().unwrap().clone()
    }
}

#[async_trait]
impl TranslationEngine for CountingEngine {
    async fn train(&self, job: &TrainJob) -> Result<(), LabError> {
        assert!(job.config.is_file(), "fold config must exist before training");
        assert_eq!(job.train_sets.len(), 2);
        self.trained.lock().unwrap().push(job.fold);
        if self.fail_on == Some(job.fold) {
            return Err(LabError::CommandFailed {
                command: format!("marian --config {}", job.config.display()),
                status: "exit status: 1".to_string(),
                stderr: "CUDA out of memory".to_string(),
            });
        }
        write_finished_artifacts(&job.model, &job.log);
        Ok(())
    }
}

/// Copies the decoder input to its output, counting calls.
#[derive(Default)]
pub struct CopyDecoder {
    pub calls: AtomicUsize,
}

impl CopyDecoder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Decoder for CopyDecoder {
    async fn decode(&self, job: &DecodeJob) -> Result<(), LabError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::fs::create_dir_all(job.output.parent().unwrap()).await?;
        tokio::fs::copy(&job.input, &job.output).await?;
        Ok(())
    }
}

/// Writes a placeholder vocabulary, counting builds.
#[derive(Default)]
pub struct FakeVocab {
    pub builds: AtomicUsize,
    pub inputs: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl VocabBuilder for FakeVocab {
    async fn build(&self, job: &VocabJob) -> Result<PathBuf, LabError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        *self.inputs.lock().unwrap() = job.inputs.clone();
        std::fs::write(&job.output, b"vocab")?;
        Ok(job.output.clone())
    }
}

/// A session store under `root` with a current session whose work
/// directory holds a `k`-fold split.
pub fn session_with_splits(root: &TempDir, k: u32) -> (SessionStore, Session) {
    let store = SessionStore::new(root.path().join("bombe-sessions.json"));
    let settings = SessionSettings {
        directories: DirectoryTemplates::under(root.path()),
        ..SessionSettings::default()
    };
    let langs = LanguagePair::new("en", "cy");
    let session = store.create(langs.clone(), None, settings).unwrap();

    let corpus: Vec<BitextRow> = (0..60)
        .map(|i| {
            let label = if i % 2 == 0 { "Health" } else { "Unknown" };
            BitextRow::new(
                label,
                format!("this is sentence number {i} in english"),
                format!("dyma frawddeg rhif {i} yn gymraeg"),
                &langs,
            )
        })
        .collect();
    let outcome = split(&corpus, &GroupLabels::new("Health", "Unknown"), k, 0.2, 42).unwrap();
    let work = session.paths().resolve(DirKind::Work).unwrap();
    save(&outcome, &langs, &work).unwrap();
    (store, session)
}
