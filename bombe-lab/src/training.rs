//! Resumable, strictly sequential k-fold training.
//!
//! A session's `progress` is the last fold fully trained, scored and
//! recorded. Running the orchestrator again picks up at `progress + 1`, and
//! a fold whose engine log and best model already show completion is
//! scored without calling the engine again.

use crate::engine::{
    EngineFileConfig, MarianDecoder, MarianEngine, SentencePieceTrainer, TrainJob,
    TranslationEngine, VocabBuilder, VocabJob, configure_base, materialize_fold_config,
};
use crate::error::LabError;
use crate::layout::{FoldLayout, SharedLayout};
use crate::logparse::duration_hours;
use crate::scoring::ScoreAggregator;
use crate::splitting::{SplitRole, load_fold_paths};
use crate::stats::{file_sizes, segment_stats};
use bombe_core::config::{BombeConfig, EngineConfig};
use bombe_core::{DirKind, FoldResult, Session, SessionError, SessionStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where a session stands in its k-fold run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingState {
    NotStarted,
    InProgress { next_fold: u32 },
    Complete,
}

impl TrainingState {
    pub fn from_progress(progress: u32, total_folds: u32) -> Self {
        if progress >= total_folds {
            Self::Complete
        } else if progress == 0 {
            Self::NotStarted
        } else {
            Self::InProgress {
                next_fold: progress + 1,
            }
        }
    }
}

/// Train and validation file pairs per fold, fold 1 first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldInputs {
    pub train: Vec<(PathBuf, PathBuf)>,
    pub valid: Vec<(PathBuf, PathBuf)>,
}

impl FoldInputs {
    /// Read the split corpus files of `session`'s work directory.
    pub fn load(session: &Session) -> Result<Self, LabError> {
        let work_dir = session.paths().resolve(DirKind::Work)?;
        let langs = session.langs();
        let train = load_fold_paths(&work_dir, langs, SplitRole::Train)?;
        let valid = load_fold_paths(&work_dir, langs, SplitRole::Valid)?;
        if train.len() != valid.len() {
            return Err(LabError::FoldMismatch(format!(
                "{} train folds but {} valid folds in {}",
                train.len(),
                valid.len(),
                work_dir.display()
            )));
        }
        Ok(Self { train, valid })
    }

    pub fn total(&self) -> u32 {
        self.train.len() as u32
    }

    /// Every training file, both languages, in fold order.
    pub fn all_train_files(&self) -> Vec<PathBuf> {
        self.train
            .iter()
            .flat_map(|(source, target)| [source.clone(), target.clone()])
            .collect()
    }

    fn pair(sets: &[(PathBuf, PathBuf)], fold: u32) -> Vec<PathBuf> {
        sets.get(fold as usize - 1)
            .map(|(source, target)| vec![source.clone(), target.clone()])
            .unwrap_or_default()
    }
}

/// Drives the engine over every remaining fold of a session.
pub struct TrainingOrchestrator {
    engine: Arc<dyn TranslationEngine>,
    vocab_builder: Arc<dyn VocabBuilder>,
    scorer: ScoreAggregator,
    engine_config: EngineConfig,
}

impl TrainingOrchestrator {
    pub fn new(
        engine: Arc<dyn TranslationEngine>,
        vocab_builder: Arc<dyn VocabBuilder>,
        scorer: ScoreAggregator,
        engine_config: EngineConfig,
    ) -> Self {
        Self {
            engine,
            vocab_builder,
            scorer,
            engine_config,
        }
    }

    /// Orchestrator backed by the configured external programs.
    pub fn from_config(config: &BombeConfig) -> Self {
        let decoder = Arc::new(MarianDecoder::from_config(&config.engine));
        Self::new(
            Arc::new(MarianEngine::from_config(&config.engine)),
            Arc::new(SentencePieceTrainer::from_config(&config.engine)),
            ScoreAggregator::from_config(decoder, &config.scoring),
            config.engine.clone(),
        )
    }

    /// Write the base config if needed and build the shared vocabulary once.
    pub async fn prepare(
        &self,
        session: &Session,
        inputs: &FoldInputs,
    ) -> Result<EngineFileConfig, LabError> {
        let shared = SharedLayout::new(&session.paths(), session.langs())?;
        let base = configure_base(
            &shared.base_config,
            &shared.vocab,
            self.engine_config.config_template.as_deref(),
        )?;
        if shared.vocab.is_file() {
            debug!(vocab = %shared.vocab.display(), "Shared vocabulary exists");
        } else {
            let job = VocabJob {
                output: shared.vocab.clone(),
                inputs: inputs.all_train_files(),
                settings: base.vocab_settings(&self.engine_config),
            };
            let vocab = self.vocab_builder.build(&job).await?;
            info!(session = %session, vocab = %vocab.display(), "Built shared vocabulary");
        }
        Ok(base)
    }

    /// Train, score and record every fold after the session's progress.
    ///
    /// A failing fold aborts the run with its progress unchanged, so the
    /// next run retries exactly that fold.
    pub async fn run(
        &self,
        store: &SessionStore,
        session: &mut Session,
    ) -> Result<TrainingState, LabError> {
        let inputs = FoldInputs::load(session)?;
        let total = inputs.total();
        let state = TrainingState::from_progress(session.progress(), total);
        if state == TrainingState::Complete {
            info!(session = %session, folds = total, "All folds already trained");
            return Ok(state);
        }
        info!(session = %session, ?state, folds = total, "Starting k-fold training");

        let base = self.prepare(session, &inputs).await?;
        for fold in session.progress() + 1..=total {
            let layout = FoldLayout::new(session, fold)?;
            let job = TrainJob {
                fold,
                config: layout.config.clone(),
                model: layout.model.clone(),
                log: layout.log.clone(),
                valid_log: layout.valid_log.clone(),
                valid_translation_output: layout.valid_translation_output.clone(),
                train_sets: FoldInputs::pair(&inputs.train, fold),
                valid_sets: FoldInputs::pair(&inputs.valid, fold),
            };
            materialize_fold_config(&base, &job)?;

            if layout.training_complete() {
                info!(fold, "Fold already trained, skipping engine");
            } else {
                self.engine.train(&job).await?;
            }

            let result = self.fold_result(session, &layout).await?;
            match store.record_result(session, fold, result) {
                Ok(()) => {}
                Err(SessionError::ResultExists { .. }) => {
                    debug!(fold, "Keeping previously recorded result")
                }
                Err(e) => return Err(e.into()),
            }
            store.save_progress(session, fold)?;
            info!(
                session = %session,
                fold,
                bleu = ?session.result(fold).and_then(|r| r.score("BLEU")),
                "Fold complete"
            );
        }
        Ok(TrainingState::Complete)
    }

    /// Score one fold on demand, recording it when `save` is set and no
    /// result exists yet.
    pub async fn score_fold(
        &self,
        store: &SessionStore,
        session: &mut Session,
        fold: u32,
        save: bool,
    ) -> Result<FoldResult, LabError> {
        let layout = FoldLayout::new(session, fold)?;
        let result = self.fold_result(session, &layout).await?;
        if save {
            if session.result(fold).is_some() {
                warn!(fold, "Result already recorded, not overwriting");
            } else {
                store.record_result(session, fold, result.clone())?;
            }
        }
        Ok(result)
    }

    async fn fold_result(
        &self,
        session: &Session,
        layout: &FoldLayout,
    ) -> Result<FoldResult, LabError> {
        let metrics = self.scorer.score(layout).await?;
        let mut result = FoldResult::new(metrics.flatten());
        let paths = session.paths();
        for kind in DirKind::ALL {
            result
                .file_sizes
                .insert(kind.to_string(), file_sizes(paths.dir(kind)));
        }
        result.segments = segment_stats(&layout.work_dir, &layout.langs)?;
        result.duration_hours = if layout.log.is_file() {
            duration_hours(&layout.log)?
        } else {
            None
        };
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bombe_core::{DirectoryTemplates, LanguagePair, SessionId, SessionSettings};
    use tempfile::TempDir;

    #[test]
    fn test_state_from_progress() {
        assert_eq!(TrainingState::from_progress(0, 10), TrainingState::NotStarted);
        assert_eq!(
            TrainingState::from_progress(3, 10),
            TrainingState::InProgress { next_fold: 4 }
        );
        assert_eq!(TrainingState::from_progress(10, 10), TrainingState::Complete);
    }

    fn session(dir: &TempDir) -> Session {
        let settings = SessionSettings {
            directories: DirectoryTemplates::under(dir.path()),
            ..SessionSettings::default()
        };
        Session::new(SessionId::new(LanguagePair::new("en", "cy"), "abc"), None, settings)
    }

    #[test]
    fn test_fold_inputs_require_matching_roles() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir);
        let work = session.paths().resolve(DirKind::Work).unwrap();
        for name in [
            "corpus.split_01.train.en",
            "corpus.split_01.train.cy",
            "corpus.split_02.train.en",
            "corpus.split_02.train.cy",
            "corpus.split_01.valid.en",
            "corpus.split_01.valid.cy",
        ] {
            std::fs::write(work.join(name), "x\n").unwrap();
        }
        assert!(matches!(
            FoldInputs::load(&session),
            Err(LabError::FoldMismatch(_))
        ));

        for name in ["corpus.split_02.valid.en", "corpus.split_02.valid.cy"] {
            std::fs::write(work.join(name), "x\n").unwrap();
        }
        let inputs = FoldInputs::load(&session).unwrap();
        assert_eq!(inputs.total(), 2);
        assert_eq!(inputs.all_train_files().len(), 4);
        assert_eq!(
            FoldInputs::pair(&inputs.valid, 2),
            vec![
                work.join("corpus.split_02.valid.en"),
                work.join("corpus.split_02.valid.cy")
            ]
        );
    }
}
