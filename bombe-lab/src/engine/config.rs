//! Engine YAML configuration files.
//!
//! A base config (`transformers.yml`) is written once per session with the
//! shared vocabulary filled in. Each fold then gets its own copy with the
//! fold's corpus and output paths.

use super::TrainJob;
use crate::error::LabError;
use bombe_core::config::EngineConfig;
use bombe_core::persistence::atomic_write;
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use tracing::info;

/// File name of the shared base configuration inside the config directory.
pub const BASE_CONFIG_FILENAME: &str = "transformers.yml";

/// Transformer settings used when no template file is configured.
pub const DEFAULT_TEMPLATE: &str = r#"type: transformer
dim-vocabs: [32000, 32000]
sentence-piece-max-lines: 2000000
tied-embeddings-all: true
enc-depth: 6
dec-depth: 6
dim-emb: 512
transformer-heads: 8
transformer-dim-ffn: 2048
transformer-ffn-activation: swish
transformer-postprocess: dan
transformer-dropout: 0.1
label-smoothing: 0.1
max-length: 100
mini-batch-fit: true
workspace: 9000
maxi-batch: 1000
early-stopping: 10
cost-type: ce-mean-words
valid-freq: 5000
save-freq: 5000
disp-freq: 500
disp-first: 10
valid-metrics:
  - bleu-detok
  - ce-mean-words
  - perplexity
valid-mini-batch: 64
beam-size: 6
normalize: 0.6
learn-rate: 0.0003
lr-warmup: 16000
lr-decay-inv-sqrt: 16000
lr-report: true
optimizer-params: [0.9, 0.98, 1e-09]
clip-norm: 5
exponential-smoothing: true
overwrite: true
keep-best: true
quiet-translation: true
seed: 1111
"#;

/// Vocabulary builder parameters read from the base config.
#[derive(Debug, Clone, PartialEq)]
pub struct VocabSettings {
    pub vocab_size: u32,
    pub max_lines: u64,
    pub character_coverage: f64,
    pub max_sentence_length: u32,
}

/// An engine configuration document.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineFileConfig {
    values: Mapping,
}

impl EngineFileConfig {
    pub fn parse(text: &str) -> Result<Self, LabError> {
        let values: Mapping = serde_yaml::from_str(text)?;
        Ok(Self { values })
    }

    /// The template at `path`, or [`DEFAULT_TEMPLATE`].
    pub fn template(path: Option<&Path>) -> Result<Self, LabError> {
        match path {
            Some(path) => Self::load(path),
            None => Self::parse(DEFAULT_TEMPLATE),
        }
    }

    pub fn load(path: &Path) -> Result<Self, LabError> {
        if !path.is_file() {
            return Err(LabError::MissingArtifact(path.to_path_buf()));
        }
        Self::parse(&std::fs::read_to_string(path)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), LabError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_yaml::to_string(&self.values)?;
        atomic_write(path, text.as_bytes())?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.values.insert(Value::from(key), value.into());
    }

    pub fn set_path(&mut self, key: &str, path: &Path) {
        self.set(key, path.to_string_lossy().into_owned());
    }

    pub fn set_paths<P: AsRef<Path>>(&mut self, key: &str, paths: &[P]) {
        let values: Vec<Value> = paths
            .iter()
            .map(|p| Value::from(p.as_ref().to_string_lossy().into_owned()))
            .collect();
        self.set(key, Value::Sequence(values));
    }

    /// Paths held under `key`, either a single string or a list of strings.
    pub fn paths(&self, key: &str) -> Vec<PathBuf> {
        match self.get(key) {
            Some(Value::String(s)) => vec![PathBuf::from(s)],
            Some(Value::Sequence(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(PathBuf::from)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Vocabulary size is the largest `dim-vocabs` entry.
    pub fn vocab_settings(&self, engine: &EngineConfig) -> VocabSettings {
        let vocab_size = match self.get("dim-vocabs") {
            Some(Value::Sequence(dims)) => dims
                .iter()
                .filter_map(Value::as_u64)
                .max()
                .and_then(|max| u32::try_from(max).ok()),
            Some(other) => other.as_u64().and_then(|max| u32::try_from(max).ok()),
            None => None,
        }
        .unwrap_or(engine.vocab_size);
        let max_lines = self
            .get("sentence-piece-max-lines")
            .and_then(Value::as_u64)
            .unwrap_or(engine.vocab_max_lines);
        VocabSettings {
            vocab_size,
            max_lines,
            character_coverage: engine.character_coverage,
            max_sentence_length: engine.max_sentence_length,
        }
    }
}

/// Write the session's base config unless it already exists.
///
/// `vocabs` is set to the shared vocabulary for both languages.
pub fn configure_base(
    path: &Path,
    vocab: &Path,
    template: Option<&Path>,
) -> Result<EngineFileConfig, LabError> {
    if path.is_file() {
        return EngineFileConfig::load(path);
    }
    let mut config = EngineFileConfig::template(template)?;
    config.set_paths("vocabs", &[vocab, vocab]);
    config.save(path)?;
    info!(path = %path.display(), "Wrote base engine config");
    Ok(config)
}

/// Write the fold config for `job`, derived from `base`.
pub fn materialize_fold_config(base: &EngineFileConfig, job: &TrainJob) -> Result<(), LabError> {
    let mut config = base.clone();
    config.set_path("model", &job.model);
    config.set_path("log", &job.log);
    config.set_path("valid-log", &job.valid_log);
    config.set_path("valid-translation-output", &job.valid_translation_output);
    config.set_paths("train-sets", &job.train_sets);
    config.set_paths("valid-sets", &job.valid_sets);
    config.save(&job.config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_default_template_vocab_settings() {
        let config = EngineFileConfig::template(None).unwrap();
        let settings = config.vocab_settings(&EngineConfig::default());
        assert_eq!(settings.vocab_size, 32000);
        assert_eq!(settings.max_lines, 2_000_000);
        assert_eq!(settings.max_sentence_length, 2048);
    }

    #[test]
    fn test_vocab_size_is_largest_dim() {
        let config = EngineFileConfig::parse("dim-vocabs: [8000, 16000]\n").unwrap();
        let settings = config.vocab_settings(&EngineConfig::default());
        assert_eq!(settings.vocab_size, 16000);
        assert_eq!(settings.max_lines, 2_000_000);
    }

    #[test]
    fn test_configure_base_is_written_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config").join(BASE_CONFIG_FILENAME);
        let vocab = dir.path().join("vocab.en-cy.spm");

        let config = configure_base(&path, &vocab, None).unwrap();
        assert_eq!(config.paths("vocabs"), vec![vocab.clone(), vocab.clone()]);

        // A second call reads the file back instead of rewriting it.
        std::fs::write(&path, "vocabs: [other.spm, other.spm]\n").unwrap();
        let again = configure_base(&path, &vocab, None).unwrap();
        assert_eq!(again.paths("vocabs")[0], PathBuf::from("other.spm"));
    }

    #[test]
    fn test_fold_config_carries_job_paths() {
        let dir = TempDir::new().unwrap();
        let base = EngineFileConfig::parse("type: transformer\n").unwrap();
        let job = TrainJob {
            fold: 2,
            config: dir.path().join("split_2").join("engine.yml"),
            model: PathBuf::from("/m/split_2/model.npz"),
            log: PathBuf::from("/l/split_2/marian.log"),
            valid_log: PathBuf::from("/l/split_2/marian-validation.log"),
            valid_translation_output: PathBuf::from("/m/split_2/valid.cy.out"),
            train_sets: vec![PathBuf::from("t.en"), PathBuf::from("t.cy")],
            valid_sets: vec![PathBuf::from("v.en"), PathBuf::from("v.cy")],
        };
        materialize_fold_config(&base, &job).unwrap();

        let written = EngineFileConfig::load(&job.config).unwrap();
        assert_eq!(written.paths("model"), vec![job.model.clone()]);
        assert_eq!(written.paths("train-sets"), job.train_sets);
        assert_eq!(written.get("type").and_then(Value::as_str), Some("transformer"));
    }
}
