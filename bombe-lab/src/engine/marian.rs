//! Subprocess implementations of the engine collaborators.

use super::{
    DecodeJob, Decoder, SentenceStream, TrainJob, TranslationEngine, VocabBuilder, VocabJob,
};
use crate::command::{self, CommandSpec};
use crate::error::LabError;
use async_trait::async_trait;
use bombe_core::config::EngineConfig;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Runs the `marian` trainer.
#[derive(Debug, Clone)]
pub struct MarianEngine {
    pub program: String,
}

impl MarianEngine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(&config.trainer_bin)
    }

    pub fn command(&self, job: &TrainJob) -> CommandSpec {
        CommandSpec::new(&self.program)
            .opt_path("--config", &job.config)
            .opt_path("--log", &job.log)
            .opt_path("--valid-log", &job.valid_log)
            .opt_path("--model", &job.model)
            .opt_paths("--train-sets", &job.train_sets)
            .opt_paths("--valid-sets", &job.valid_sets)
            .opt_path("--valid-translation-output", &job.valid_translation_output)
    }
}

#[async_trait]
impl TranslationEngine for MarianEngine {
    async fn train(&self, job: &TrainJob) -> Result<(), LabError> {
        info!(fold = job.fold, model = %job.model.display(), "Training fold");
        command::run(&self.command(job)).await?;
        Ok(())
    }
}

/// Fixed beam and batch parameters for decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct DecoderParams {
    pub beam_size: u32,
    pub normalize: f64,
    pub mini_batch: u32,
    pub maxi_batch: u32,
    pub workspace_mb: u32,
}

impl From<&EngineConfig> for DecoderParams {
    fn from(config: &EngineConfig) -> Self {
        Self {
            beam_size: config.beam_size,
            normalize: config.normalize,
            mini_batch: config.mini_batch,
            maxi_batch: config.maxi_batch,
            workspace_mb: config.workspace_mb,
        }
    }
}

/// Runs `marian-decoder`.
#[derive(Debug, Clone)]
pub struct MarianDecoder {
    pub program: String,
    pub params: DecoderParams,
}

impl MarianDecoder {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            program: config.decoder_bin.clone(),
            params: DecoderParams::from(config),
        }
    }

    pub fn command(&self, job: &DecodeJob) -> CommandSpec {
        let p = &self.params;
        CommandSpec::new(&self.program)
            .opt("--beam-size", p.beam_size)
            .opt_path("--config", &job.config)
            .opt_path("--input", &job.input)
            .opt_path("--log", &job.log)
            .opt("--maxi-batch", p.maxi_batch)
            .opt("--maxi-batch-sort", "src")
            .opt("--mini-batch", p.mini_batch)
            .opt_path("--models", &job.model)
            .opt("--normalize", p.normalize)
            .opt_path("--output", &job.output)
            .opt("--workspace", p.workspace_mb)
    }
}

#[async_trait]
impl Decoder for MarianDecoder {
    async fn decode(&self, job: &DecodeJob) -> Result<(), LabError> {
        if let Some(parent) = job.output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        info!(input = %job.input.display(), output = %job.output.display(), "Decoding");
        command::run(&self.command(job)).await?;
        Ok(())
    }
}

/// Runs `spm_train` with the ids and limits the engine expects.
#[derive(Debug, Clone)]
pub struct SentencePieceTrainer {
    pub program: String,
}

impl SentencePieceTrainer {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            program: config.vocab_bin.clone(),
        }
    }

    pub fn command(&self, job: &VocabJob, input: &Path) -> CommandSpec {
        let s = &job.settings;
        let flag = |name: &str, value: String| format!("--{name}={value}");
        CommandSpec::new(&self.program)
            .arg(flag("input", input.to_string_lossy().into_owned()))
            .arg(flag("model_prefix", job.output.to_string_lossy().into_owned()))
            .arg(flag("vocab_size", s.vocab_size.to_string()))
            .arg(flag("character_coverage", s.character_coverage.to_string()))
            .arg(flag("input_sentence_size", s.max_lines.to_string()))
            .arg(flag("shuffle_input_sentence", "true".to_string()))
            .arg(flag("max_sentence_length", s.max_sentence_length.to_string()))
            .arg(flag("bos_id", "-1".to_string()))
            .arg(flag("eos_id", "0".to_string()))
            .arg(flag("unk_id", "1".to_string()))
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn write_sentences(inputs: Vec<PathBuf>, dest: &Path) -> Result<u64, LabError> {
    let mut writer = BufWriter::new(File::create(dest)?);
    let mut count = 0;
    for sentence in SentenceStream::new(inputs) {
        writer.write_all(sentence?.as_bytes())?;
        writer.write_all(b"\n")?;
        count += 1;
    }
    writer.flush()?;
    Ok(count)
}

#[async_trait]
impl VocabBuilder for SentencePieceTrainer {
    async fn build(&self, job: &VocabJob) -> Result<PathBuf, LabError> {
        if let Some(parent) = job.output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let input = with_suffix(&job.output, ".input.txt");
        let (inputs, dest) = (job.inputs.clone(), input.clone());
        let sentences = tokio::task::spawn_blocking(move || write_sentences(inputs, &dest))
            .await
            .map_err(|e| LabError::Io(std::io::Error::other(e)))??;
        info!(sentences, vocab_size = job.settings.vocab_size, "Training shared vocabulary");

        let result = command::run(&self.command(job, &input)).await;
        let _ = tokio::fs::remove_file(&input).await;
        result?;

        let model = with_suffix(&job.output, ".model");
        if !model.is_file() {
            return Err(LabError::MissingArtifact(model));
        }
        tokio::fs::rename(&model, &job.output).await?;
        let _ = tokio::fs::remove_file(with_suffix(&job.output, ".vocab")).await;
        Ok(job.output.clone())
    }
}
