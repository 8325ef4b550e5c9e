//! External translation engine collaborators.
//!
//! Training, decoding and vocabulary building are each a trait so the
//! orchestrator and score aggregator can run against counting fakes. The
//! subprocess implementations live in [`marian`].

pub mod config;
pub mod marian;

pub use config::{EngineFileConfig, VocabSettings, configure_base, materialize_fold_config};
pub use marian::{MarianDecoder, MarianEngine, SentencePieceTrainer};

use crate::error::LabError;
use async_trait::async_trait;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::PathBuf;

/// One fold's training invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainJob {
    pub fold: u32,
    pub config: PathBuf,
    pub model: PathBuf,
    pub log: PathBuf,
    pub valid_log: PathBuf,
    pub valid_translation_output: PathBuf,
    /// Source then target file.
    pub train_sets: Vec<PathBuf>,
    pub valid_sets: Vec<PathBuf>,
}

/// One decoding run over an input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeJob {
    pub config: PathBuf,
    pub model: PathBuf,
    pub input: PathBuf,
    pub output: PathBuf,
    pub log: PathBuf,
}

/// A shared subword vocabulary build.
#[derive(Debug, Clone, PartialEq)]
pub struct VocabJob {
    /// Final vocabulary path.
    pub output: PathBuf,
    /// Training files to stream sentences from.
    pub inputs: Vec<PathBuf>,
    pub settings: VocabSettings,
}

/// Trains a translation model.
#[async_trait]
pub trait TranslationEngine: Send + Sync {
    async fn train(&self, job: &TrainJob) -> Result<(), LabError>;
}

/// Translates an input file with a trained model.
#[async_trait]
pub trait Decoder: Send + Sync {
    async fn decode(&self, job: &DecodeJob) -> Result<(), LabError>;
}

/// Builds the subword vocabulary shared by every fold.
#[async_trait]
pub trait VocabBuilder: Send + Sync {
    /// Returns the path of the vocabulary written.
    async fn build(&self, job: &VocabJob) -> Result<PathBuf, LabError>;
}

/// Lazily yields the lines of several files in order, without line endings.
pub struct SentenceStream {
    pending: std::vec::IntoIter<PathBuf>,
    current: Option<Lines<BufReader<File>>>,
}

impl SentenceStream {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            pending: paths.into_iter(),
            current: None,
        }
    }
}

impl Iterator for SentenceStream {
    type Item = Result<String, LabError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(lines) = self.current.as_mut() {
                match lines.next() {
                    Some(Ok(line)) => return Some(Ok(line.trim_end().to_string())),
                    Some(Err(e)) => return Some(Err(e.into())),
                    None => self.current = None,
                }
            }
            let path = self.pending.next()?;
            match File::open(&path) {
                Ok(file) => self.current = Some(BufReader::new(file).lines()),
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sentence_stream_spans_files() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.en");
        let b = dir.path().join("b.en");
        std::fs::write(&a, "one\ntwo  \n").unwrap();
        std::fs::write(&b, "three\n").unwrap();

        let lines: Vec<String> = SentenceStream::new(vec![a, b])
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(lines, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_sentence_stream_reports_missing_file() {
        let dir = TempDir::new().unwrap();
        let mut stream = SentenceStream::new(vec![dir.path().join("missing")]);
        assert!(matches!(stream.next(), Some(Err(LabError::Io(_)))));
    }
}
