//! Fold scoring against the held-out test set.
//!
//! Decoding is the expensive step, so its result is cached per fold: once the
//! reference and hypothesis copies exist under `<work>/split_k/`, later calls
//! score from the cache without running the decoder again.

use crate::corpus::normalize;
use crate::engine::{DecodeJob, Decoder};
use crate::error::LabError;
use crate::layout::FoldLayout;
use crate::metrics::{LayeredMetrics, error_rates, quality_scores};
use bombe_core::config::ScoringConfig;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Computes the layered metrics for a trained fold.
pub struct ScoreAggregator {
    decoder: Arc<dyn Decoder>,
    sample_size: usize,
    sample_seed: Option<u64>,
}

impl ScoreAggregator {
    pub fn new(decoder: Arc<dyn Decoder>, sample_size: usize, sample_seed: Option<u64>) -> Self {
        Self {
            decoder,
            sample_size,
            sample_seed,
        }
    }

    pub fn from_config(decoder: Arc<dyn Decoder>, config: &ScoringConfig) -> Self {
        Self::new(decoder, config.sample_size, config.sample_seed)
    }

    /// Score the fold's best model on the test set.
    ///
    /// Quality metrics take priority over error rates in the returned lookup.
    pub async fn score(&self, layout: &FoldLayout) -> Result<LayeredMetrics, LabError> {
        let source = layout.test_set(&layout.langs.source);
        let reference = layout.test_set(&layout.langs.target);
        let ref_cache = layout.reference_cache();
        let hyp_cache = layout.hypothesis_cache();

        if ref_cache.is_file() && hyp_cache.is_file() {
            debug!(fold = layout.fold, "Reusing cached decoder output");
        } else {
            for path in [&source, &reference, &layout.best_model] {
                if !path.is_file() {
                    return Err(LabError::MissingArtifact(path.clone()));
                }
            }
            let job = DecodeJob {
                config: layout.decoder_config.clone(),
                model: layout.best_model.clone(),
                input: source.clone(),
                output: layout.decoder_output(),
                log: layout.decoder_log.clone(),
            };
            self.decoder.decode(&job).await?;
            if !job.output.is_file() {
                return Err(LabError::MissingArtifact(job.output));
            }
            tokio::fs::copy(&reference, &ref_cache).await?;
            tokio::fs::copy(&job.output, &hyp_cache).await?;
        }

        let references = read_lines(&ref_cache).await?;
        let hypotheses = read_lines(&hyp_cache).await?;
        if references.len() != hypotheses.len() {
            return Err(LabError::scoring(format!(
                "fold {}: {} references but {} hypotheses",
                layout.fold,
                references.len(),
                hypotheses.len()
            )));
        }
        if references.is_empty() {
            return Err(LabError::scoring(format!("fold {}: empty test set", layout.fold)));
        }

        if source.is_file() {
            let sources = read_lines(&source).await?;
            let mut rng = match self.sample_seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            let report = review_report(
                &sources,
                &references,
                &hypotheses,
                self.sample_size,
                &mut rng,
            );
            tokio::fs::write(layout.review_report(), report).await?;
        }

        let metrics = LayeredMetrics::new(
            quality_scores(&hypotheses, &references),
            error_rates(&hypotheses, &references),
        );
        info!(
            fold = layout.fold,
            segments = references.len(),
            bleu = metrics.score("BLEU").unwrap_or_default(),
            "Scored fold"
        );
        Ok(metrics)
    }
}

async fn read_lines(path: &Path) -> Result<Vec<String>, LabError> {
    let text = tokio::fs::read_to_string(path).await?;
    Ok(text.lines().map(|line| line.trim().to_string()).collect())
}

/// Review blocks for up to `n` distinct source segments.
///
/// Segments are numbered from 1. When a source sentence repeats, its last
/// occurrence is used.
pub fn review_report(
    sources: &[String],
    references: &[String],
    hypotheses: &[String],
    n: usize,
    rng: &mut StdRng,
) -> String {
    let mut by_text: HashMap<String, usize> = HashMap::new();
    for (i, text) in sources.iter().enumerate() {
        by_text.insert(normalize(text), i);
    }
    let mut texts: Vec<&String> = by_text.keys().collect();
    texts.sort();

    let rule = "-".repeat(80);
    texts
        .choose_multiple(rng, n)
        .map(|text| {
            let i = by_text[*text];
            let reference = references.get(i).map(|s| normalize(s)).unwrap_or_default();
            let hypothesis = hypotheses.get(i).map(|s| normalize(s)).unwrap_or_default();
            format!(
                "{rule}\n\nSEGMENT: {}\nsrc: {text}\nref: {reference}\nhyp: {hypothesis}\n\n\
                 REF PROBLEMUS:\nHYP PROBLEMUS:\nSYLW:\n\n\n",
                i + 1
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_review_report_block_layout() {
        let mut rng = StdRng::seed_from_u64(1);
        let (sources, refs, hyps) = (
            lines(&["bore da"]),
            lines(&["good morning"]),
            lines(&["morning"]),
        );
        let report = review_report(&sources, &refs, &hyps, 5, &mut rng);
        let expected = format!(
            "{}\n\nSEGMENT: 1\nsrc: bore da\nref: good morning\nhyp: morning\n\n\
             REF PROBLEMUS:\nHYP PROBLEMUS:\nSYLW:\n\n\n",
            "-".repeat(80)
        );
        assert_eq!(report, expected);
    }

    #[test]
    fn test_review_report_blocks() {
        let sources = lines(&["hello", "world", "hello"]);
        let refs = lines(&["helo", "byd", "helo eto"]);
        let hyps = lines(&["helo", "bid", "helo"]);
        let mut rng = StdRng::seed_from_u64(7);
        let report = review_report(&sources, &refs, &hyps, 381, &mut rng);

        // Two distinct sources, so two blocks even though 381 were asked for.
        assert_eq!(report.matches("SEGMENT:").count(), 2);
        assert!(report.contains("SEGMENT: 3\nsrc: hello\nref: helo eto\nhyp: helo\n"));
        assert!(report.contains("SEGMENT: 2\nsrc: world\nref: byd\nhyp: bid\n"));
        assert!(report.contains("REF PROBLEMUS:\nHYP PROBLEMUS:\nSYLW:\n"));
    }

    #[test]
    fn test_review_report_sample_is_seeded() {
        let sources: Vec<String> = (0..50).map(|i| format!("s{i}")).collect();
        let refs = sources.clone();
        let hyps = sources.clone();
        let a = review_report(&sources, &refs, &hyps, 5, &mut StdRng::seed_from_u64(1));
        let b = review_report(&sources, &refs, &hyps, 5, &mut StdRng::seed_from_u64(1));
        assert_eq!(a, b);
        assert_eq!(a.matches("SEGMENT:").count(), 5);
    }
}
