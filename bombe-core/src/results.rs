//! Per-fold result records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One metric value with an optional reproducibility signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricScore {
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl MetricScore {
    pub fn new(score: f64) -> Self {
        Self {
            score,
            signature: None,
        }
    }

    pub fn signed(score: f64, signature: impl Into<String>) -> Self {
        Self {
            score,
            signature: Some(signature.into()),
        }
    }
}

/// Size statistics for one directory tree, in megabytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SizeStats {
    pub total_mb: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sizes_mb: BTreeMap<String, f64>,
}

/// Sentence and word counts over the split corpus files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentStats {
    pub n_sentences: u64,
    pub n_words: u64,
}

/// Everything recorded about one trained and scored fold.
///
/// Written once, after scoring, and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldResult {
    pub scores: BTreeMap<String, MetricScore>,
    #[serde(default)]
    pub file_sizes: BTreeMap<String, SizeStats>,
    #[serde(default)]
    pub segments: SegmentStats,
    /// Training duration in hours, when the engine log has both a start and
    /// a `finished` timestamp.
    #[serde(default)]
    pub duration_hours: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

impl FoldResult {
    pub fn new(scores: BTreeMap<String, MetricScore>) -> Self {
        Self {
            scores,
            file_sizes: BTreeMap::new(),
            segments: SegmentStats::default(),
            duration_hours: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn score(&self, metric: &str) -> Option<f64> {
        self.scores.get(metric).map(|m| m.score)
    }

    /// Copy without the per-file size maps, keeping directory totals.
    pub fn summarized(&self) -> Self {
        let mut summary = self.clone();
        for stats in summary.file_sizes.values_mut() {
            stats.sizes_mb.clear();
        }
        summary
    }
}
