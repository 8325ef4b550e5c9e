//! # bombe-lab: corpus preparation, k-fold training, scoring and monitoring
//!
//! Turns raw bitext into cleaned exports and train/valid/test splits, drives
//! an external NMT engine over each fold of a session, scores the results
//! against the held-out test set, and streams training logs into metric
//! series while jobs run.

// Foundation
pub mod command;
pub mod error;
pub mod pool;

// Corpus preparation
pub mod corpus;
pub mod splitting;

// Training and scoring
pub mod engine;
pub mod layout;
pub mod metrics;
pub mod publish;
pub mod scoring;
pub mod stats;
pub mod training;

// Log monitoring
pub mod logparse;
pub mod monitor;

// Re-exports
pub use corpus::{BitextFormat, BitextRow, CleanReport, export_and_clean, load_corpus};
pub use engine::{DecodeJob, Decoder, TrainJob, TranslationEngine, VocabBuilder, VocabJob};
pub use error::LabError;
pub use layout::{FoldLayout, SharedLayout};
pub use metrics::LayeredMetrics;
pub use monitor::{LogMonitor, MetricPoint, MetricsSink};
pub use publish::{Published, publish_model};
pub use scoring::ScoreAggregator;
pub use splitting::{GroupLabels, SplitOutcome, SplitRole};
pub use training::{TrainingOrchestrator, TrainingState};
