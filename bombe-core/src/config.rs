//! Configuration system for Bombe.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> environment -> explicit overrides.

use crate::error::ConfigError;
use crate::paths::DirectoryTemplates;
use crate::session::SessionSettings;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the workspace-level configuration file.
pub const WORKSPACE_CONFIG_FILE: &str = "bombe.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BombeConfig {
    /// Root under which sessions and the registry live.
    pub experiments_dir: PathBuf,
    /// Registry file name inside `experiments_dir`.
    pub registry_file: String,
    /// Directory templates for new sessions. Defaults to
    /// `<experiments_dir>/{session}/<kind>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directories: Option<DirectoryTemplates>,
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub split: SplitConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub pool: PoolConfig,
}

impl Default for BombeConfig {
    fn default() -> Self {
        Self {
            experiments_dir: PathBuf::from("/experiments"),
            registry_file: "bombe-sessions.json".to_string(),
            directories: None,
            corpus: CorpusConfig::default(),
            split: SplitConfig::default(),
            engine: EngineConfig::default(),
            scoring: ScoringConfig::default(),
            monitor: MonitorConfig::default(),
            pool: PoolConfig::default(),
        }
    }
}

impl BombeConfig {
    pub fn registry_path(&self) -> PathBuf {
        self.experiments_dir.join(&self.registry_file)
    }

    pub fn directory_templates(&self) -> DirectoryTemplates {
        self.directories
            .clone()
            .unwrap_or_else(|| DirectoryTemplates::under(&self.experiments_dir))
    }

    /// Settings for a session created under this configuration.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            directories: self.directory_templates(),
            classified_label: self.corpus.classified_label.clone(),
            unclassified_label: self.corpus.unclassified_label.clone(),
            data_dir: self.corpus.data_dir.clone(),
        }
    }

    /// Reject values no component can work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.split.k == 0 {
            return Err(ConfigError::invalid("split.k must be at least 1"));
        }
        if !(self.split.test_fraction > 0.0 && self.split.test_fraction < 1.0) {
            return Err(ConfigError::invalid(format!(
                "split.test_fraction must be in (0, 1), got {}",
                self.split.test_fraction
            )));
        }
        if self.monitor.poll_interval_secs == 0 {
            return Err(ConfigError::invalid("monitor.poll_interval_secs must be positive"));
        }
        if self.monitor.gap_threshold_secs <= 0.0 {
            return Err(ConfigError::invalid("monitor.gap_threshold_secs must be positive"));
        }
        if self.pool.workers == 0 {
            return Err(ConfigError::invalid("pool.workers must be at least 1"));
        }
        Ok(())
    }
}

/// Corpus location and labelling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusConfig {
    /// Default language pair for new sessions.
    pub langs: String,
    pub classified_label: String,
    pub unclassified_label: String,
    pub data_dir: PathBuf,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            langs: "en-cy".to_string(),
            classified_label: "Health".to_string(),
            unclassified_label: "Unknown".to_string(),
            data_dir: PathBuf::from("data/src"),
        }
    }
}

/// Train/validation/test splitting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitConfig {
    /// Number of folds.
    pub k: u32,
    /// Fraction of the classified rows held out.
    pub test_fraction: f64,
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            k: 10,
            test_fraction: 0.1,
            seed: 42,
        }
    }
}

/// External engine, decoder and vocabulary builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub trainer_bin: String,
    pub decoder_bin: String,
    pub vocab_bin: String,
    /// Base training config template; the built-in template is used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_template: Option<PathBuf>,
    pub beam_size: u32,
    pub normalize: f64,
    pub mini_batch: u32,
    pub maxi_batch: u32,
    /// Decoder workspace in MB.
    pub workspace_mb: u32,
    /// Vocabulary size used when the base config has no `dim-vocabs`.
    pub vocab_size: u32,
    /// Sentence limit for vocabulary training.
    pub vocab_max_lines: u64,
    pub character_coverage: f64,
    pub max_sentence_length: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trainer_bin: "marian".to_string(),
            decoder_bin: "marian-decoder".to_string(),
            vocab_bin: "spm_train".to_string(),
            config_template: None,
            beam_size: 6,
            normalize: 0.6,
            mini_batch: 64,
            maxi_batch: 100,
            workspace_mb: 6000,
            vocab_size: 32000,
            vocab_max_lines: 2_000_000,
            character_coverage: 1.0,
            max_sentence_length: 2048,
        }
    }
}

/// Scoring and review sampling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Number of aligned segments written to the review report.
    pub sample_size: usize,
    /// Fixed sampling seed; entropy-seeded when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_seed: Option<u64>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            sample_size: 381,
            sample_seed: None,
        }
    }
}

/// Log monitor polling and gap correction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub poll_interval_secs: u64,
    /// Intervals between log records longer than this count as stalls.
    pub gap_threshold_secs: f64,
    pub log_filename: String,
    /// Emit learning-rate and device series from training records.
    pub lr_report: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            gap_threshold_secs: 1200.0,
            log_filename: "marian.log".to_string(),
            lr_report: true,
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Worker pool for per-file corpus jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub workers: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

/// User-level config file (`~/.config/bombe/config.toml` on Linux).
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("org", "bombe", "bombe")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `BOMBE_`, nested with `__`)
/// 3. Workspace-local config (`bombe.toml`)
/// 4. User config
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&BombeConfig>,
) -> Result<BombeConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(BombeConfig::default()));

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(WORKSPACE_CONFIG_FILE);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // BOMBE_EXPERIMENTS_DIR, BOMBE_SPLIT__K, BOMBE_MONITOR__LOG_FILENAME, ...
    figment = figment.merge(Env::prefixed("BOMBE_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    let config: BombeConfig = figment.extract().map_err(Box::new)?;
    config.validate()?;
    Ok(config)
}
