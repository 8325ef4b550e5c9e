//! # Bombe Core
//!
//! Experiment sessions for k-fold NMT training runs: the session model and
//! its durable registry, per-session directory layout, fold result records
//! and layered configuration.

pub mod config;
pub mod error;
pub mod paths;
pub mod persistence;
pub mod registry;
pub mod results;
pub mod session;

// Re-export commonly used types at the crate root.
pub use config::{BombeConfig, load_config};
pub use error::{ConfigError, RegistryError, SessionError};
pub use paths::{DirKind, DirectoryTemplates, SessionPaths};
pub use registry::{CURRENT_KEY, SessionListing, SessionStore};
pub use results::{FoldResult, MetricScore, SegmentStats, SizeStats};
pub use session::{LanguagePair, Session, SessionId, SessionSettings};
