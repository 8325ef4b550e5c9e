//! Log monitor: discovers training job logs and streams their metrics.
//!
//! Each poll walks the monitored roots for files named like the configured
//! log file. A job directory gets a [`JobMonitor`] when its log first
//! appears and loses it once the log is gone. Failures in one job are
//! logged and never stop the others.

pub mod cursor;
pub mod gap;
pub mod job;
pub mod sink;

pub use cursor::LogCursor;
pub use gap::{GapCorrector, GapState};
pub use job::{JobMonitor, UpdateSummary, cursor_path, metrics_path};
pub use sink::{JsonlSink, MemorySink, MetricPoint, MetricsSink};

use crate::error::LabError;
use bombe_core::config::MonitorConfig;
use bombe_core::{DirKind, SessionStore};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Roots to watch when none are given: every registered session's log
/// directory that exists, or `fallback` when there are none.
pub fn default_roots(store: &SessionStore, fallback: &Path) -> Result<Vec<PathBuf>, LabError> {
    let mut roots: Vec<PathBuf> = store
        .list(0, true)?
        .into_iter()
        .map(|listing| listing.session.paths().dir(DirKind::Logs).to_path_buf())
        .filter(|dir| dir.is_dir())
        .collect();
    roots.sort();
    roots.dedup();
    if roots.is_empty() {
        roots.push(fallback.to_path_buf());
    }
    Ok(roots)
}

/// Creates the sink for a newly discovered job directory.
pub type SinkFactory = Box<dyn Fn(&Path) -> Result<Box<dyn MetricsSink>, LabError> + Send + Sync>;

/// Totals for one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub jobs: usize,
    pub added: usize,
    pub removed: usize,
    pub lines: u64,
    pub points: usize,
    pub failed: usize,
}

pub struct LogMonitor {
    roots: Vec<PathBuf>,
    config: MonitorConfig,
    monitors: BTreeMap<PathBuf, JobMonitor>,
    sink_factory: SinkFactory,
}

impl LogMonitor {
    pub fn new(roots: Vec<PathBuf>, config: MonitorConfig, sink_factory: SinkFactory) -> Self {
        Self {
            roots,
            config,
            monitors: BTreeMap::new(),
            sink_factory,
        }
    }

    /// Monitor writing each job's points to `<job>/tb/metrics.jsonl`.
    pub fn with_jsonl_sinks(roots: Vec<PathBuf>, config: MonitorConfig) -> Self {
        Self::new(
            roots,
            config,
            Box::new(|job_dir: &Path| {
                let sink: Box<dyn MetricsSink> = Box::new(JsonlSink::open(&metrics_path(job_dir))?);
                Ok(sink)
            }),
        )
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Job directories currently monitored.
    pub fn jobs(&self) -> impl Iterator<Item = &Path> {
        self.monitors.keys().map(PathBuf::as_path)
    }

    /// Directories under the roots containing a log file.
    pub fn discover(&self) -> BTreeSet<PathBuf> {
        let mut found = BTreeSet::new();
        for root in &self.roots {
            for entry in WalkDir::new(root).into_iter().flatten() {
                let is_log = entry.file_type().is_file()
                    && entry.file_name() == self.config.log_filename.as_str();
                if is_log {
                    if let Some(parent) = entry.path().parent() {
                        found.insert(parent.to_path_buf());
                    }
                }
            }
        }
        found
    }

    /// One discovery and update cycle.
    pub fn poll_once(&mut self) -> PollSummary {
        let mut summary = PollSummary::default();
        let found = self.discover();

        let before = self.monitors.len();
        self.monitors.retain(|job, _| found.contains(job));
        summary.removed = before - self.monitors.len();

        for job_dir in found {
            if self.monitors.contains_key(&job_dir) {
                continue;
            }
            let opened = (self.sink_factory)(&job_dir)
                .and_then(|sink| JobMonitor::open(&job_dir, &self.config, sink));
            match opened {
                Ok(monitor) => {
                    info!(job = %job_dir.display(), "Monitoring job log");
                    self.monitors.insert(job_dir, monitor);
                    summary.added += 1;
                }
                Err(e) => {
                    warn!(job = %job_dir.display(), error = %e, "Cannot monitor job");
                    summary.failed += 1;
                }
            }
        }

        for (job_dir, monitor) in &mut self.monitors {
            match monitor.update() {
                Ok(update) => {
                    summary.lines += update.lines;
                    summary.points += update.points;
                }
                Err(e) => {
                    warn!(job = %job_dir.display(), error = %e, "Job monitor update failed");
                    summary.failed += 1;
                }
            }
        }
        summary.jobs = self.monitors.len();
        debug!(?summary, "Poll cycle finished");
        summary
    }

    /// Poll at the configured interval until `shutdown` resolves.
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let interval = self.config.poll_interval();
        info!(roots = ?self.roots, interval_secs = interval.as_secs(), "Log monitor started");
        tokio::pin!(shutdown);
        loop {
            self.poll_once();
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        info!("Log monitor stopped");
    }
}
