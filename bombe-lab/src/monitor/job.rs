//! Monitoring of a single training job's log.

use super::cursor::LogCursor;
use super::gap::GapCorrector;
use super::sink::{MetricPoint, MetricsSink};
use crate::error::LabError;
use crate::logparse::{LogLine, TrainRecord, ValidRecord, classify, lossy_lines};
use bombe_core::config::MonitorConfig;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};

/// Subdirectory of a job directory holding monitor output.
pub const STATUS_DIR: &str = "tb";
pub const CURSOR_FILENAME: &str = "monitor-status.json";
pub const METRICS_FILENAME: &str = "metrics.jsonl";

/// What one update cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    pub lines: u64,
    pub points: usize,
    pub malformed: usize,
}

/// Incrementally turns one job's log into metric points.
pub struct JobMonitor {
    job_dir: PathBuf,
    log: PathBuf,
    cursor_path: PathBuf,
    cursor: LogCursor,
    corrector: GapCorrector,
    lr_report: bool,
    sink: Box<dyn MetricsSink>,
}

/// `<job>/tb/monitor-status.json`.
pub fn cursor_path(job_dir: &Path) -> PathBuf {
    job_dir.join(STATUS_DIR).join(CURSOR_FILENAME)
}

/// `<job>/tb/metrics.jsonl`.
pub fn metrics_path(job_dir: &Path) -> PathBuf {
    job_dir.join(STATUS_DIR).join(METRICS_FILENAME)
}

fn modified_secs(path: &Path) -> Result<f64, LabError> {
    let modified = std::fs::metadata(path)?.modified()?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0))
}

impl JobMonitor {
    /// Monitor `<job_dir>/<log_filename>`, resuming from a saved cursor.
    pub fn open(
        job_dir: &Path,
        config: &MonitorConfig,
        sink: Box<dyn MetricsSink>,
    ) -> Result<Self, LabError> {
        let cursor_path = cursor_path(job_dir);
        let cursor = LogCursor::load(&cursor_path)?;
        Ok(Self {
            job_dir: job_dir.to_path_buf(),
            log: job_dir.join(&config.log_filename),
            cursor_path,
            cursor,
            corrector: GapCorrector::new(config.gap_threshold_secs),
            lr_report: config.lr_report,
            sink,
        })
    }

    pub fn job_dir(&self) -> &Path {
        &self.job_dir
    }

    pub fn cursor(&self) -> &LogCursor {
        &self.cursor
    }

    /// Whether the log changed since the last update.
    pub fn update_needed(&self) -> Result<bool, LabError> {
        let modified = modified_secs(&self.log)?;
        Ok(self.cursor.last_modified.is_none_or(|last| modified > last))
    }

    /// Process new log lines and checkpoint-average logs, then persist the cursor.
    pub fn update(&mut self) -> Result<UpdateSummary, LabError> {
        let mut summary = UpdateSummary {
            points: self.update_averages()?,
            ..UpdateSummary::default()
        };

        if self.update_needed()? {
            let modified = modified_secs(&self.log)?;
            self.read_new_lines(&mut summary)?;
            self.cursor.last_modified = Some(modified);
            debug!(
                job = %self.job_dir.display(),
                lines = summary.lines,
                points = summary.points,
                last_line = ?self.cursor.last_line,
                "Updated job monitor"
            );
        }

        self.sink.flush()?;
        self.cursor.save(&self.cursor_path)?;
        Ok(summary)
    }

    fn read_new_lines(&mut self, summary: &mut UpdateSummary) -> Result<(), LabError> {
        let mut reader = BufReader::new(File::open(&self.log)?);
        let first = self.cursor.next_line();
        let mut index = 0u64;
        let mut bytes = Vec::new();
        loop {
            bytes.clear();
            if reader.read_until(b'\n', &mut bytes)? == 0 {
                break;
            }
            // A line without its newline is still being written.
            if bytes.last() != Some(&b'\n') {
                break;
            }
            if index >= first {
                let line = String::from_utf8_lossy(&bytes);
                self.process_line(index, line.trim_end(), summary)?;
                self.cursor.last_line = Some(index);
                summary.lines += 1;
            }
            index += 1;
        }
        Ok(())
    }

    fn process_line(
        &mut self,
        index: u64,
        line: &str,
        summary: &mut UpdateSummary,
    ) -> Result<(), LabError> {
        match classify(line) {
            LogLine::Train(record) => summary.points += self.emit_train(&record)?,
            LogLine::Valid(record) => summary.points += self.emit_valid(&record)?,
            LogLine::Devices(count) => self.cursor.gpus = count,
            LogLine::Malformed(reason) => {
                summary.malformed += 1;
                warn!(
                    job = %self.job_dir.display(),
                    line = index + 1,
                    %reason,
                    "Skipping log line"
                );
            }
            LogLine::Other => {}
        }
        Ok(())
    }

    fn emit(
        &mut self,
        series: &str,
        value: f64,
        step: u64,
        wall_time: Option<f64>,
    ) -> Result<usize, LabError> {
        self.sink.emit(MetricPoint::new(series, value, step, wall_time))?;
        Ok(1)
    }

    fn emit_train(&mut self, record: &TrainRecord) -> Result<usize, LabError> {
        let wall = Some(self.corrector.correct(&mut self.cursor.gap, record.wall_time));
        let raw = Some(record.wall_time);
        let up = record.update;
        let diff = record.sentences as f64 - self.cursor.last_sentences as f64;
        self.cursor.last_sentences = record.sentences;

        let mut n = 0;
        n += self.emit("train/epoch", record.epoch as f64, up, wall)?;
        n += self.emit("train/wall-clock", record.wall_time, up, raw)?;
        n += self.emit("train/sentences", record.sentences as f64, up, wall)?;
        n += self.emit("train/sentences-diff", diff, up, wall)?;
        n += self.emit("train/cost", record.cost, up, wall)?;
        n += self.emit("train/time[sec]", record.elapsed, up, wall)?;
        n += self.emit("train/speed[words per sec]", record.words_per_sec, up, wall)?;
        if self.lr_report {
            if let Some(lr) = record.learning_rate {
                n += self.emit("train/learning_rate", lr, up, wall)?;
            }
            n += self.emit("train/gpus", self.cursor.gpus as f64, up, wall)?;
        }
        Ok(n)
    }

    fn emit_valid(&mut self, record: &ValidRecord) -> Result<usize, LabError> {
        let wall = Some(self.corrector.correct(&mut self.cursor.gap, record.wall_time));
        let stalled = record.stalled.unwrap_or(0);
        let mut n = self.emit(
            &format!("valid/{}", record.metric),
            record.value,
            record.update,
            wall,
        )?;
        n += self.emit(
            &format!("valid/{}_stalled", record.metric),
            f64::from(stalled),
            record.update,
            wall,
        )?;
        Ok(n)
    }

    /// Emit new `(step, score)` pairs from `avg-*.log` files in the job directory.
    fn update_averages(&mut self) -> Result<usize, LabError> {
        let Ok(entries) = std::fs::read_dir(&self.job_dir) else {
            return Ok(0);
        };
        let mut files: Vec<(String, PathBuf)> = entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                if !name.starts_with("avg-") {
                    return None;
                }
                let stem = name.strip_suffix(".log")?;
                Some((stem.to_string(), entry.path()))
            })
            .collect();
        files.sort();

        let mut emitted = 0;
        for (name, path) in files {
            let reader = BufReader::new(File::open(&path)?);
            for line in lossy_lines(reader) {
                let line = line?;
                let mut words = line.split_whitespace();
                let (Some(label), Some(score)) = (words.next(), words.next()) else {
                    continue;
                };
                let (Some(step), Ok(score)) = (
                    label.split('-').nth(2).and_then(|s| s.parse::<u64>().ok()),
                    score.parse::<f64>(),
                ) else {
                    continue;
                };
                let seen = self.cursor.averages.get(&name);
                if seen.is_some_and(|&last| step <= last) {
                    continue;
                }
                let series = format!("valid-avg/{name}_bleu");
                self.sink.emit(MetricPoint::new(series, score, step, None))?;
                self.cursor.averages.insert(name.clone(), step);
                emitted += 1;
            }
        }
        Ok(emitted)
    }
}
