//! Metric sinks.

use crate::error::LabError;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// One time-series point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub series: String,
    pub value: f64,
    pub step: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wall_time: Option<f64>,
}

impl MetricPoint {
    pub fn new(series: impl Into<String>, value: f64, step: u64, wall_time: Option<f64>) -> Self {
        Self {
            series: series.into(),
            value,
            step,
            wall_time,
        }
    }
}

/// Destination for metric points.
pub trait MetricsSink: Send {
    fn emit(&mut self, point: MetricPoint) -> Result<(), LabError>;

    fn flush(&mut self) -> Result<(), LabError> {
        Ok(())
    }
}

/// Appends points as JSON lines to a file.
pub struct JsonlSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonlSink {
    pub fn open(path: &Path) -> Result<Self, LabError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetricsSink for JsonlSink {
    fn emit(&mut self, point: MetricPoint) -> Result<(), LabError> {
        serde_json::to_writer(&mut self.writer, &point)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), LabError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Collects points in memory; clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    points: Arc<Mutex<Vec<MetricPoint>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn points(&self) -> Vec<MetricPoint> {
        self.points
            .lock()
            .map(|points| points.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn len(&self) -> usize {
        self.points().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Points of one series, in emission order.
    pub fn series(&self, name: &str) -> Vec<MetricPoint> {
        self.points().into_iter().filter(|p| p.series == name).collect()
    }
}

impl MetricsSink for MemorySink {
    fn emit(&mut self, point: MetricPoint) -> Result<(), LabError> {
        match self.points.lock() {
            Ok(mut points) => points.push(point),
            Err(poisoned) => poisoned.into_inner().push(point),
        }
        Ok(())
    }
}
