//! Parsing of the engine's free-text training log.

use crate::error::LabError;
use chrono::NaiveDateTime;
use regex::{Captures, Regex};
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::LazyLock;

const TIMESTAMP: &str = r"^\[(?P<date>\d{4}-\d{2}-\d{2})\s+(?P<time>\d{2}:\d{2}:\d{2})\]\s+";

static TIMESTAMP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(TIMESTAMP).expect("valid timestamp regex"));

static TRAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = [
        TIMESTAMP,
        r"Ep\.\s+(?P<epoch>\d+)\s+:\s+Up\.\s+(?P<up>\d+)\s+:\s+",
        r"Sen\.\s+(?P<sent>[\d,]+)\s+:\s+Cost\s+(?P<cost>[\d.]+)[^:]*:\s+",
        r"Time\s+(?P<elapsed>[\d.]+)s\s+:\s+(?P<wps>[\d.]+)\s+words/s",
        r"(?:\s+:\s+gNorm\s+[\d.]+)?",
        r"(?:\s+:\s+L\.r\.\s+(?P<lr>[\d.]+(?:e[-+]?\d+)?))?",
    ]
    .concat();
    Regex::new(&pattern).expect("valid training record regex")
});

static VALID_RE: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = [
        TIMESTAMP,
        r"\[valid\]\s+Ep\.\s+(?P<epoch>\d+)\s+:\s+Up\.\s+(?P<up>\d+)\s+:\s+",
        r"(?P<metric>[\w-]+)\s+:\s+(?P<value>[\d.]+)\s+:\s+",
        r"(?:(?P<best>new best)|stalled\s+(?P<stalled>\d+))",
    ]
    .concat();
    Regex::new(&pattern).expect("valid validation record regex")
});

/// Seconds since the Unix epoch of a log timestamp, read as UTC.
pub fn parse_wall_time(date: &str, time: &str) -> Option<f64> {
    NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc().timestamp() as f64)
}

fn wall_time(caps: &Captures<'_>) -> Option<f64> {
    parse_wall_time(caps.name("date")?.as_str(), caps.name("time")?.as_str())
}

/// Timestamp at the start of `line`, if any.
pub fn line_wall_time(line: &str) -> Option<f64> {
    TIMESTAMP_RE.captures(line).and_then(|caps| wall_time(&caps))
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainRecord {
    pub wall_time: f64,
    pub epoch: u64,
    pub update: u64,
    pub sentences: u64,
    pub cost: f64,
    /// Seconds since the previous display line.
    pub elapsed: f64,
    pub words_per_sec: f64,
    pub learning_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidRecord {
    pub wall_time: f64,
    pub epoch: u64,
    pub update: u64,
    pub metric: String,
    pub value: f64,
    /// `None` for a new best, otherwise the stall counter.
    pub stalled: Option<u32>,
}

/// One classified log line.
#[derive(Debug, Clone, PartialEq)]
pub enum LogLine {
    Train(TrainRecord),
    Valid(ValidRecord),
    /// Number of devices listed after `--devices`.
    Devices(usize),
    Other,
    /// Looked like a record but did not parse.
    Malformed(String),
}

fn field<T: std::str::FromStr>(caps: &Captures<'_>, name: &str) -> Option<T> {
    caps.name(name)?.as_str().replace(',', "").parse().ok()
}

fn parse_train(line: &str) -> Option<TrainRecord> {
    let caps = TRAIN_RE.captures(line)?;
    Some(TrainRecord {
        wall_time: wall_time(&caps)?,
        epoch: field(&caps, "epoch")?,
        update: field(&caps, "up")?,
        sentences: field(&caps, "sent")?,
        cost: field(&caps, "cost")?,
        elapsed: field(&caps, "elapsed")?,
        words_per_sec: field(&caps, "wps")?,
        learning_rate: field(&caps, "lr"),
    })
}

fn parse_valid(line: &str) -> Option<ValidRecord> {
    let caps = VALID_RE.captures(line)?;
    let stalled = if caps.name("best").is_some() {
        None
    } else {
        Some(field(&caps, "stalled")?)
    };
    Some(ValidRecord {
        wall_time: wall_time(&caps)?,
        epoch: field(&caps, "epoch")?,
        update: field(&caps, "up")?,
        metric: caps.name("metric")?.as_str().to_string(),
        value: field(&caps, "value")?,
        stalled,
    })
}

fn count_devices(line: &str) -> usize {
    line.split_whitespace()
        .skip_while(|word| *word != "--devices")
        .skip(1)
        .take_while(|word| word.parse::<u32>().is_ok())
        .count()
}

/// Classify one log line.
pub fn classify(line: &str) -> LogLine {
    if line.contains("--devices") {
        LogLine::Devices(count_devices(line))
    } else if line.contains("[valid]") {
        match parse_valid(line) {
            Some(record) => LogLine::Valid(record),
            None => LogLine::Malformed("unrecognised validation record".to_string()),
        }
    } else if line.contains("] Ep. ") {
        match parse_train(line) {
            Some(record) => LogLine::Train(record),
            None => LogLine::Malformed("unrecognised training record".to_string()),
        }
    } else {
        LogLine::Other
    }
}

/// Lines of `reader` with invalid UTF-8 replaced rather than rejected.
///
/// Engine logs occasionally carry stray bytes from corpus text; one such
/// line must not hide the lines after it.
pub fn lossy_lines<R: BufRead>(reader: R) -> impl Iterator<Item = std::io::Result<String>> {
    reader.split(b'\n').map(|bytes| {
        bytes.map(|bytes| {
            let line = String::from_utf8_lossy(&bytes);
            line.strip_suffix('\r').unwrap_or(&*line).to_string()
        })
    })
}

/// Hours between the first timestamped line and the last timestamped line
/// mentioning `finished`. `None` when either is missing.
pub fn duration_hours(log: &Path) -> Result<Option<f64>, LabError> {
    let reader = BufReader::new(std::fs::File::open(log)?);
    let (mut start, mut finish) = (None, None);
    for line in lossy_lines(reader) {
        let line = line?;
        let Some(t) = line_wall_time(&line) else {
            continue;
        };
        if start.is_none() {
            start = Some(t);
        }
        if line.contains("finished") {
            finish = Some(t);
        }
    }
    Ok(match (start, finish) {
        (Some(start), Some(finish)) => Some((finish - start) / 3600.0),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TRAIN: &str = concat!(
        "[2023-03-01 12:00:00] Ep. 2 : Up. 1500 : Sen. 1,234,567 : ",
        "Cost 3.45678 * 912,345 @ 3,210 after 9,876,543 : Time 95.21s : ",
        "12345.67 words/s : gNorm 0.8123 : L.r. 2.8125e-04"
    );

    #[test]
    fn test_record_patterns_compile() {
        for pattern in [&*TIMESTAMP_RE, &*TRAIN_RE, &*VALID_RE] {
            assert!(pattern.capture_names().flatten().any(|name| name == "time"));
        }
        assert!(TRAIN_RE.capture_names().flatten().any(|name| name == "elapsed"));
    }

    #[test]
    fn test_parse_train_record() {
        let LogLine::Train(record) = classify(TRAIN) else {
            panic!("expected training record");
        };
        assert_eq!(record.epoch, 2);
        assert_eq!(record.update, 1500);
        assert_eq!(record.sentences, 1_234_567);
        assert_eq!(record.cost, 3.45678);
        assert_eq!(record.elapsed, 95.21);
        assert_eq!(record.words_per_sec, 12345.67);
        assert_eq!(record.learning_rate, Some(2.8125e-4));
        assert_eq!(record.wall_time, 1_677_672_000.0);
    }

    #[test]
    fn test_parse_train_without_learning_rate() {
        let line = concat!(
            "[2023-03-01 12:00:00] Ep. 1 : Up. 10 : Sen. 640 : ",
            "Cost 9.1 : Time 1.5s : 100.0 words/s"
        );
        let LogLine::Train(record) = classify(line) else {
            panic!("expected training record");
        };
        assert_eq!(record.sentences, 640);
        assert_eq!(record.learning_rate, None);
    }

    #[test]
    fn test_parse_valid_records() {
        let best = "[2023-03-01 13:00:00] [valid] Ep. 2 : Up. 5000 : bleu-detok : 21.37 : new best";
        let stalled = concat!(
            "[2023-03-01 14:00:00] [valid] Ep. 3 : Up. 10000 : ",
            "ce-mean-words : 2.1 : stalled 3 times (last best: 2.0)"
        );
        match classify(best) {
            LogLine::Valid(r) => {
                assert_eq!(r.metric, "bleu-detok");
                assert_eq!(r.value, 21.37);
                assert_eq!(r.stalled, None);
            }
            other => panic!("unexpected {other:?}"),
        }
        match classify(stalled) {
            LogLine::Valid(r) => assert_eq!((r.update, r.stalled), (10000, Some(3))),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_malformed_and_other_lines() {
        assert!(matches!(
            classify("[2023-03-01 12:00:00] [valid] Ep. 2 : garbled"),
            LogLine::Malformed(_)
        ));
        assert!(matches!(
            classify("[2023-03-01 12:00:00] Ep. 2 : Up. x"),
            LogLine::Malformed(_)
        ));
        assert_eq!(classify("[2023-03-01 12:00:00] Loading model"), LogLine::Other);
    }

    #[test]
    fn test_devices_line() {
        assert_eq!(
            classify("[2023-03-01 12:00:00] marian --devices 0 1 2 3 --seed 1"),
            LogLine::Devices(4)
        );
    }

    #[test]
    fn test_duration_hours() {
        let dir = tempfile::TempDir::new().unwrap();
        let log = dir.path().join("marian.log");
        std::fs::write(
            &log,
            "[2023-03-01 10:00:00] Starting\n\
             [2023-03-01 11:00:00] Ep. 1 : Up. 1\n\
             [2023-03-01 13:30:00] Training finished\n",
        )
        .unwrap();
        assert_eq!(duration_hours(&log).unwrap(), Some(3.5));

        std::fs::write(&log, "[2023-03-01 10:00:00] Starting\n").unwrap();
        assert_eq!(duration_hours(&log).unwrap(), None);
    }

    #[test]
    fn test_invalid_utf8_does_not_hide_later_lines() {
        let dir = tempfile::TempDir::new().unwrap();
        let log = dir.path().join("marian.log");
        let mut content = b"[2023-03-01 10:00:00] Starting\r\n".to_vec();
        content.extend_from_slice(b"[2023-03-01 10:30:00] src: caf\xff\xfe\n");
        content.extend_from_slice(b"[2023-03-01 12:00:00] Training finished\n");
        std::fs::write(&log, &content).unwrap();

        let lines: Vec<String> = lossy_lines(content.as_slice()).map(Result::unwrap).collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "[2023-03-01 10:00:00] Starting");
        assert!(lines[1].contains('\u{FFFD}'));
        assert_eq!(duration_hours(&log).unwrap(), Some(2.0));
    }
}
