//! Bitext corpus rows, input formats, cleaning and loading.

use crate::error::LabError;
use crate::pool;
use bombe_core::LanguagePair;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Suffix of cleaned corpus exports.
pub const CLEANED_SUFFIX: &str = ".cleaned.jsonl";

/// One aligned sentence pair with its domain label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BitextRow {
    /// Stable hash of `(domain_label, source_text, target_text, language_pair)`.
    pub id: String,
    pub domain_label: String,
    pub source_text: String,
    pub target_text: String,
    pub language_pair: String,
}

impl BitextRow {
    pub fn new(
        domain_label: impl Into<String>,
        source_text: impl Into<String>,
        target_text: impl Into<String>,
        langs: &LanguagePair,
    ) -> Self {
        let domain_label = domain_label.into();
        let source_text = source_text.into();
        let target_text = target_text.into();
        let language_pair = langs.to_string();
        let id = row_id(&domain_label, &source_text, &target_text, &language_pair);
        Self {
            id,
            domain_label,
            source_text,
            target_text,
            language_pair,
        }
    }

    pub fn text_pair(&self) -> (&str, &str) {
        (&self.source_text, &self.target_text)
    }
}

/// Deterministic row id: the first 16 bytes of a SHA-256 over the
/// unit-separator-joined fields, hex encoded.
pub fn row_id(domain_label: &str, source: &str, target: &str, language_pair: &str) -> String {
    let mut hasher = Sha256::new();
    for field in [domain_label, source, target, language_pair] {
        hasher.update(field.as_bytes());
        hasher.update([0x1f]);
    }
    let digest = hasher.finalize();
    digest[..16].iter().map(|b| format!("{b:02x}")).collect()
}

/// Supported raw bitext formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BitextFormat {
    /// `source<TAB>target` per line.
    Tsv,
    /// `{"source": "...", "target": "..."}` per line.
    JsonLines,
}

#[derive(Deserialize)]
struct JsonPair {
    source: String,
    target: String,
}

impl BitextFormat {
    /// Format implied by a file extension, if any.
    pub fn detect(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("tsv") | Some("tab") => Some(Self::Tsv),
            Some("jsonl") | Some("ndjson") => Some(Self::JsonLines),
            _ => None,
        }
    }

    /// The raw `(source, target)` texts on one line, if it holds a pair.
    pub fn extract_sentence_pair(&self, line: &str) -> Option<(String, String)> {
        match self {
            Self::Tsv => {
                let (source, target) = line.split_once('\t')?;
                Some((source.to_string(), target.to_string()))
            }
            Self::JsonLines => {
                let pair: JsonPair = serde_json::from_str(line).ok()?;
                Some((pair.source, pair.target))
            }
        }
    }
}

/// Normalise whitespace and strip control characters.
pub fn normalize(text: &str) -> String {
    let text = text
        .replace("\r\n", "\n")
        .replace('\n', " ")
        .replace('\t', "    ");
    let cleaned: String = text.chars().filter(|c| !c.is_control()).collect();
    cleaned.trim().to_string()
}

/// A pair is suspicious when either side is only a language code.
pub fn is_suspicious(langs: &LanguagePair, source: &str, target: &str) -> bool {
    langs.is_code(source.trim()) || langs.is_code(target.trim())
}

/// Outcome of cleaning one input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanReport {
    pub input: PathBuf,
    pub output: PathBuf,
    pub rows_read: usize,
    pub rows_kept: usize,
}

/// Export path for `input`: the file name up to its first `.`, plus [`CLEANED_SUFFIX`].
pub fn export_path_for(input: &Path, export_dir: &Path) -> PathBuf {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name.split('.').next().unwrap_or("corpus");
    export_dir.join(format!("{stem}{CLEANED_SUFFIX}"))
}

/// Clean one raw bitext file into a `*.cleaned.jsonl` export.
///
/// The domain label is the name of the file's parent directory.
pub fn clean_file(
    input: &Path,
    langs: &LanguagePair,
    format: Option<BitextFormat>,
    export_dir: &Path,
) -> Result<CleanReport, LabError> {
    let format = format
        .or_else(|| BitextFormat::detect(input))
        .ok_or_else(|| LabError::corpus(format!("unknown bitext format: {}", input.display())))?;
    let label = input
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| LabError::corpus(format!("no domain directory for {}", input.display())))?;

    let reader = BufReader::new(File::open(input)?);
    let mut seen = HashSet::new();
    let mut rows = Vec::new();
    let mut rows_read = 0;
    for line in reader.lines() {
        let line = line?;
        let Some((source, target)) = format.extract_sentence_pair(&line) else {
            continue;
        };
        rows_read += 1;
        let (source, target) = (normalize(&source), normalize(&target));
        if source.is_empty() || target.is_empty() || is_suspicious(langs, &source, &target) {
            continue;
        }
        let row = BitextRow::new(label.as_str(), source, target, langs);
        if seen.insert(row.id.clone()) {
            rows.push(row);
        }
    }

    std::fs::create_dir_all(export_dir)?;
    let output = export_path_for(input, export_dir);
    let mut writer = BufWriter::new(File::create(&output)?);
    for row in &rows {
        serde_json::to_writer(&mut writer, row)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;

    debug!(input = %input.display(), kept = rows.len(), read = rows_read, "Cleaned bitext file");
    Ok(CleanReport {
        input: input.to_path_buf(),
        output,
        rows_read,
        rows_kept: rows.len(),
    })
}

/// Every regular file under `data_dir`, sorted.
pub fn source_files(data_dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(data_dir)
        .into_iter()
        .flatten()
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

/// Clean every recognised bitext file under `data_dir` into `export_dir`.
///
/// Files run on the worker pool; one failing file does not stop the others,
/// but any failure is returned once the pool drains.
pub async fn export_and_clean(
    data_dir: &Path,
    export_dir: &Path,
    langs: &LanguagePair,
    workers: usize,
) -> Result<Vec<CleanReport>, LabError> {
    let (inputs, skipped): (Vec<PathBuf>, Vec<PathBuf>) = source_files(data_dir)
        .into_iter()
        .partition(|path| BitextFormat::detect(path).is_some());
    for path in &skipped {
        debug!(path = %path.display(), "Skipping file with unknown bitext format");
    }
    if inputs.is_empty() {
        return Err(LabError::corpus(format!(
            "no bitext files under {}",
            data_dir.display()
        )));
    }

    let langs = langs.clone();
    let dest = export_dir.to_path_buf();
    let outcome = pool::map_paths(inputs, workers, move |input| {
        clean_file(input, &langs, None, &dest)
    })
    .await;
    let reports: Vec<CleanReport> = outcome
        .into_result()?
        .into_iter()
        .map(|(_, report)| report)
        .collect();
    info!(
        files = reports.len(),
        rows = reports.iter().map(|r| r.rows_kept).sum::<usize>(),
        export_dir = %export_dir.display(),
        "Exported and cleaned corpus"
    );
    Ok(reports)
}

/// Load all cleaned exports under `export_dir`, dropping duplicate rows.
pub fn load_corpus(export_dir: &Path) -> Result<Vec<BitextRow>, LabError> {
    let exports: Vec<PathBuf> = source_files(export_dir)
        .into_iter()
        .filter(|p| p.to_string_lossy().ends_with(CLEANED_SUFFIX))
        .collect();
    if exports.is_empty() {
        return Err(LabError::corpus(format!(
            "no cleaned exports in {}",
            export_dir.display()
        )));
    }

    let mut seen = HashSet::new();
    let mut corpus = Vec::new();
    for path in &exports {
        let reader = BufReader::new(File::open(path)?);
        for (n, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<BitextRow>(&line) {
                Ok(row) => {
                    if seen.insert(row.id.clone()) {
                        corpus.push(row);
                    }
                }
                Err(e) => warn!(
                    path = %path.display(),
                    line = n + 1,
                    error = %e,
                    "Skipping malformed corpus row"
                ),
            }
        }
    }
    info!(rows = corpus.len(), files = exports.len(), "Loaded corpus");
    Ok(corpus)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn en_cy() -> LanguagePair {
        LanguagePair::new("en", "cy")
    }

    #[test]
    fn test_row_id_is_stable_and_field_sensitive() {
        let a = BitextRow::new("Health", "Good morning", "Bore da", &en_cy());
        let b = BitextRow::new("Health", "Good morning", "Bore da", &en_cy());
        let c = BitextRow::new("Unknown", "Good morning", "Bore da", &en_cy());
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(a.id.len(), 32);
        // Field boundaries matter.
        assert_ne!(row_id("a", "bc", "d", "en-cy"), row_id("ab", "c", "d", "en-cy"));
    }

    #[test]
    fn test_extract_sentence_pair() {
        assert_eq!(
            BitextFormat::Tsv.extract_sentence_pair("Hello\tHelo"),
            Some(("Hello".into(), "Helo".into()))
        );
        assert_eq!(BitextFormat::Tsv.extract_sentence_pair("no tab"), None);
        assert_eq!(
            BitextFormat::JsonLines.extract_sentence_pair(r#"{"source":"Yes","target":"Ie"}"#),
            Some(("Yes".into(), "Ie".into()))
        );
        assert_eq!(BitextFormat::JsonLines.extract_sentence_pair("{"), None);
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  line one\r\nline\ttwo\u{0007} "), "line one line    two");
    }

    #[test]
    fn test_clean_file_filters_and_deduplicates() {
        let dir = TempDir::new().unwrap();
        let domain = dir.path().join("src").join("Health");
        std::fs::create_dir_all(&domain).unwrap();
        let input = domain.join("nhs.2021.tsv");
        std::fs::write(
            &input,
            "Take two tablets\tCymerwch ddwy dabled\n\
             Take two tablets\tCymerwch ddwy dabled\n\
             en\tcy\n\
             \tempty source\n\
             not a pair\n\
             Call 111\tFfoniwch 111\n",
        )
        .unwrap();

        let export = dir.path().join("export");
        let report = clean_file(&input, &en_cy(), None, &export).unwrap();
        assert_eq!(report.output, export.join("nhs.cleaned.jsonl"));
        assert_eq!(report.rows_read, 5);
        assert_eq!(report.rows_kept, 2);

        let corpus = load_corpus(&export).unwrap();
        assert_eq!(corpus.len(), 2);
        assert!(corpus.iter().all(|r| r.domain_label == "Health"));
        assert_eq!(corpus[1].text_pair(), ("Call 111", "Ffoniwch 111"));
    }

    #[test]
    fn test_unknown_format_is_rejected() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("corpus.tmx");
        std::fs::write(&input, "<tmx/>").unwrap();
        let result = clean_file(&input, &en_cy(), None, dir.path());
        assert!(matches!(result, Err(LabError::Corpus(_))));
    }

    #[tokio::test]
    async fn test_export_and_clean_runs_every_domain() {
        let dir = TempDir::new().unwrap();
        let data = dir.path().join("src");
        let domains = [
            ("Health", "Wash hands\tGolchwch dwylo\n"),
            ("Unknown", "Hello\tHelo\n"),
        ];
        for (domain, text) in domains {
            let file = data.join(domain).join(format!("{}.tsv", domain.to_lowercase()));
            std::fs::create_dir_all(data.join(domain)).unwrap();
            std::fs::write(file, text).unwrap();
        }
        std::fs::write(data.join("README"), "not a corpus").unwrap();

        let export = dir.path().join("export");
        let reports = export_and_clean(&data, &export, &en_cy(), 2).await.unwrap();
        assert_eq!(reports.len(), 2);
        let corpus = load_corpus(&export).unwrap();
        let mut labels: Vec<&str> = corpus.iter().map(|r| r.domain_label.as_str()).collect();
        labels.sort();
        assert_eq!(labels, vec!["Health", "Unknown"]);
    }

    #[tokio::test]
    async fn test_export_and_clean_surfaces_failures() {
        let dir = TempDir::new().unwrap();
        let data = dir.path().join("src").join("Health");
        std::fs::create_dir_all(&data).unwrap();
        std::fs::write(data.join("good.tsv"), "a b\tc d\n").unwrap();
        std::fs::write(data.join("bad.tsv"), [0xffu8, 0xfe, b'\n']).unwrap();

        let err = export_and_clean(&dir.path().join("src"), &dir.path().join("export"), &en_cy(), 2)
            .await
            .unwrap_err();
        assert!(matches!(err, LabError::Pool { failed: 1, total: 2, .. }));
        assert!(dir.path().join("export").join("good.cleaned.jsonl").is_file());
    }

    #[test]
    fn test_load_corpus_requires_exports() {
        let dir = TempDir::new().unwrap();
        assert!(load_corpus(dir.path()).is_err());
    }
}
