//! File size and corpus segment statistics recorded with each fold.

use crate::error::LabError;
use bombe_core::{LanguagePair, SegmentStats, SizeStats};
use std::io::{BufRead, BufReader};
use std::path::Path;
use walkdir::WalkDir;

const BYTES_PER_MB: f64 = 1_000_000.0;

/// Sizes of every file under `dir`, keyed by path relative to `dir`.
///
/// A missing directory yields empty stats.
pub fn file_sizes(dir: &Path) -> SizeStats {
    let mut stats = SizeStats::default();
    for entry in WalkDir::new(dir).into_iter().flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        let size = meta.len() as f64 / BYTES_PER_MB;
        let key = entry
            .path()
            .strip_prefix(dir)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .into_owned();
        stats.total_mb += size;
        stats.sizes_mb.insert(key, size);
    }
    stats
}

/// Sentence and word counts over the corpus files directly in `work_dir`
/// whose extension is one of the pair's language codes.
pub fn segment_stats(work_dir: &Path, langs: &LanguagePair) -> Result<SegmentStats, LabError> {
    let mut stats = SegmentStats::default();
    for entry in std::fs::read_dir(work_dir)? {
        let path = entry?.path();
        let is_corpus = path.is_file()
            && path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| langs.is_code(ext));
        if !is_corpus {
            continue;
        }
        let reader = BufReader::new(std::fs::File::open(&path)?);
        for line in reader.lines() {
            let line = line?;
            stats.n_sentences += 1;
            stats.n_words += line.split_whitespace().count() as u64;
        }
    }
    Ok(stats)
}
