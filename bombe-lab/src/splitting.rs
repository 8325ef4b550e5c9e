//! Classified hold-out and k-fold splitting of a bitext corpus.
//!
//! Only rows carrying the classified label are ever held out. Rows with the
//! unclassified label always go to training. A held-out row whose
//! `(source, target)` pair also appears in training is dropped, so no test
//! or validation text leaks into the corresponding training set.
//!
//! Folds are independent shuffles, not a partition: two folds may hold out
//! some of the same rows.

use crate::corpus::BitextRow;
use crate::error::LabError;
use bombe_core::LanguagePair;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Labels that decide which rows may be held out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupLabels {
    pub classified: String,
    pub unclassified: String,
}

impl GroupLabels {
    pub fn new(classified: impl Into<String>, unclassified: impl Into<String>) -> Self {
        Self {
            classified: classified.into(),
            unclassified: unclassified.into(),
        }
    }
}

/// A train/held-out pair of row sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<BitextRow>,
    pub held_out: Vec<BitextRow>,
}

/// One cross-validation fold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub train: Vec<BitextRow>,
    pub valid: Vec<BitextRow>,
}

/// Everything produced by [`split`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitOutcome {
    pub folds: Vec<Fold>,
    pub test: Vec<BitextRow>,
}

/// Hold out `test_fraction` of the classified rows.
///
/// Rows labelled neither classified nor unclassified are ignored.
pub fn classified_split(
    corpus: &[BitextRow],
    labels: &GroupLabels,
    test_fraction: f64,
    seed: u64,
) -> Result<Split, LabError> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(LabError::split(format!(
            "test fraction must be in (0, 1), got {test_fraction}"
        )));
    }

    let mut classified: Vec<BitextRow> = corpus
        .iter()
        .filter(|row| row.domain_label == labels.classified)
        .cloned()
        .collect();
    if classified.is_empty() {
        return Err(LabError::split(format!(
            "no rows labelled '{}'",
            labels.classified
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    classified.shuffle(&mut rng);

    let n = classified.len();
    let n_test = ((test_fraction * n as f64 - 1e-9).ceil() as usize).clamp(1, n);
    let mut train = classified.split_off(n_test);
    let candidates = classified;

    train.extend(
        corpus
            .iter()
            .filter(|row| row.domain_label == labels.unclassified)
            .cloned(),
    );

    let train_pairs: HashSet<(&str, &str)> = train.iter().map(BitextRow::text_pair).collect();
    let held_out: Vec<BitextRow> = candidates
        .iter()
        .filter(|row| !train_pairs.contains(&row.text_pair()))
        .cloned()
        .collect();

    debug!(
        train = train.len(),
        held_out = held_out.len(),
        dropped = candidates.len() - held_out.len(),
        "Classified split"
    );
    Ok(Split { train, held_out })
}

/// `k` independent train/validation folds over `corpus`.
///
/// Each fold reshuffles the corpus with a seed drawn from `seed`, then applies
/// [`classified_split`].
pub fn kfold_split(
    corpus: &[BitextRow],
    labels: &GroupLabels,
    k: u32,
    test_fraction: f64,
    seed: u64,
) -> Result<Vec<Fold>, LabError> {
    if k == 0 {
        return Err(LabError::split("k must be at least 1"));
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut folds = Vec::with_capacity(k as usize);
    for _ in 0..k {
        let mut shuffled = corpus.to_vec();
        shuffled.shuffle(&mut rng);
        let fold_seed = rng.next_u64();
        let Split { train, held_out } =
            classified_split(&shuffled, labels, test_fraction, fold_seed)?;
        folds.push(Fold {
            train,
            valid: held_out,
        });
    }
    Ok(folds)
}

/// Hold out a test set, then cut the remaining training rows into `k` folds.
pub fn split(
    corpus: &[BitextRow],
    labels: &GroupLabels,
    k: u32,
    test_fraction: f64,
    seed: u64,
) -> Result<SplitOutcome, LabError> {
    let Split { train, held_out } = classified_split(corpus, labels, test_fraction, seed)?;
    let folds = kfold_split(&train, labels, k, test_fraction, seed.wrapping_add(1))?;
    info!(folds = folds.len(), test = held_out.len(), "Split corpus");
    Ok(SplitOutcome {
        folds,
        test: held_out,
    })
}

/// Which side of a fold a file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SplitRole {
    Train,
    Valid,
}

impl SplitRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Valid => "valid",
        }
    }
}

impl fmt::Display for SplitRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `corpus.split_NN.<role>.<lang>`.
pub fn fold_file_name(fold: u32, role: SplitRole, lang: &str) -> String {
    format!("corpus.split_{fold:02}.{role}.{lang}")
}

/// `corpus.test.<lang>`.
pub fn test_file_name(lang: &str) -> String {
    format!("corpus.test.{lang}")
}

fn write_side<'a>(
    path: &Path,
    sentences: impl Iterator<Item = &'a str>,
) -> Result<(), LabError> {
    let mut writer = BufWriter::new(File::create(path)?);
    for sentence in sentences {
        writer.write_all(sentence.as_bytes())?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

fn write_rows(
    dest: &Path,
    rows: &[BitextRow],
    names: [String; 2],
) -> Result<Vec<PathBuf>, LabError> {
    let [source_name, target_name] = names;
    let source = dest.join(source_name);
    let target = dest.join(target_name);
    write_side(&source, rows.iter().map(|r| r.source_text.as_str()))?;
    write_side(&target, rows.iter().map(|r| r.target_text.as_str()))?;
    Ok(vec![source, target])
}

/// Write the test set and every fold as one-sentence-per-line files.
///
/// Folds are numbered from 1. Returns every path written.
pub fn save(
    outcome: &SplitOutcome,
    langs: &LanguagePair,
    dest: &Path,
) -> Result<Vec<PathBuf>, LabError> {
    std::fs::create_dir_all(dest)?;
    let [src, tgt] = langs.codes();

    let mut written = write_rows(dest, &outcome.test, [test_file_name(src), test_file_name(tgt)])?;
    for (fold, rows) in (1u32..).zip(&outcome.folds) {
        for (role, set) in [(SplitRole::Train, &rows.train), (SplitRole::Valid, &rows.valid)] {
            written.extend(write_rows(
                dest,
                set,
                [fold_file_name(fold, role, src), fold_file_name(fold, role, tgt)],
            )?);
        }
    }
    info!(dest = %dest.display(), files = written.len(), "Saved corpus splits");
    Ok(written)
}

/// `(source, target)` file pairs for `role`, ordered by fold number.
///
/// Every fold must have both language files; a fold with only one side is a
/// [`LabError::FoldMismatch`].
pub fn load_fold_paths(
    dir: &Path,
    langs: &LanguagePair,
    role: SplitRole,
) -> Result<Vec<(PathBuf, PathBuf)>, LabError> {
    let mut by_fold: BTreeMap<u32, [Option<PathBuf>; 2]> = BTreeMap::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(rest) = name.strip_prefix("corpus.split_") else {
            continue;
        };
        let mut parts = rest.splitn(3, '.');
        let (Some(fold), Some(file_role), Some(lang)) = (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        if file_role != role.as_str() {
            continue;
        }
        let (Ok(fold), Some(side)) = (fold.parse::<u32>(), langs.index_of(lang)) else {
            continue;
        };
        by_fold.entry(fold).or_default()[side] = Some(path);
    }

    if by_fold.is_empty() {
        return Err(LabError::FoldMismatch(format!(
            "no {role} files in {}",
            dir.display()
        )));
    }

    by_fold
        .into_iter()
        .map(|(fold, sides)| match sides {
            [Some(source), Some(target)] => Ok((source, target)),
            _ => Err(LabError::FoldMismatch(format!(
                "fold {fold} is missing a {role} language file in {}",
                dir.display()
            ))),
        })
        .collect()
}

/// The held-out test files, `(source, target)`.
pub fn test_set_paths(dir: &Path, langs: &LanguagePair) -> Result<(PathBuf, PathBuf), LabError> {
    let [src, tgt] = langs.codes();
    let source = dir.join(test_file_name(src));
    let target = dir.join(test_file_name(tgt));
    for path in [&source, &target] {
        if !path.is_file() {
            return Err(LabError::MissingArtifact(path.clone()));
        }
    }
    Ok((source, target))
}
