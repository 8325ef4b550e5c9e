//! Corpus-level translation quality and word error rate metrics.
//!
//! The quality family (BLEU, CHRF, TER) follows the usual sacreBLEU
//! definitions closely enough to compare folds of one experiment; each score
//! carries a signature describing how it was computed. The error-rate family
//! (WER, MER, WIL) is derived from word alignments summed over the corpus.

use bombe_core::MetricScore;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

/// Metric name to score, for one family.
pub type MetricFamily = BTreeMap<String, MetricScore>;

const VERSION: &str = env!("CARGO_PKG_VERSION");

const BLEU_ORDER: usize = 4;
const CHRF_ORDER: usize = 6;
const CHRF_BETA: f64 = 2.0;

static PUNCT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([\{-\~\[-\` -\&\(-\+\:-\@/])").expect("valid punctuation regex")
});
static PERIOD_COMMA_AFTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([^0-9])([\.,])").expect("valid period regex"));
static PERIOD_COMMA_BEFORE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\.,])([^0-9])").expect("valid period regex"));
static DASH_AFTER_DIGIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9])(-)").expect("valid dash regex"));

/// mteval-v13a style tokenisation.
pub fn tokenize_13a(line: &str) -> Vec<String> {
    let line = line
        .replace("<skipped>", "")
        .replace("-\n", "")
        .replace('\n', " ")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">");
    let line = format!(" {line} ");
    let line = PUNCT.replace_all(&line, " $1 ");
    let line = PERIOD_COMMA_AFTER.replace_all(&line, "$1 $2 ");
    let line = PERIOD_COMMA_BEFORE.replace_all(&line, " $1 $2");
    let line = DASH_AFTER_DIGIT.replace_all(&line, "$1 $2 ");
    line.split_whitespace().map(str::to_string).collect()
}

fn ngram_counts<T: std::hash::Hash + Eq>(items: &[T], n: usize) -> HashMap<&[T], usize> {
    let mut counts = HashMap::new();
    if items.len() >= n {
        for window in items.windows(n) {
            *counts.entry(window).or_insert(0) += 1;
        }
    }
    counts
}

fn clipped_matches<T: std::hash::Hash + Eq>(
    hyp: &[T],
    reference: &[T],
    n: usize,
) -> (usize, usize) {
    let hyp_counts = ngram_counts(hyp, n);
    let ref_counts = ngram_counts(reference, n);
    let matched = hyp_counts
        .iter()
        .map(|(gram, count)| (*count).min(ref_counts.get(gram).copied().unwrap_or(0)))
        .sum::<usize>();
    (matched, hyp.len().saturating_sub(n - 1))
}

/// Corpus BLEU with exponential smoothing of zero n-gram matches.
pub fn bleu(hypotheses: &[String], references: &[String]) -> MetricScore {
    let mut correct = [0usize; BLEU_ORDER];
    let mut totals = [0usize; BLEU_ORDER];
    let (mut sys_len, mut ref_len) = (0usize, 0usize);

    for (hyp, reference) in hypotheses.iter().zip(references) {
        let hyp = tokenize_13a(hyp);
        let reference = tokenize_13a(reference);
        sys_len += hyp.len();
        ref_len += reference.len();
        for n in 1..=BLEU_ORDER {
            let (matched, total) = clipped_matches(&hyp, &reference, n);
            correct[n - 1] += matched;
            totals[n - 1] += total;
        }
    }

    let mut precisions = [0.0f64; BLEU_ORDER];
    let mut smooth = 1.0;
    for n in 0..BLEU_ORDER {
        if totals[n] == 0 {
            break;
        }
        precisions[n] = if correct[n] == 0 {
            smooth *= 2.0;
            100.0 / (smooth * totals[n] as f64)
        } else {
            100.0 * correct[n] as f64 / totals[n] as f64
        };
    }

    let brevity = if sys_len == 0 {
        0.0
    } else if sys_len < ref_len {
        (1.0 - ref_len as f64 / sys_len as f64).exp()
    } else {
        1.0
    };
    let log_sum: f64 = precisions
        .iter()
        .map(|&p| if p > 0.0 { p.ln() } else { -9_999_999_999.0 })
        .sum();
    let score = brevity * (log_sum / BLEU_ORDER as f64).exp();

    MetricScore::signed(
        score,
        format!("nrefs:1|case:mixed|eff:no|tok:13a|smooth:exp|version:bombe-{VERSION}"),
    )
}

/// Character n-gram F-score (chrF, beta = 2, whitespace ignored).
pub fn chrf(hypotheses: &[String], references: &[String]) -> MetricScore {
    // (hyp n-grams, ref n-grams, matches) per order, summed over the corpus.
    let mut stats = [[0usize; 3]; CHRF_ORDER];
    for (hyp, reference) in hypotheses.iter().zip(references) {
        let hyp: Vec<char> = hyp.chars().filter(|c| !c.is_whitespace()).collect();
        let reference: Vec<char> = reference.chars().filter(|c| !c.is_whitespace()).collect();
        for n in 1..=CHRF_ORDER {
            let (matched, hyp_total) = clipped_matches(&hyp, &reference, n);
            stats[n - 1][0] += hyp_total;
            stats[n - 1][1] += reference.len().saturating_sub(n - 1);
            stats[n - 1][2] += matched;
        }
    }

    let factor = CHRF_BETA * CHRF_BETA;
    let (mut total, mut effective) = (0.0, 0usize);
    for [n_hyp, n_ref, n_match] in stats {
        if n_hyp == 0 || n_ref == 0 {
            continue;
        }
        effective += 1;
        let precision = n_match as f64 / n_hyp as f64;
        let recall = n_match as f64 / n_ref as f64;
        let denom = factor * precision + recall;
        if denom > 0.0 {
            total += (1.0 + factor) * precision * recall / denom;
        }
    }
    let score = if effective == 0 {
        0.0
    } else {
        100.0 * total / effective as f64
    };

    MetricScore::signed(
        score,
        format!("nrefs:1|case:mixed|eff:yes|nc:6|nw:0|space:no|version:bombe-{VERSION}"),
    )
}

/// Word-level edit distance counts between a hypothesis and a reference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlignmentCounts {
    pub hits: usize,
    pub substitutions: usize,
    pub deletions: usize,
    pub insertions: usize,
}

impl AlignmentCounts {
    pub fn edits(&self) -> usize {
        self.substitutions + self.deletions + self.insertions
    }

    fn add(&mut self, other: AlignmentCounts) {
        self.hits += other.hits;
        self.substitutions += other.substitutions;
        self.deletions += other.deletions;
        self.insertions += other.insertions;
    }
}

/// Minimum edit alignment of `hyp` against `reference`.
pub fn align<T: PartialEq>(reference: &[T], hyp: &[T]) -> AlignmentCounts {
    let (rows, cols) = (reference.len(), hyp.len());
    let mut dist = vec![vec![0usize; cols + 1]; rows + 1];
    for (i, row) in dist.iter_mut().enumerate() {
        row[0] = i;
    }
    for j in 0..=cols {
        dist[0][j] = j;
    }
    for i in 1..=rows {
        for j in 1..=cols {
            let cost = usize::from(reference[i - 1] != hyp[j - 1]);
            dist[i][j] = (dist[i - 1][j - 1] + cost)
                .min(dist[i - 1][j] + 1)
                .min(dist[i][j - 1] + 1);
        }
    }

    let mut counts = AlignmentCounts::default();
    let (mut i, mut j) = (rows, cols);
    while i > 0 || j > 0 {
        if i > 0 && j > 0 {
            let same = reference[i - 1] == hyp[j - 1];
            let diagonal = dist[i - 1][j - 1] + usize::from(!same);
            if dist[i][j] == diagonal {
                if same {
                    counts.hits += 1;
                } else {
                    counts.substitutions += 1;
                }
                i -= 1;
                j -= 1;
                continue;
            }
        }
        if i > 0 && dist[i][j] == dist[i - 1][j] + 1 {
            counts.deletions += 1;
            i -= 1;
        } else {
            counts.insertions += 1;
            j -= 1;
        }
    }
    counts
}

/// Translation edit rate without shifts, case-insensitive.
pub fn ter(hypotheses: &[String], references: &[String]) -> MetricScore {
    let (mut edits, mut ref_words) = (0usize, 0usize);
    for (hyp, reference) in hypotheses.iter().zip(references) {
        let hyp: Vec<String> = hyp.split_whitespace().map(str::to_lowercase).collect();
        let reference: Vec<String> = reference.split_whitespace().map(str::to_lowercase).collect();
        edits += align(&reference, &hyp).edits();
        ref_words += reference.len();
    }
    let score = match (edits, ref_words) {
        (0, 0) => 0.0,
        (_, 0) => 100.0,
        _ => 100.0 * edits as f64 / ref_words as f64,
    };
    MetricScore::signed(
        score,
        format!(
            "nrefs:1|case:lc|tok:tercom|norm:no|punct:yes|asian:no|shift:no|version:bombe-{VERSION}"
        ),
    )
}

/// BLEU, CHRF and TER over line-aligned hypotheses and references.
pub fn quality_scores(hypotheses: &[String], references: &[String]) -> MetricFamily {
    MetricFamily::from([
        ("BLEU".to_string(), bleu(hypotheses, references)),
        ("CHRF".to_string(), chrf(hypotheses, references)),
        ("TER".to_string(), ter(hypotheses, references)),
    ])
}

/// WER, MER and WIL from alignment counts summed over the corpus.
pub fn error_rates(hypotheses: &[String], references: &[String]) -> MetricFamily {
    let mut counts = AlignmentCounts::default();
    for (hyp, reference) in hypotheses.iter().zip(references) {
        let hyp: Vec<&str> = hyp.split_whitespace().collect();
        let reference: Vec<&str> = reference.split_whitespace().collect();
        counts.add(align(&reference, &hyp));
    }

    let AlignmentCounts {
        hits,
        substitutions,
        deletions,
        insertions,
    } = counts;
    let h = hits as f64;
    let ratio = |num: f64, den: f64| if den > 0.0 { num / den } else { 0.0 };
    let edits = counts.edits() as f64;
    let wer = ratio(edits, (hits + substitutions + deletions) as f64);
    let mer = ratio(edits, (hits + substitutions + deletions + insertions) as f64);
    let wil = 1.0
        - ratio(h, (hits + substitutions + deletions) as f64)
            * ratio(h, (hits + substitutions + insertions) as f64);

    MetricFamily::from([
        ("WER".to_string(), MetricScore::new(wer)),
        ("MER".to_string(), MetricScore::new(mer)),
        ("WIL".to_string(), MetricScore::new(wil)),
    ])
}

/// Metric families searched in priority order.
///
/// A name found in an earlier layer shadows the same name in later ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayeredMetrics {
    layers: Vec<MetricFamily>,
}

impl LayeredMetrics {
    pub fn new(primary: MetricFamily, fallback: MetricFamily) -> Self {
        Self {
            layers: vec![primary, fallback],
        }
    }

    /// Add a layer with the lowest priority.
    pub fn push_layer(&mut self, layer: MetricFamily) {
        self.layers.push(layer);
    }

    pub fn get(&self, name: &str) -> Option<&MetricScore> {
        self.layers.iter().find_map(|layer| layer.get(name))
    }

    pub fn score(&self, name: &str) -> Option<f64> {
        self.get(name).map(|m| m.score)
    }

    /// One map holding each name's highest-priority value.
    pub fn flatten(&self) -> MetricFamily {
        let mut flat = MetricFamily::new();
        for layer in self.layers.iter().rev() {
            for (name, value) in layer {
                flat.insert(name.clone(), value.clone());
            }
        }
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_tokenize_13a_splits_punctuation() {
        assert_eq!(
            tokenize_13a("Hello, world. It costs 3.50-4!"),
            vec!["Hello", ",", "world", ".", "It", "costs", "3.50", "-", "4", "!"]
        );
    }

    #[test]
    fn test_identical_corpus_scores_perfectly() {
        let text = lines(&["the cat sat on the mat", "a dog barked at the moon tonight"]);
        assert!((bleu(&text, &text).score - 100.0).abs() < 1e-9);
        assert!((chrf(&text, &text).score - 100.0).abs() < 1e-9);
        assert_eq!(ter(&text, &text).score, 0.0);
        let rates = error_rates(&text, &text);
        assert_eq!(rates["WER"].score, 0.0);
        assert_eq!(rates["WIL"].score, 0.0);
    }

    #[test]
    fn test_disjoint_corpus_scores_near_zero() {
        let hyp = lines(&["alpha beta gamma delta"]);
        let reference = lines(&["one two three four"]);
        // Exponential smoothing keeps a floor above zero.
        let score = bleu(&hyp, &reference).score;
        assert!(score > 0.0 && score < 10.0);
        assert_eq!(ter(&hyp, &reference).score, 100.0);
        assert_eq!(error_rates(&hyp, &reference)["WER"].score, 1.0);
    }

    #[test]
    fn test_brevity_penalty_applies() {
        let hyp = lines(&["the cat sat on"]);
        let reference = lines(&["the cat sat on the mat"]);
        let score = bleu(&hyp, &reference).score;
        assert!((score - 100.0 * (1.0f64 - 6.0 / 4.0).exp()).abs() < 1e-6);
    }

    #[test]
    fn test_alignment_counts() {
        let reference = ["a", "b", "c", "d"];
        let hyp = ["a", "x", "c", "d", "e"];
        let counts = align(&reference, &hyp);
        assert_eq!(
            counts,
            AlignmentCounts {
                hits: 3,
                substitutions: 1,
                deletions: 0,
                insertions: 1
            }
        );
    }

    #[test]
    fn test_error_rate_formulas() {
        // H=3 S=1 D=0 I=1
        let rates = error_rates(&lines(&["a x c d e"]), &lines(&["a b c d"]));
        assert!((rates["WER"].score - 0.5).abs() < 1e-9);
        assert!((rates["MER"].score - 0.4).abs() < 1e-9);
        assert!((rates["WIL"].score - (1.0 - 0.75 * 0.6)).abs() < 1e-9);
    }

    #[test]
    fn test_signatures_are_attached() {
        let text = lines(&["x"]);
        let scores = quality_scores(&text, &text);
        assert!(scores["BLEU"].signature.as_deref().unwrap_or("").contains("tok:13a"));
        assert!(scores["CHRF"].signature.is_some());
        assert!(scores["TER"].signature.is_some());
    }

    #[test]
    fn test_layered_lookup_prefers_primary() {
        let primary = MetricFamily::from([("BLEU".to_string(), MetricScore::new(30.1))]);
        let fallback = MetricFamily::from([
            ("BLEU".to_string(), MetricScore::new(99.0)),
            ("WER".to_string(), MetricScore::new(0.4)),
        ]);
        let layered = LayeredMetrics::new(primary, fallback);
        assert_eq!(layered.score("BLEU"), Some(30.1));
        assert_eq!(layered.score("WER"), Some(0.4));
        assert_eq!(layered.score("CHRF"), None);

        let flat = layered.flatten();
        assert_eq!(flat.len(), 2);
        assert_eq!(flat["BLEU"].score, 30.1);
    }
}
