//! Text-similarity metrics for generated answers.
//!
//! - BLEU: corpus BLEU over a one-pair batch, n-grams up to 4, no smoothing,
//!   brevity penalty, mteval-13a tokenization (case-sensitive)
//! - ROUGE-1 / ROUGE-2: F-measure of clipped n-gram overlap
//! - ROUGE-L: F-measure of the longest common subsequence
//! - Exact Match: case-insensitive comparison of trimmed strings
//!
//! ROUGE lowercases and keeps only `[a-z0-9]` runs as tokens, with no stemming.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;

const BLEU_MAX_ORDER: usize = 4;

/// All scores for one generated answer.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Scores {
    pub bleu: f64,
    pub rouge1: f64,
    pub rouge2: f64,
    pub rouge_l: f64,
    pub exact_match: u8,
}

/// Score a generated answer against a reference answer.
pub fn score(generated: &str, reference: &str) -> Scores {
    let gen_tokens = rouge_tokenize(generated);
    let ref_tokens = rouge_tokenize(reference);

    Scores {
        bleu: bleu(generated, reference),
        rouge1: rouge_n(&gen_tokens, &ref_tokens, 1),
        rouge2: rouge_n(&gen_tokens, &ref_tokens, 2),
        rouge_l: rouge_l(&gen_tokens, &ref_tokens),
        exact_match: exact_match(generated, reference),
    }
}

/// 1 if the strings are equal after trimming and lowercasing, else 0.
pub fn exact_match(generated: &str, reference: &str) -> u8 {
    u8::from(generated.trim().to_lowercase() == reference.trim().to_lowercase())
}

/// BLEU of a single candidate against a single reference.
pub fn bleu(generated: &str, reference: &str) -> f64 {
    let candidate = tokenize_13a(generated);
    let reference = tokenize_13a(reference);

    if candidate.is_empty() || reference.is_empty() {
        return 0.0;
    }

    let mut log_precision_sum = 0.0;
    for order in 1..=BLEU_MAX_ORDER {
        let possible = (candidate.len() + 1).saturating_sub(order);
        if possible == 0 {
            return 0.0;
        }

        let cand_counts = ngram_counts(&candidate, order);
        let ref_counts = ngram_counts(&reference, order);
        let matches = clipped_overlap(&cand_counts, &ref_counts);
        if matches == 0 {
            return 0.0;
        }

        log_precision_sum += (matches as f64 / possible as f64).ln();
    }
    let geo_mean = (log_precision_sum / BLEU_MAX_ORDER as f64).exp();

    let ratio = candidate.len() as f64 / reference.len() as f64;
    let brevity_penalty = if ratio > 1.0 {
        1.0
    } else {
        (1.0 - 1.0 / ratio).exp()
    };

    geo_mean * brevity_penalty
}

/// ROUGE-N F-measure.
pub fn rouge_n(generated: &[String], reference: &[String], n: usize) -> f64 {
    let gen_counts = ngram_counts(generated, n);
    let ref_counts = ngram_counts(reference, n);

    let overlap = clipped_overlap(&gen_counts, &ref_counts) as f64;
    let gen_total: usize = gen_counts.values().sum();
    let ref_total: usize = ref_counts.values().sum();

    let precision = overlap / gen_total.max(1) as f64;
    let recall = overlap / ref_total.max(1) as f64;
    f_measure(precision, recall)
}

/// ROUGE-L F-measure.
pub fn rouge_l(generated: &[String], reference: &[String]) -> f64 {
    if generated.is_empty() || reference.is_empty() {
        return 0.0;
    }

    let lcs = lcs_length(generated, reference) as f64;
    let precision = lcs / generated.len() as f64;
    let recall = lcs / reference.len() as f64;
    f_measure(precision, recall)
}

fn f_measure(precision: f64, recall: f64) -> f64 {
    if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    }
}

/// Lowercase, replace every run of non-`[a-z0-9]` with a space, split.
pub fn rouge_tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// mteval-v13a tokenization as used by BLEU.
pub fn tokenize_13a(text: &str) -> Vec<String> {
    let mut line = text.replace("<skipped>", "").replace("-\n", "").replace('\n', " ");
    if line.contains('&') {
        line = line
            .replace("&quot;", "\"")
            .replace("&amp;", "&")
            .replace("&lt;", "<")
            .replace("&gt;", ">");
    }

    // Split off symbols (everything except letters, digits, apostrophe,
    // period, comma and dash).
    let mut spaced = String::with_capacity(line.len() + 2);
    spaced.push(' ');
    for c in line.chars() {
        if is_13a_symbol(c) {
            spaced.push(' ');
            spaced.push(c);
            spaced.push(' ');
        } else {
            spaced.push(c);
        }
    }
    spaced.push(' ');

    let chars: Vec<char> = spaced.chars().collect();
    let is_digit = |c: char| c.is_ascii_digit();
    let is_sep = |c: char| c == '.' || c == ',';

    // Period and comma unless preceded by a digit.
    let chars = rewrite_pairs(&chars, |a, b| !is_digit(a) && is_sep(b), |a, b| vec![a, ' ', b, ' ']);
    // Period and comma unless followed by a digit.
    let chars = rewrite_pairs(&chars, |a, b| is_sep(a) && !is_digit(b), |a, b| vec![' ', a, ' ', b]);
    // Dash when preceded by a digit.
    let chars = rewrite_pairs(&chars, |a, b| is_digit(a) && b == '-', |a, b| vec![a, ' ', b, ' ']);

    chars
        .into_iter()
        .collect::<String>()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

fn is_13a_symbol(c: char) -> bool {
    matches!(c,
        '{'..='~' | '['..='`' | ' '..='&' | '('..='+' | ':'..='@' | '/')
}

/// Scan left to right, replacing non-overlapping character pairs that match.
fn rewrite_pairs(
    chars: &[char],
    matches: impl Fn(char, char) -> bool,
    replace: impl Fn(char, char) -> Vec<char>,
) -> Vec<char> {
    let mut out = Vec::with_capacity(chars.len() + chars.len() / 4);
    let mut i = 0;
    while i < chars.len() {
        if i + 1 < chars.len() && matches(chars[i], chars[i + 1]) {
            out.extend(replace(chars[i], chars[i + 1]));
            i += 2;
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    out
}

fn ngram_counts<T: Eq + Hash>(tokens: &[T], n: usize) -> HashMap<&[T], usize> {
    let mut counts = HashMap::new();
    if n == 0 {
        return counts;
    }
    for gram in tokens.windows(n) {
        *counts.entry(gram).or_insert(0) += 1;
    }
    counts
}

fn clipped_overlap<K: Eq + Hash>(a: &HashMap<K, usize>, b: &HashMap<K, usize>) -> usize {
    a.iter()
        .map(|(gram, &count)| count.min(b.get(gram).copied().unwrap_or(0)))
        .sum()
}

/// Length of the longest common subsequence.
fn lcs_length<T: PartialEq>(a: &[T], b: &[T]) -> usize {
    let n = b.len();
    let mut dp = vec![0usize; n + 1];

    for x in a {
        let mut prev = 0;
        for j in 1..=n {
            let temp = dp[j];
            if *x == b[j - 1] {
                dp[j] = prev + 1;
            } else {
                dp[j] = dp[j].max(dp[j - 1]);
            }
            prev = temp;
        }
    }

    dp[n]
}
