//! Approximate string similarity on a 0–100 scale.
//!
//! All ratios are indel-based: `2 * LCS / (len_a + len_b)`, computed over
//! chars. The weighted ratio favours partial overlap when one side is much
//! longer ("Send" inside "Send message") but scales it down so that a full
//! match still outranks a substring one.

use thiserror::Error;

/// Inputs longer than this are not scored; callers fall back to substring
/// comparison. Long AXValue contents (documents, logs) would otherwise blow
/// the per-call time budget.
pub const MAX_SCORED_CHARS: usize = 256;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScorerError {
    #[error("input too long to score ({0} chars)")]
    InputTooLong(usize),

    #[error("scoring backend unavailable: {0}")]
    Unavailable(String),
}

/// Pluggable similarity backend.
pub trait SimilarityScorer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Similarity of two already-normalised strings, 0.0–100.0.
    fn score(&self, target: &str, candidate: &str) -> Result<f64, ScorerError>;
}

/// Default backend: a WRatio-style blend of full, partial and token-sorted
/// ratios.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightedRatioScorer;

impl SimilarityScorer for WeightedRatioScorer {
    fn name(&self) -> &'static str {
        "weighted_ratio"
    }

    fn score(&self, target: &str, candidate: &str) -> Result<f64, ScorerError> {
        let longest = target.chars().count().max(candidate.chars().count());
        if longest > MAX_SCORED_CHARS {
            return Err(ScorerError::InputTooLong(longest));
        }
        Ok(weighted_ratio(target, candidate))
    }
}

fn lcs_len(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for &ca in a {
        for (j, &cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

fn ratio_chars(a: &[char], b: &[char]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 100.0;
    }
    200.0 * lcs_len(a, b) as f64 / total as f64
}

pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    ratio_chars(&a, &b)
}

/// Best ratio of the shorter string against every equally long window of
/// the longer one.
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (short, long) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };

    if short.is_empty() {
        return if long.is_empty() { 100.0 } else { 0.0 };
    }
    if short.len() == long.len() {
        return ratio_chars(short, long);
    }

    let mut best: f64 = 0.0;
    for start in 0..=(long.len() - short.len()) {
        let window = &long[start..start + short.len()];
        best = best.max(ratio_chars(short, window));
        if best >= 100.0 {
            break;
        }
    }
    best
}

fn sorted_tokens(s: &str) -> String {
    let mut tokens: Vec<&str> = s.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Ratio after sorting whitespace-separated tokens ("in sign" ~ "sign in").
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    ratio(&sorted_tokens(a), &sorted_tokens(b))
}

pub fn weighted_ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return if a == b { 100.0 } else { 0.0 };
    }
    if a == b {
        return 100.0;
    }

    let len_a = a.chars().count() as f64;
    let len_b = b.chars().count() as f64;
    let len_ratio = len_a.max(len_b) / len_a.min(len_b);

    let base = ratio(a, b);
    if len_ratio < 1.5 {
        return base.max(token_sort_ratio(a, b) * 0.95);
    }

    let partial_scale = if len_ratio < 8.0 { 0.9 } else { 0.6 };
    let partial = partial_ratio(a, b) * partial_scale;
    let token_partial = partial_ratio(&sorted_tokens(a), &sorted_tokens(b)) * 0.95 * partial_scale;
    base.max(partial).max(token_partial)
}
