//! Pure text-similarity helpers for the dedup pipeline.
//!
//! No database access, no side effects. The thresholds are design
//! constants, tuned against real repost pairs.

use sha2::{Digest, Sha256};

/// Ratio above which a description pair is an immediate repost match.
pub const SIMILARITY_HIGH: f64 = 0.85;
/// Ratio above which a pair is a tentative match; the best one wins.
pub const SIMILARITY_MEDIUM: f64 = 0.65;

/// Cap description length before the LCS comparison to bound the O(n·m)
/// comparator. 50 KB covers even the longest job descriptions.
pub const MAX_SIMILARITY_DESC_LEN: usize = 50_000;

/// SHA-256 hash of description text, as a 64-char hex digest.
pub fn description_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Truncate to at most `max_len` bytes without splitting a UTF-8 char.
pub fn truncate_chars(text: &str, max_len: usize) -> &str {
    if text.len() <= max_len {
        return text;
    }
    let mut end = max_len;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

fn normalized_tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

/// Title similarity predicate: normalized-token overlap covering at least
/// 70% of the smaller token set.
pub fn is_similar_title(a: &str, b: &str) -> bool {
    let tokens_a: std::collections::HashSet<String> = normalized_tokens(a).into_iter().collect();
    let tokens_b: std::collections::HashSet<String> = normalized_tokens(b).into_iter().collect();
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return false;
    }
    let overlap = tokens_a.intersection(&tokens_b).count();
    let smaller = tokens_a.len().min(tokens_b.len());
    overlap as f64 / smaller as f64 >= 0.7
}

/// Description similarity: word-level longest-common-subsequence ratio
/// 2·LCS/(m+n), in [0, 1]. Callers truncate inputs to
/// [`MAX_SIMILARITY_DESC_LEN`] first.
pub fn description_similarity(a: &str, b: &str) -> f64 {
    let words_a = normalized_tokens(a);
    let words_b = normalized_tokens(b);
    if words_a.is_empty() && words_b.is_empty() {
        return 1.0;
    }
    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }

    // Two-row DP over word sequences.
    let n = words_b.len();
    let mut prev = vec![0u32; n + 1];
    let mut curr = vec![0u32; n + 1];
    for word_a in &words_a {
        for (j, word_b) in words_b.iter().enumerate() {
            curr[j + 1] = if word_a == word_b {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    let lcs = prev[n] as f64;
    2.0 * lcs / (words_a.len() + words_b.len()) as f64
}
