// src/matching/fuzzy.rs
//
// Order- and subset-tolerant string similarity on a 0-100 scale. Inputs are
// expected to be normalized already; nothing here lowercases or strips.

use std::collections::BTreeSet;

use rapidfuzz::fuzz;

// Weight applied to token-based comparisons
const UNBASE_SCALE: f64 = 0.95;

// Weight for partial comparisons when the lengths differ moderately
const PARTIAL_SCALE: f64 = 0.9;

// Weight for partial comparisons when one string is much longer
const LONG_PARTIAL_SCALE: f64 = 0.6;

// Length ratio at which partial comparisons kick in
const PARTIAL_LENGTH_RATIO: f64 = 1.5;

// Length ratio at which the long-string scale applies
const LONG_LENGTH_RATIO: f64 = 8.0;

/// Normalized Indel similarity: `(1 - indel_distance / (len_a + len_b)) * 100`,
/// where only insertions and deletions count. Empty input scores 0.
pub fn ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    fuzz::ratio(a.chars(), b.chars()) * 100.0
}

/// Best [`ratio`] of the shorter string against every same-length window of
/// the longer one.
pub fn partial_ratio(a: &str, b: &str) -> f64 {
    let (short, long) = if a.chars().count() <= b.chars().count() {
        (a, b)
    } else {
        (b, a)
    };
    if short.is_empty() {
        return 0.0;
    }

    let long_chars: Vec<char> = long.chars().collect();
    let width = short.chars().count();
    if width == long_chars.len() {
        return ratio(short, long);
    }

    let mut best = 0.0_f64;
    for window in long_chars.windows(width) {
        let candidate: String = window.iter().collect();
        let score = ratio(short, &candidate);
        if score > best {
            best = score;
            if best >= 100.0 {
                break;
            }
        }
    }
    best
}

fn sorted_tokens(s: &str) -> String {
    let mut tokens: Vec<&str> = s.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// [`ratio`] after sorting each side's tokens.
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    ratio(&sorted_tokens(a), &sorted_tokens(b))
}

pub fn partial_token_sort_ratio(a: &str, b: &str) -> f64 {
    partial_ratio(&sorted_tokens(a), &sorted_tokens(b))
}

struct TokenSets {
    common: String,
    left: String,
    right: String,
    has_common: bool,
    left_only_empty: bool,
    right_only_empty: bool,
}

fn token_sets(a: &str, b: &str) -> TokenSets {
    let left: BTreeSet<&str> = a.split_whitespace().collect();
    let right: BTreeSet<&str> = b.split_whitespace().collect();
    let common: Vec<&str> = left.intersection(&right).copied().collect();
    let left_only: Vec<&str> = left.difference(&right).copied().collect();
    let right_only: Vec<&str> = right.difference(&left).copied().collect();

    let joined = |base: &[&str], extra: &[&str]| -> String {
        base.iter()
            .chain(extra.iter())
            .copied()
            .collect::<Vec<_>>()
            .join(" ")
    };

    TokenSets {
        has_common: !common.is_empty(),
        left_only_empty: left_only.is_empty(),
        right_only_empty: right_only.is_empty(),
        left: joined(&common, &left_only),
        right: joined(&common, &right_only),
        common: common.join(" "),
    }
}

/// Compares the shared tokens against each side's full token set, so a
/// string that is a token subset of the other scores 100.
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let sets = token_sets(a, b);
    if sets.has_common && (sets.left_only_empty || sets.right_only_empty) {
        return 100.0;
    }
    ratio(&sets.common, &sets.left)
        .max(ratio(&sets.common, &sets.right))
        .max(ratio(&sets.left, &sets.right))
}

pub fn partial_token_set_ratio(a: &str, b: &str) -> f64 {
    let sets = token_sets(a, b);
    if sets.has_common {
        return 100.0;
    }
    partial_ratio(&sets.left, &sets.right)
}

/// Weighted best-of over the comparisons above.
///
/// Strings of similar length use the full ratio and the token ratios.
/// When one side is at least 1.5x longer the partial ratios are used as well,
/// scaled down (further still past 8x) so substring hits do not outrank true
/// equality. Returns 0 when either side is empty; never exceeds 100.
pub fn wratio(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let len_a = a.chars().count() as f64;
    let len_b = b.chars().count() as f64;
    let len_ratio = len_a.max(len_b) / len_a.min(len_b);

    let base = ratio(a, b);
    if len_ratio < PARTIAL_LENGTH_RATIO {
        let token = token_sort_ratio(a, b).max(token_set_ratio(a, b)) * UNBASE_SCALE;
        return base.max(token).clamp(0.0, 100.0);
    }

    let partial_scale = if len_ratio < LONG_LENGTH_RATIO {
        PARTIAL_SCALE
    } else {
        LONG_PARTIAL_SCALE
    };
    let partial = partial_ratio(a, b) * partial_scale;
    let partial_token = partial_token_sort_ratio(a, b).max(partial_token_set_ratio(a, b))
        * UNBASE_SCALE
        * partial_scale;

    base.max(partial).max(partial_token).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_strings_score_100() {
        for s in ["latte", "caffe latte", "new york", "a"] {
            assert!((wratio(s, s) - 100.0).abs() < 1e-9, "{}", s);
        }
    }

    #[test]
    fn test_empty_side_scores_zero() {
        assert_eq!(wratio("", "latte"), 0.0);
        assert_eq!(wratio("latte", ""), 0.0);
        assert_eq!(wratio("", ""), 0.0);
        assert_eq!(ratio("", ""), 0.0);
    }

    #[test]
    fn test_ratio_counts_insertions_and_deletions() {
        let score = ratio("this is a test", "this is a test!");
        assert!((score - 96.55).abs() < 0.01, "score was {}", score);
        // A substitution is one deletion plus one insertion
        assert!((ratio("bostn", "boston") - 100.0 * 10.0 / 11.0).abs() < 1e-9);
        assert!((ratio("cat", "cut") - 100.0 * 4.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_word_order_is_tolerated() {
        let score = wratio("chicken tikka masala", "masala tikka chicken");
        assert!(score >= 95.0, "score was {}", score);
    }

    #[test]
    fn test_substring_scores_through_partial_ratio() {
        assert_eq!(partial_ratio("latte", "caffe latte"), 100.0);
        let score = wratio("latte", "caffe latte");
        assert!((score - 90.0).abs() < 1e-9, "score was {}", score);
    }

    #[test]
    fn test_token_subset() {
        assert_eq!(token_set_ratio("green tea", "green tea latte"), 100.0);
        assert!(token_set_ratio("green tea", "black coffee") < 100.0);
    }

    #[test]
    fn test_unrelated_strings_score_low() {
        let score = wratio("delivery fee", "caffe latte");
        assert!(score < 60.0, "score was {}", score);
    }

    #[test]
    fn test_scores_stay_in_range() {
        let pairs = [
            ("x", "a very long reference description of a food item"),
            ("pho", "pho bo"),
            ("burrito bowl", "bowl"),
            ("zz", "zzzzzzzzzzzzzzzzzzzz"),
        ];
        for (a, b) in pairs {
            let score = wratio(a, b);
            assert!((0.0..=100.0).contains(&score), "{} vs {} -> {}", a, b, score);
            assert!((wratio(b, a) - score).abs() < 1e-9);
        }
    }
}
