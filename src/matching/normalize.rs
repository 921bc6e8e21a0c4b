// src/matching/normalize.rs

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

// Dropped from place names before comparison
const PLACE_STOPWORDS: [&str; 4] = ["city", "metro", "metropolitan", "area"];

/// Canonical comparison form of free text.
///
/// Applied in order: compatibility decomposition with combining marks
/// removed (so accents fold away), lowercase, every character that is not an
/// ASCII letter or digit becomes a space, runs of whitespace collapse to one
/// space, and the ends are trimmed. The output is a fixed point:
/// `normalize(&normalize(x)) == normalize(x)`.
pub fn normalize(text: &str) -> String {
    let folded: String = text
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                ' '
            }
        })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Compact form used for geographic names: [`normalize`], drop place
/// stop words, then join the remaining tokens with no separator so
/// "New York" and "NewYork" compare equal.
pub fn normalize_key(text: &str) -> String {
    normalize(text)
        .split(' ')
        .filter(|token| !token.is_empty() && !PLACE_STOPWORDS.contains(token))
        .collect()
}

/// Splits normalized text on whitespace and drops tokens shorter than
/// `min_len` characters. Order is preserved.
pub fn tokenize(normalized: &str, min_len: usize) -> Vec<String> {
    normalized
        .split_whitespace()
        .filter(|token| token.chars().count() >= min_len)
        .map(str::to_string)
        .collect()
}
