// 🔤 Name/Identity Normalizer
// Canonical comparison keys for account numbers, card numbers and entity names.
//
// "6222-0012 3456.7890" and "６２２２００１２３４５６７８９０" style variants must
// collapse onto the same key before they reach the serial registry.

use crate::cell::Cell;

// ============================================================================
// PUNCTUATION TABLE
// ============================================================================

/// Characters removed by `normalize_key` (half-width and full-width variants)
const STRIPPED_PUNCTUATION: &[char] = &[
    ',', '.', ';', ':', '!', '?', '(', ')', '[', ']', '-', '_', '\'', '"', '/', '\\',
    '，', '。', '；', '：', '、', '！', '？', '“', '”', '‘', '’', '—', '－', '·', '•', '（',
    '）', '【', '】',
];

/// Characters that are illegal in Windows file names
const ILLEGAL_FILENAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Invisible characters that sneak in when paths are pasted from Explorer
const INVISIBLE_PATH_CHARS: &[char] = &[
    '\u{feff}', '\u{202a}', '\u{202b}', '\u{202c}', '\u{200e}', '\u{200f}',
];

/// Default minimum length of the shorter digit string for a substring match
pub const DEFAULT_MIN_DIGIT_LEN: usize = 12;

// ============================================================================
// KEY NORMALIZATION
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeOptions {
    /// Remove the literal "NULL" left behind by upstream joins
    pub strip_null: bool,
}

impl NormalizeOptions {
    /// Options used for identity matching keys
    pub fn identity() -> Self {
        NormalizeOptions { strip_null: true }
    }
}

/// Derive a comparison key: no whitespace, upper-case, no punctuation.
///
/// Null or blank input yields an empty key.
///
/// # Examples
/// ```
/// use account_register::normalizer::{normalize_key, NormalizeOptions};
///
/// assert_eq!(normalize_key(Some(" 张三（公司）"), NormalizeOptions::default()), "张三公司");
/// assert_eq!(normalize_key(Some("ab null-1"), NormalizeOptions::identity()), "AB1");
/// ```
pub fn normalize_key(raw: Option<&str>, options: NormalizeOptions) -> String {
    let raw = match raw {
        Some(s) => s,
        None => return String::new(),
    };

    let mut key: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && !STRIPPED_PUNCTUATION.contains(c))
        .flat_map(char::to_uppercase)
        .collect();

    if options.strip_null {
        key = key.replace("NULL", "");
    }

    key
}

/// Keep only ASCII digits.
pub fn digits_only(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Remove one trailing ".0" (float-to-string artifact); real trailing zeros stay.
pub fn strip_trailing_dot_zero(raw: &str) -> &str {
    let trimmed = raw.trim();
    trimmed.strip_suffix(".0").unwrap_or(trimmed)
}

/// Cell → cleaned string, or None for blank / NaN / NaT values.
pub fn normalize_number(cell: &Cell) -> Option<String> {
    let text = cell.to_normalized_string();
    let cleaned = strip_trailing_dot_zero(&text).trim();

    if cleaned.is_empty()
        || cleaned.eq_ignore_ascii_case("nan")
        || cleaned.eq_ignore_ascii_case("nat")
    {
        return None;
    }

    Some(cleaned.to_string())
}

// ============================================================================
// DIGIT MATCH
// ============================================================================

/// Fuzzy equality on the digit content of two identifiers.
///
/// The minimum length of the shorter side is a dataset-tuned heuristic, so it
/// is carried as configuration rather than hardcoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigitMatcher {
    pub min_len: usize,
}

impl DigitMatcher {
    pub fn new(min_len: usize) -> Self {
        DigitMatcher { min_len }
    }

    pub fn matches(&self, a: &str, b: &str) -> bool {
        digit_match(a, b, self.min_len)
    }
}

impl Default for DigitMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_DIGIT_LEN)
    }
}

/// Equal digit strings, or the shorter contained in the longer with
/// `len(shorter) >= min_len`. Identifiers without digits never match.
pub fn digit_match(a: &str, b: &str, min_len: usize) -> bool {
    let da = digits_only(a);
    let db = digits_only(b);

    if da.is_empty() || db.is_empty() {
        return false;
    }
    if da == db {
        return true;
    }

    let (shorter, longer) = if da.len() <= db.len() { (&da, &db) } else { (&db, &da) };
    if shorter.len() < min_len {
        return false;
    }

    longer.contains(shorter.as_str())
}

// ============================================================================
// FILE NAMES & PATHS
// ============================================================================

/// Replace OS-illegal characters with '_' and trim trailing dots/spaces.
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| {
            if ILLEGAL_FILENAME_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();

    replaced.trim_end_matches(['.', ' ']).to_string()
}

/// Clean a path typed or pasted at a prompt.
pub fn clean_input_path(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| !INVISIBLE_PATH_CHARS.contains(c))
        .collect::<String>()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim()
        .to_string()
}

// ============================================================================
// TESTS
// ============================================================================
