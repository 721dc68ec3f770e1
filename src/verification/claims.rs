//! Numeric claim and number extraction
//!
//! Pure functions over text. The patterns here define what counts as a
//! claim and a number, so boundary behavior is pinned by table tests.

use regex::Regex;
use std::sync::LazyLock;

/// Stands in for the dot of `digit.digit` while sentences are split.
const DECIMAL_PLACEHOLDER: char = '\u{E000}';

static DECIMAL_POINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d)\.(\d)").expect("decimal point regex is valid"));

static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+").expect("sentence end regex is valid"));

static PERCENTAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+[.,]?\d*\s*%").expect("percentage regex is valid"));

static CURRENCY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$[\d,]+\.?\d*").expect("currency regex is valid"));

static MULTI_DECIMAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+\.\d{2,}").expect("multi decimal regex is valid"));

/// Thousands-grouped form first so `1,234.5` is taken whole.
static CLAIM_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"-?\d{1,3}(?:,\d{3})+(?:\.\d+)?|-?\d+(?:\.\d+)?")
        .expect("claim number regex is valid")
});

static LOOSE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d[\d,]*(?:\.\d+)?%?").expect("loose number regex is valid"));

/// A number found inside a claim, with its literal as written
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimNumber {
    /// Literal with thousands separators removed
    pub literal: String,
    pub value: f64,
}

/// Split text into sentences that carry a numeric claim, in order.
pub fn extract_claims(text: &str) -> Vec<String> {
    let protected = DECIMAL_POINT.replace_all(text, format!("${{1}}{}${{2}}", DECIMAL_PLACEHOLDER));

    SENTENCE_END
        .split(&protected)
        .map(|sentence| sentence.replace(DECIMAL_PLACEHOLDER, ".").trim().to_string())
        .filter(|sentence| !sentence.is_empty() && is_numeric_claim(sentence))
        .collect()
}

fn is_numeric_claim(sentence: &str) -> bool {
    PERCENTAGE.is_match(sentence) || CURRENCY.is_match(sentence) || MULTI_DECIMAL.is_match(sentence)
}

/// Numbers embedded in a claim. Digits touching a letter (`Q3`, `10x`)
/// are not numbers.
pub fn extract_claim_numbers(claim: &str) -> Vec<ClaimNumber> {
    let mut numbers = Vec::new();
    let mut start = 0;

    while let Some(mut found) = CLAIM_NUMBER.find_at(claim, start) {
        // A hyphen after a word is a range or a compound, not a sign
        let signed = found.as_str().starts_with('-');
        if signed && char_before(claim, found.start()).is_some_and(is_word_char) {
            match CLAIM_NUMBER.find_at(claim, found.start() + 1) {
                Some(unsigned) => found = unsigned,
                None => break,
            }
        }
        start = found.end();

        let before = char_before(claim, found.start());
        let after = claim[found.end()..].chars().next();

        if before.is_some_and(is_word_char) || after.is_some_and(is_word_char) {
            continue;
        }

        let literal = found.as_str().replace(',', "");
        if let Ok(value) = literal.parse::<f64>() {
            numbers.push(ClaimNumber { literal, value });
        }
    }

    numbers
}

fn char_before(text: &str, index: usize) -> Option<char> {
    text[..index].chars().next_back()
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Every unsigned numeric token in `text`, percent signs and thousands
/// separators stripped.
pub fn extract_numbers(text: &str) -> Vec<f64> {
    LOOSE_NUMBER
        .find_iter(text)
        .filter_map(|found| {
            found
                .as_str()
                .trim_end_matches('%')
                .trim_end_matches(',')
                .replace(',', "")
                .parse::<f64>()
                .ok()
        })
        .collect()
}
