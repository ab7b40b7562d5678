//! String normalization applied identically to registry and scraped text.

use std::sync::LazyLock;

use regex::Regex;

/// Number of leading address tokens used for matching and search queries.
pub const ADDRESS_PREFIX_TOKENS: usize = 3;

static PARENTHETICAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\([^)]*\)").expect("valid regex"));

/// Normalize a name or address for comparison.
///
/// Drops parenthetical annotations such as `(2F)` or `(본점)`, lower-cases,
/// and keeps only alphanumeric characters (any script, so Hangul survives)
/// and `_`. Whitespace, punctuation and invisible characters like U+200B
/// disappear entirely.
///
/// The function is idempotent.
#[must_use]
pub fn normalize(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let stripped = PARENTHETICAL_RE.replace_all(text, "");
    // Lower-case before filtering: some capitals lower-case into a base
    // letter plus a combining mark, which must be filtered too.
    stripped
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect()
}

/// First `n` whitespace-separated tokens of `address`, joined by a single
/// space. Addresses with fewer than `n` tokens are returned unchanged.
#[must_use]
pub fn address_prefix(address: &str, n: usize) -> String {
    let tokens: Vec<&str> = address.split_whitespace().collect();
    if tokens.len() >= n {
        tokens[..n].join(" ")
    } else {
        address.to_string()
    }
}
