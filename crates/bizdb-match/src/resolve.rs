//! Matching scraped records to canonical rows.

use bizdb_core::{MatchResult, ScrapedItem};
use serde_json::Value;

use crate::index::{CanonicalIndex, NormalizedKey};
use crate::normalize::{address_prefix, normalize, ADDRESS_PREFIX_TOKENS};

/// Recover the address part of a search query built as `"{title} {address}"`.
///
/// When the query does not start with the title the whole query is treated
/// as the address.
#[must_use]
pub fn split_query_address<'a>(title: &str, query: &'a str) -> &'a str {
    let title = title.trim();
    let query = query.trim();
    match query.strip_prefix(title) {
        Some(rest) if !title.is_empty() => rest.trim(),
        _ => query,
    }
}

/// Resolve one scraped item against the canonical index.
///
/// The index keeps one id per key, so the result is either `Unique` or
/// `NoMatch`.
#[must_use]
pub fn resolve(item: &ScrapedItem, index: &CanonicalIndex) -> MatchResult {
    let road_address = split_query_address(&item.title, &item.query);
    let key = NormalizedKey::from_parts(&item.title, road_address);

    match index.lookup(&key) {
        Some(id) => MatchResult::Unique(id),
        None => {
            tracing::info!(
                title = %item.title,
                address_prefix = %address_prefix(road_address, ADDRESS_PREFIX_TOKENS),
                "no canonical match; left for manual review"
            );
            MatchResult::NoMatch
        }
    }
}

/// A place summary embedded in a search-result page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceCandidate {
    pub id: String,
    pub name: String,
    pub road_address: Option<String>,
    pub address: Option<String>,
}

impl PlaceCandidate {
    /// Read a candidate from an embedded-state object. Objects without an
    /// `id` are rejected.
    #[must_use]
    pub fn from_state(value: &Value) -> Option<Self> {
        let id = match value.get("id")? {
            Value::String(s) if !s.is_empty() => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        let text = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Some(Self {
            id,
            name: text("name").unwrap_or_default(),
            road_address: text("roadAddress"),
            address: text("address"),
        })
    }

    fn comparable_address(&self) -> String {
        normalize(
            self.road_address
                .as_deref()
                .or(self.address.as_deref())
                .unwrap_or_default(),
        )
    }
}

/// Pick the candidate that corresponds to a canonical `(name, road_address)`.
///
/// Candidates must match the normalized name exactly. With several name
/// matches, the first whose normalized address contains the canonical
/// address prefix wins. If none does, the result is `Ambiguous` with every
/// name match in input order; callers fall back to the first one.
#[must_use]
pub fn resolve_candidates(
    name: &str,
    road_address: &str,
    candidates: &[PlaceCandidate],
) -> MatchResult<String> {
    let wanted_name = normalize(name);
    let name_matches: Vec<&PlaceCandidate> = candidates
        .iter()
        .filter(|c| !wanted_name.is_empty() && normalize(&c.name) == wanted_name)
        .collect();

    match name_matches.as_slice() {
        [] => MatchResult::NoMatch,
        [only] => MatchResult::Unique(only.id.clone()),
        several => {
            let needle = normalize(&address_prefix(road_address, ADDRESS_PREFIX_TOKENS));
            if let Some(hit) = several
                .iter()
                .find(|c| !needle.is_empty() && c.comparable_address().contains(&needle))
            {
                tracing::debug!(id = %hit.id, "disambiguated by address containment");
                return MatchResult::Unique(hit.id.clone());
            }
            tracing::warn!(
                name,
                matches = several.len(),
                "several name matches and no address containment; using the first"
            );
            MatchResult::Ambiguous(several.iter().map(|c| c.id.clone()).collect())
        }
    }
}

#[cfg(test)]
#[path = "resolve_test.rs"]
mod tests;
