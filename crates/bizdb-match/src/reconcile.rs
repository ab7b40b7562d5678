//! Batch reconciliation of scraped items against the full registry.

use std::collections::HashMap;

use bizdb_core::{CanonicalRecord, MatchResult, MergedRecord, ScrapedItem};

use crate::index::build_index;
use crate::resolve::resolve;

/// Outcome of reconciling one batch of scraped items.
#[derive(Debug, Default)]
pub struct Reconciliation {
    pub merged: Vec<MergedRecord>,
    pub unmatched: Vec<ScrapedItem>,
}

/// Resolve every scraped item and merge the matches with their canonical row.
///
/// Items are processed in input order. Unmatched items are returned untouched
/// so the caller can log them for review.
#[must_use]
pub fn reconcile(items: &[ScrapedItem], records: &[CanonicalRecord]) -> Reconciliation {
    let index = build_index(records);
    let by_id: HashMap<i64, &CanonicalRecord> = records.iter().map(|r| (r.id, r)).collect();

    let mut out = Reconciliation::default();
    for item in items {
        let canonical = match resolve(item, &index) {
            MatchResult::Unique(id) => by_id.get(&id).copied(),
            MatchResult::Ambiguous(_) | MatchResult::NoMatch => None,
        };
        match canonical {
            Some(record) => out.merged.push(MergedRecord::from_parts(record, item)),
            None => out.unmatched.push(item.clone()),
        }
    }

    tracing::info!(
        merged = out.merged.len(),
        unmatched = out.unmatched.len(),
        "reconciliation finished"
    );
    out
}
