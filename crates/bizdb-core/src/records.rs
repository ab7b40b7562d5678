//! Data model shared by the crawler, the resolver and the registry layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A business row from the public registry. Authoritative for identity and
/// never modified during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub id: i64,
    pub business_name: Option<String>,
    pub road_address: Option<String>,
    pub lot_address: Option<String>,
    pub postal_code: Option<String>,
    pub status: Option<String>,
    pub detailed_status: Option<String>,
    pub business_type: Option<String>,
    pub license_date: Option<String>,
    pub last_modified: Option<String>,
    pub data_updated_at: Option<String>,
}

impl CanonicalRecord {
    /// Minimal record with just identity fields, mostly useful in tests and
    /// for callers that only need name/address matching.
    #[must_use]
    pub fn new(id: i64, business_name: &str, road_address: &str) -> Self {
        Self {
            id,
            business_name: Some(business_name.to_string()),
            road_address: Some(road_address.to_string()),
            lot_address: None,
            postal_code: None,
            status: None,
            detailed_status: None,
            business_type: None,
            license_date: None,
            last_modified: None,
            data_updated_at: None,
        }
    }
}

/// One unit of crawl work, derived from a canonical record that has both a
/// name and a road address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub id: i64,
    pub business_name: String,
    pub road_address: String,
    /// Stable place identifier on the map site, when a previous pass found one.
    pub place_id: Option<String>,
}

impl WorkItem {
    /// Returns `None` when the record lacks a non-blank name or road address.
    #[must_use]
    pub fn from_canonical(record: &CanonicalRecord) -> Option<Self> {
        let name = record.business_name.as_deref().map(str::trim)?;
        let address = record.road_address.as_deref().map(str::trim)?;
        if name.is_empty() || address.is_empty() {
            return None;
        }
        Some(Self {
            id: record.id,
            business_name: name.to_string(),
            road_address: address.to_string(),
            place_id: None,
        })
    }
}

/// Raw result of scraping one place. `title` is the dedup key of the result
/// store; `query` is the title followed by the (truncated) road address.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrapedItem {
    pub title: String,
    pub query: String,
    #[serde(default)]
    pub place_info: Map<String, Value>,
    #[serde(default)]
    pub tab_list: Vec<String>,
    #[serde(default)]
    pub candidate_links: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ScrapedItem {
    fn info_str(&self, key: &str) -> Option<String> {
        self.place_info
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }
}

/// Outcome of matching a scraped record (or a list of candidates) against
/// canonical data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult<Id = i64> {
    Unique(Id),
    /// Several candidates survived; the first one is the fallback choice.
    Ambiguous(Vec<Id>),
    NoMatch,
}

impl<Id> MatchResult<Id> {
    /// The id a caller should proceed with, if any.
    pub fn chosen(&self) -> Option<&Id> {
        match self {
            MatchResult::Unique(id) => Some(id),
            MatchResult::Ambiguous(ids) => ids.first(),
            MatchResult::NoMatch => None,
        }
    }
}

/// Canonical row joined with what was scraped for it.
///
/// Enrichment passes (menu, photos, coordinates) add entries under
/// `extensions` through [`MergedRecord::with_extension`], which hands back a
/// new record instead of editing the existing one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedRecord {
    #[serde(flatten)]
    pub canonical: CanonicalRecord,
    pub scraped_name: Option<String>,
    pub scraped_address: Option<String>,
    pub scraped_phone: Option<String>,
    pub url: Option<String>,
    pub place_id: Option<String>,
    pub raw_place_info: Value,
    pub tab_list: Vec<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
}

impl MergedRecord {
    /// Join a canonical record with the scraped item that resolved to it.
    #[must_use]
    pub fn from_parts(canonical: &CanonicalRecord, scraped: &ScrapedItem) -> Self {
        Self {
            canonical: canonical.clone(),
            scraped_name: scraped.info_str("title"),
            scraped_address: scraped.info_str("address"),
            scraped_phone: scraped.info_str("phone"),
            url: scraped.url.clone(),
            place_id: scraped.place_id.clone(),
            raw_place_info: Value::Object(scraped.place_info.clone()),
            tab_list: scraped.tab_list.clone(),
            extensions: Map::new(),
        }
    }

    pub fn id(&self) -> i64 {
        self.canonical.id
    }

    #[must_use]
    pub fn with_extension(&self, key: &str, value: Value) -> Self {
        let mut next = self.clone();
        next.extensions.insert(key.to_string(), value);
        next
    }
}

/// Why an attempt ended up in the error log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The list page had no result links.
    NoStore,
    /// The list page had more than one result link.
    MultipleStores,
    /// No embedded-state candidate carried the expected name.
    NoNameMatch,
    /// Several candidates shared the name and none matched the address.
    AmbiguousMatch,
    /// A scraped item did not resolve to any canonical record.
    NoMatch,
    /// The page could not be fetched within the retry budget.
    FetchFailed,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NoStore => "no_store",
            ErrorKind::MultipleStores => "multiple_stores",
            ErrorKind::NoNameMatch => "no_name_match",
            ErrorKind::AmbiguousMatch => "ambiguous_match",
            ErrorKind::NoMatch => "no_match",
            ErrorKind::FetchFailed => "fetch_failed",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the error log. Never deduplicated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub query: String,
    pub title: String,
    pub address: String,
    pub url: String,
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidates: Option<Vec<String>>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorEntry {
    #[must_use]
    pub fn new(kind: ErrorKind, title: &str, address: &str, reason: impl Into<String>) -> Self {
        Self {
            id: None,
            query: String::new(),
            title: title.to_string(),
            address: address.to_string(),
            url: String::new(),
            kind,
            reason: reason.into(),
            candidates: None,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn with_query(mut self, query: &str) -> Self {
        self.query = query.to_string();
        self
    }

    #[must_use]
    pub fn with_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }

    #[must_use]
    pub fn with_candidates(mut self, candidates: Vec<String>) -> Self {
        self.candidates = Some(candidates);
        self
    }
}
