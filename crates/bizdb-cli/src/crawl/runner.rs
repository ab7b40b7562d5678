//! Per-item crawl loop.
//!
//! Every work item ends in exactly one [`ItemOutcome`]. Fetch errors become
//! a `fetch_failed` error-log entry and a `Failed` outcome; resolution
//! problems become review entries. Scraped items are upserted as merged
//! drafts as soon as they are stored. Only persistence errors leave the loop.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use bizdb_core::{
    CanonicalRecord, ErrorEntry, ErrorKind, MatchResult, MergedRecord, ScrapedItem, WorkItem,
};
use bizdb_db::SqlitePool;
use bizdb_match::{address_prefix, resolve_candidates, PlaceCandidate, ADDRESS_PREFIX_TOKENS};
use bizdb_scraper::{
    page, AppendOutcome, BrowserLauncher, EmbeddedStateExtractor, ErrorLog, Extractor,
    PlaceUrls, ResilientFetcher, ResultStore, ScraperError, SessionManager, StoreError,
};

use super::detail::detail_fields;
use super::CrawlMode;

const PLACE_SUMMARY_PREFIX: &str = "PlaceSummary:";

/// Outcome of processing a single work item.
#[derive(Debug)]
pub(crate) enum ItemOutcome {
    /// A detail page was scraped. `review` is set when the place was chosen
    /// by fallback and the choice should be checked by hand.
    Scraped {
        item: ScrapedItem,
        review: Option<ErrorKind>,
    },
    NeedsReview(ErrorKind),
    Failed,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CrawlTotals {
    pub success: usize,
    pub failed: usize,
    pub needs_review: usize,
}

impl ItemOutcome {
    fn label(&self) -> &'static str {
        match self {
            ItemOutcome::Scraped { review: None, .. } => "success",
            ItemOutcome::Scraped {
                review: Some(kind), ..
            }
            | ItemOutcome::NeedsReview(kind) => kind.as_str(),
            ItemOutcome::Failed => "failed",
        }
    }
}

impl CrawlTotals {
    fn record(&mut self, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::Scraped { review: None, .. } => self.success += 1,
            ItemOutcome::Scraped { review: Some(_), .. } | ItemOutcome::NeedsReview(_) => {
                self.needs_review += 1;
            }
            ItemOutcome::Failed => self.failed += 1,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct CrawlReport {
    pub totals: CrawlTotals,
    /// Registry rows without a usable name or road address.
    pub skipped: usize,
    pub drafts: Vec<MergedRecord>,
    pub restarts: u32,
}

/// A fetch that gave up, with the query and page the item was working on.
#[derive(Debug)]
struct FetchFailure {
    query: String,
    url: String,
    error: ScraperError,
}

/// Errors that end an item before it reaches an outcome.
#[derive(Debug)]
enum ItemError {
    Fetch(FetchFailure),
    Store(StoreError),
}

impl ItemError {
    fn fetch(query: &str, url: &str) -> impl FnOnce(ScraperError) -> Self {
        let (query, url) = (query.to_owned(), url.to_owned());
        move |error| Self::Fetch(FetchFailure { query, url, error })
    }
}

impl From<StoreError> for ItemError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

/// Where a detail page came from, for the scraped item's identity fields.
struct Located<'a> {
    title: &'a str,
    query: &'a str,
    url: &'a str,
    place_id: Option<String>,
    candidate_links: Vec<String>,
    review: Option<ErrorKind>,
}

pub(crate) struct Crawler<L: BrowserLauncher> {
    sessions: SessionManager<L>,
    fetcher: ResilientFetcher,
    urls: PlaceUrls,
    store: ResultStore,
    errors: ErrorLog,
    mode: CrawlMode,
    item_delay: Duration,
    known_places: HashMap<i64, String>,
    merged: Option<SqlitePool>,
}

impl<L: BrowserLauncher> Crawler<L> {
    pub(crate) fn new(
        sessions: SessionManager<L>,
        fetcher: ResilientFetcher,
        urls: PlaceUrls,
        store: ResultStore,
        errors: ErrorLog,
    ) -> Self {
        Self {
            sessions,
            fetcher,
            urls,
            store,
            errors,
            mode: CrawlMode::default(),
            item_delay: Duration::ZERO,
            known_places: HashMap::new(),
            merged: None,
        }
    }

    #[must_use]
    pub(crate) fn with_mode(mut self, mode: CrawlMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub(crate) fn with_item_delay(mut self, delay: Duration) -> Self {
        self.item_delay = delay;
        self
    }

    /// Place ids found by earlier runs; those items skip the search page.
    #[must_use]
    pub(crate) fn with_known_places(mut self, known: HashMap<i64, String>) -> Self {
        self.known_places = known;
        self
    }

    /// Upsert each merged draft into `pool` as soon as its item is scraped.
    #[must_use]
    pub(crate) fn with_merged_db(mut self, pool: SqlitePool) -> Self {
        self.merged = Some(pool);
        self
    }

    /// Crawl every record with a name and road address, in order.
    ///
    /// # Errors
    ///
    /// Returns an error only when the result store, the error log or the
    /// merged database cannot be written. Everything else is absorbed into
    /// the totals.
    pub(crate) async fn run(&mut self, records: &[CanonicalRecord]) -> anyhow::Result<CrawlReport> {
        let mut report = CrawlReport::default();
        let total = records.len();

        for (position, record) in records.iter().enumerate() {
            let Some(mut item) = WorkItem::from_canonical(record) else {
                tracing::debug!(id = record.id, "skipping record without name or road address");
                report.skipped += 1;
                continue;
            };
            item.place_id = self.known_places.get(&item.id).cloned();

            let outcome = match self.process(&item).await {
                Ok(outcome) => outcome,
                Err(ItemError::Store(err)) => {
                    return Err(err).with_context(|| format!("crawling registry id {}", item.id));
                }
                Err(ItemError::Fetch(failure)) => {
                    tracing::error!(
                        id = item.id,
                        name = %item.business_name,
                        url = %failure.url,
                        error = %failure.error,
                        "item failed"
                    );
                    let entry = ErrorEntry::new(
                        ErrorKind::FetchFailed,
                        &item.business_name,
                        &item.road_address,
                        failure.error.to_string(),
                    )
                    .with_id(item.id)
                    .with_query(&failure.query)
                    .with_url(&failure.url);
                    self.errors
                        .append(&entry)
                        .with_context(|| format!("logging failure for registry id {}", item.id))?;
                    ItemOutcome::Failed
                }
            };

            report.totals.record(&outcome);
            if let ItemOutcome::Scraped { item: scraped, .. } = &outcome {
                let draft = MergedRecord::from_parts(record, scraped);
                if let Some(pool) = &self.merged {
                    bizdb_db::upsert_merged_record(pool, &draft)
                        .await
                        .with_context(|| format!("storing merged draft for registry id {}", item.id))?;
                }
                report.drafts.push(draft);
            }
            tracing::info!(
                position = position + 1,
                total,
                id = item.id,
                outcome = outcome.label(),
                success = report.totals.success,
                failed = report.totals.failed,
                needs_review = report.totals.needs_review,
                "item done"
            );

            if let Err(err) = self.sessions.tick_item().await {
                tracing::warn!(error = %err, "scheduled browser restart failed; relaunching on next fetch");
            }
            if !self.item_delay.is_zero() {
                tokio::time::sleep(self.item_delay).await;
            }
        }

        report.restarts = self.sessions.restarts();
        Ok(report)
    }

    pub(crate) async fn shutdown(&mut self) {
        self.sessions.shutdown().await;
    }

    async fn process(&mut self, item: &WorkItem) -> Result<ItemOutcome, ItemError> {
        if let Some(place_id) = item.place_id.clone() {
            return self.crawl_known_place(item, place_id).await;
        }
        match self.mode {
            CrawlMode::Search => self.crawl_by_search(item).await,
            CrawlMode::Address => self.crawl_by_address(item).await,
        }
    }

    async fn crawl_known_place(
        &mut self,
        item: &WorkItem,
        place_id: String,
    ) -> Result<ItemOutcome, ItemError> {
        let query = search_query(item);
        let url = self.urls.detail(&place_id);
        self.scrape_detail(
            item,
            &url,
            Located {
                title: &item.business_name,
                query: &query,
                url: &url,
                place_id: Some(place_id),
                candidate_links: Vec::new(),
                review: None,
            },
        )
        .await
    }

    async fn crawl_by_search(&mut self, item: &WorkItem) -> Result<ItemOutcome, ItemError> {
        let query = search_query(item);
        let list_url = self.urls.search(&query);
        let list = self
            .fetcher
            .fetch(
                &mut self.sessions,
                &list_url,
                &[page::LIST_READY, page::EMPTY_RESULT],
            )
            .await
            .map_err(ItemError::fetch(&query, &list_url))?;

        let links = page::list_candidate_links(&list.html);

        match links.as_slice() {
            [] => {
                let reason = if page::is_empty_result(&list.html) {
                    "search returned no places"
                } else {
                    "no place links on the result list"
                };
                self.review(
                    item,
                    ErrorKind::NoStore,
                    &query,
                    &list_url,
                    reason.to_owned(),
                    None,
                )
            }
            [link] => {
                let detail_url = self.urls.absolute(link);
                self.scrape_detail(
                    item,
                    &detail_url,
                    Located {
                        title: &item.business_name,
                        query: &query,
                        url: &list_url,
                        place_id: page::place_id_from_link(link),
                        candidate_links: links.clone(),
                        review: None,
                    },
                )
                .await
            }
            several => self.review(
                item,
                ErrorKind::MultipleStores,
                &query,
                &list_url,
                format!("search returned {} places", several.len()),
                Some(several.to_vec()),
            ),
        }
    }

    async fn crawl_by_address(&mut self, item: &WorkItem) -> Result<ItemOutcome, ItemError> {
        let query = item.road_address.clone();
        let search_url = self.urls.address_search(&query);
        let found = self
            .fetcher
            .fetch(&mut self.sessions, &search_url, &[page::ADDRESS_READY])
            .await
            .map_err(ItemError::fetch(&query, &search_url))?;

        let state = EmbeddedStateExtractor::apollo()
            .with_type_prefix(PLACE_SUMMARY_PREFIX)
            .extract(&found.html);
        let candidates: Vec<PlaceCandidate> = state
            .entities
            .iter()
            .filter_map(|e| PlaceCandidate::from_state(&e.value))
            .collect();
        if candidates.is_empty() {
            return self.review(
                item,
                ErrorKind::NoStore,
                &query,
                &search_url,
                format!(
                    "no place summaries on address search ({} of {} state blocks parsed)",
                    state.blocks_parsed, state.blocks_found
                ),
                None,
            );
        }

        let matched = resolve_candidates(&item.business_name, &item.road_address, &candidates);
        let review = match &matched {
            MatchResult::Unique(_) => None,
            MatchResult::Ambiguous(ids) => {
                let entry = ErrorEntry::new(
                    ErrorKind::AmbiguousMatch,
                    &item.business_name,
                    &item.road_address,
                    format!("{} places share the name; using the first", ids.len()),
                )
                .with_id(item.id)
                .with_query(&query)
                .with_url(&search_url)
                .with_candidates(ids.clone());
                self.errors.append(&entry)?;
                Some(ErrorKind::AmbiguousMatch)
            }
            MatchResult::NoMatch => {
                let names = candidates.iter().map(|c| c.name.clone()).collect();
                return self.review(
                    item,
                    ErrorKind::NoNameMatch,
                    &query,
                    &search_url,
                    format!("none of {} places carries the name", candidates.len()),
                    Some(names),
                );
            }
        };

        let Some(candidate) = matched
            .chosen()
            .and_then(|id| candidates.iter().find(|c| &c.id == id))
        else {
            return Ok(ItemOutcome::NeedsReview(ErrorKind::NoNameMatch));
        };
        let detail_url = self.urls.detail(&candidate.id);
        self.scrape_detail(
            item,
            &detail_url,
            Located {
                title: &candidate.name,
                query: &query,
                url: &detail_url,
                place_id: Some(candidate.id.clone()),
                candidate_links: Vec::new(),
                review,
            },
        )
        .await
    }

    async fn scrape_detail(
        &mut self,
        item: &WorkItem,
        detail_url: &str,
        located: Located<'_>,
    ) -> Result<ItemOutcome, ItemError> {
        let detail = self
            .fetcher
            .fetch(&mut self.sessions, detail_url, &[page::DETAIL_READY])
            .await
            .map_err(ItemError::fetch(located.query, detail_url))?;
        let (place_info, tab_list) = detail_fields(&detail.html);

        let scraped = ScrapedItem {
            title: located.title.to_owned(),
            query: located.query.to_owned(),
            place_info,
            tab_list,
            candidate_links: located.candidate_links,
            place_id: located.place_id,
            url: Some(located.url.to_owned()),
        };
        match self.store.append(&scraped)? {
            AppendOutcome::Appended => {
                tracing::info!(id = item.id, title = %scraped.title, attempts = detail.attempts, "place stored");
            }
            AppendOutcome::Duplicate => {
                tracing::debug!(id = item.id, title = %scraped.title, "place already stored");
            }
        }
        Ok(ItemOutcome::Scraped {
            item: scraped,
            review: located.review,
        })
    }

    fn review(
        &self,
        item: &WorkItem,
        kind: ErrorKind,
        query: &str,
        url: &str,
        reason: String,
        candidates: Option<Vec<String>>,
    ) -> Result<ItemOutcome, ItemError> {
        tracing::info!(id = item.id, name = %item.business_name, kind = %kind, %reason, "needs review");
        let mut entry = ErrorEntry::new(kind, &item.business_name, &item.road_address, reason)
            .with_id(item.id)
            .with_query(query)
            .with_url(url);
        if let Some(candidates) = candidates {
            entry = entry.with_candidates(candidates);
        }
        self.errors.append(&entry)?;
        Ok(ItemOutcome::NeedsReview(kind))
    }
}

/// List-search query: the business name and the leading road-address tokens.
pub(crate) fn search_query(item: &WorkItem) -> String {
    format!(
        "{} {}",
        item.business_name,
        address_prefix(&item.road_address, ADDRESS_PREFIX_TOKENS)
    )
}

#[cfg(test)]
#[path = "runner_test.rs"]
mod tests;
