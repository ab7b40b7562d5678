//! The `crawl` command.
//!
//! Loads one partition of the registry, walks it item by item through a
//! single browser session, and writes results, review entries and merged
//! drafts as each item finishes. Per-item failures are logged and counted;
//! only a result file, error log or merged row that cannot be written stops
//! the run.

mod detail;
mod runner;

use std::time::Duration;

use anyhow::Context;
use bizdb_core::AppConfig;
use bizdb_db::Partition;
use bizdb_scraper::{
    ChromiumLauncher, ErrorLog, LaunchOptions, PlaceUrls, ResilientFetcher, ResultStore,
    SessionManager,
};
use clap::{Args, ValueEnum};

pub(crate) use runner::{CrawlTotals, Crawler};

/// How a work item is located on the map site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CrawlMode {
    /// Restaurant list search by name and address
    #[default]
    Search,
    /// Address search, matched against embedded place summaries
    Address,
}

#[derive(Debug, Args)]
pub struct CrawlArgs {
    /// First registry row to crawl (0-based offset)
    #[arg(long, default_value_t = 0)]
    pub start: u64,

    /// Row offset to stop before; defaults to the end of the registry
    #[arg(long)]
    pub end: Option<u64>,

    /// Run the browser without a window
    #[arg(long, conflicts_with = "headed")]
    pub headless: bool,

    /// Run the browser with a visible window
    #[arg(long)]
    pub headed: bool,

    #[arg(long, value_enum, default_value_t = CrawlMode::Search)]
    pub mode: CrawlMode,
}

impl CrawlArgs {
    /// Browser visibility requested on the command line, if any.
    #[must_use]
    pub fn headless_override(&self) -> Option<bool> {
        match (self.headless, self.headed) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

/// Run the crawl for the partition named by `args`.
///
/// # Errors
///
/// Returns an error if the registry cannot be read, the partition is
/// invalid, or a result file, error log or merged draft cannot be written.
pub(crate) async fn run_crawl(config: &AppConfig, args: &CrawlArgs) -> anyhow::Result<CrawlTotals> {
    let mut config = config.clone();
    if let Some(headless) = args.headless_override() {
        config.headless = headless;
    }

    let registry = bizdb_db::connect_registry(&config.registry_path)
        .await
        .context("opening business registry")?;
    let end = match args.end {
        Some(end) => end,
        None => bizdb_db::count_canonical_records(&registry).await?,
    };
    let partition = Partition::new(args.start, end)?;
    let records = bizdb_db::load_canonical_records(&registry, Some(partition)).await?;
    registry.close().await;

    tracing::info!(
        start = args.start,
        end,
        records = records.len(),
        mode = ?args.mode,
        headless = config.headless,
        "starting crawl"
    );

    let merged = bizdb_db::connect_merged(&config.merged_db_path)
        .await
        .context("opening merged database")?;
    bizdb_db::create_merged_table(&merged).await?;
    let known_places = bizdb_db::load_known_place_ids(&merged).await?;

    let sessions = SessionManager::new(
        ChromiumLauncher,
        LaunchOptions::from_config(&config),
        config.session_restart_every,
    );
    let mut crawler = Crawler::new(
        sessions,
        ResilientFetcher::from_config(&config),
        PlaceUrls::new(&config.base_url),
        ResultStore::new(config.output_path(args.start)),
        ErrorLog::new(config.error_log_path(args.start)),
    )
    .with_mode(args.mode)
    .with_item_delay(Duration::from_millis(config.inter_item_delay_ms))
    .with_known_places(known_places)
    .with_merged_db(merged.clone());

    let report = crawler.run(&records).await;
    crawler.shutdown().await;
    merged.close().await;
    let report = report?;

    tracing::info!(
        success = report.totals.success,
        failed = report.totals.failed,
        needs_review = report.totals.needs_review,
        skipped = report.skipped,
        drafts = report.drafts.len(),
        restarts = report.restarts,
        "crawl finished"
    );
    Ok(report.totals)
}
