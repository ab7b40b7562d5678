//! The `reconcile` command: merge crawl result files with the registry.
//!
//! Every `*.json` result file in the input directory is read in name order,
//! each scraped item is resolved against the whole registry, and the matches
//! are written both as a JSON file and into the `restaurant_merged` table.
//! Items that resolve to nothing go to a review log.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use bizdb_core::{AppConfig, CanonicalRecord, ErrorEntry, ErrorKind, ScrapedItem};
use bizdb_match::{reconcile, split_query_address, Reconciliation};
use bizdb_scraper::ErrorLog;

const REVIEW_LOG_FILE: &str = "reconcile_unmatched.jsonl";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReconcileSummary {
    pub files: usize,
    pub merged: usize,
    pub unmatched: usize,
}

/// # Errors
///
/// Returns an error if the registry or the input directory cannot be read,
/// or if the merged output cannot be written.
pub(crate) async fn run_reconcile(
    config: &AppConfig,
    input: &Path,
    output: &Path,
) -> anyhow::Result<ReconcileSummary> {
    let registry = bizdb_db::connect_registry(&config.registry_path)
        .await
        .context("opening business registry")?;
    let records = bizdb_db::load_canonical_records(&registry, None).await?;
    registry.close().await;
    tracing::info!(records = records.len(), input = %input.display(), "reconciling crawl results");

    let review = ErrorLog::new(config.error_dir.join(REVIEW_LOG_FILE));
    let (reconciliation, summary) = reconcile_dir(input, &records, output, &review)?;

    if !reconciliation.merged.is_empty() {
        let merged = bizdb_db::connect_merged(&config.merged_db_path)
            .await
            .context("opening merged database")?;
        bizdb_db::create_merged_table(&merged).await?;
        bizdb_db::upsert_merged_records(&merged, &reconciliation.merged)
            .await
            .context("storing merged rows")?;
        merged.close().await;
    }

    Ok(summary)
}

/// Resolve every result file in `input`, write merged records to `output`
/// and log unmatched items to `review`.
fn reconcile_dir(
    input: &Path,
    records: &[CanonicalRecord],
    output: &Path,
    review: &ErrorLog,
) -> anyhow::Result<(Reconciliation, ReconcileSummary)> {
    let (items, files) = load_result_files(input)?;
    let reconciliation = reconcile(&items, records);

    for item in &reconciliation.unmatched {
        let address = split_query_address(&item.title, &item.query);
        let mut entry = ErrorEntry::new(
            ErrorKind::NoMatch,
            &item.title,
            address,
            "no registry row matches the name and address",
        )
        .with_query(&item.query);
        if let Some(url) = &item.url {
            entry = entry.with_url(url);
        }
        review
            .append(&entry)
            .with_context(|| format!("logging unmatched item {}", item.title))?;
    }

    write_json(output, &reconciliation.merged)?;

    let summary = ReconcileSummary {
        files,
        merged: reconciliation.merged.len(),
        unmatched: reconciliation.unmatched.len(),
    };
    tracing::info!(
        files = summary.files,
        merged = summary.merged,
        unmatched = summary.unmatched,
        output = %output.display(),
        "reconcile finished"
    );
    Ok((reconciliation, summary))
}

/// Scraped items from every readable `*.json` file in `dir`, in file-name
/// order. Returns the items and the number of files they came from.
fn load_result_files(dir: &Path) -> anyhow::Result<(Vec<ScrapedItem>, usize)> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("reading result directory {}", dir.display()))?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    let mut items = Vec::new();
    let mut files = 0;
    for path in paths {
        let parsed = fs::read_to_string(&path)
            .map_err(anyhow::Error::from)
            .and_then(|raw| {
                serde_json::from_str::<Vec<ScrapedItem>>(&raw).map_err(anyhow::Error::from)
            });
        match parsed {
            Ok(batch) => {
                tracing::debug!(path = %path.display(), items = batch.len(), "result file loaded");
                items.extend(batch);
                files += 1;
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "skipping unreadable result file");
            }
        }
    }
    Ok((items, files))
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let body = serde_json::to_string_pretty(value)?;
    fs::write(path, body).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn scraped(title: &str, road_address: &str) -> serde_json::Value {
        json!({
            "title": title,
            "query": format!("{title} {road_address}"),
            "place_info": {"title": title, "phone": "02-000-0000"},
            "tab_list": ["/restaurant/1/home"],
            "candidate_links": [],
            "url": "https://m.place.naver.com/restaurant/list?query=x"
        })
    }

    fn registry() -> Vec<CanonicalRecord> {
        vec![
            CanonicalRecord::new(1, "Seoul BBQ", "Gangnam-gu Teheran-ro 152"),
            CanonicalRecord::new(2, "Busan Noodle", "Haeundae-gu Gunam-ro 10"),
        ]
    }

    #[test]
    fn merges_matches_and_logs_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("web_data");
        fs::create_dir_all(&input).unwrap();
        fs::write(
            input.join("crawl_output_0.json"),
            json!([scraped("Seoul BBQ", "Gangnam-gu Teheran-ro 152 2F")]).to_string(),
        )
        .unwrap();
        fs::write(
            input.join("crawl_output_1000.json"),
            json!([
                scraped("Busan Noodle", "Haeundae-gu Gunam-ro 10"),
                scraped("Unknown Diner", "Jung-gu Sejong-daero 1")
            ])
            .to_string(),
        )
        .unwrap();
        fs::write(input.join("crawl_output_2000.json"), "[{\"title\": ").unwrap();
        fs::write(input.join("notes.txt"), "not a result file").unwrap();

        let output = dir.path().join("out/merged_data.json");
        let review = ErrorLog::new(dir.path().join("error_logs/reconcile_unmatched.jsonl"));

        let (reconciliation, summary) =
            reconcile_dir(&input, &registry(), &output, &review).unwrap();

        assert_eq!(
            summary,
            ReconcileSummary {
                files: 2,
                merged: 2,
                unmatched: 1
            }
        );
        let ids: Vec<i64> = reconciliation.merged.iter().map(|m| m.id()).collect();
        assert_eq!(ids, vec![1, 2]);

        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(written.as_array().unwrap().len(), 2);
        assert_eq!(written[0]["scraped_phone"], "02-000-0000");

        let logged = review.read_all();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0]["type"], "no_match");
        assert_eq!(logged[0]["title"], "Unknown Diner");
        assert_eq!(logged[0]["address"], "Jung-gu Sejong-daero 1");
    }

    #[test]
    fn empty_directory_writes_an_empty_array() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("merged_data.json");
        let review = ErrorLog::new(dir.path().join("review.jsonl"));

        let (_, summary) = reconcile_dir(dir.path(), &registry(), &output, &review).unwrap();

        assert_eq!(summary, ReconcileSummary::default());
        assert_eq!(fs::read_to_string(&output).unwrap(), "[]");
        assert!(review.read_all().is_empty());
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let review = ErrorLog::new(dir.path().join("review.jsonl"));
        let err = reconcile_dir(
            &dir.path().join("absent"),
            &registry(),
            &dir.path().join("out.json"),
            &review,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("reading result directory"));
    }
}
