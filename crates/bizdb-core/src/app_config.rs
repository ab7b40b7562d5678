use std::path::PathBuf;

/// Runtime settings for the crawl and reconcile commands.
///
/// Every field has a default, so an empty environment yields a usable
/// development configuration. CLI flags override the partition bounds and
/// browser visibility on top of these values.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub log_level: String,
    /// SQLite file holding the public business registry.
    pub registry_path: PathBuf,
    /// SQLite file receiving merged rows from `reconcile`.
    pub merged_db_path: PathBuf,
    pub data_dir: PathBuf,
    pub error_dir: PathBuf,
    /// Origin of the map/review site, without a trailing slash.
    pub base_url: String,
    pub headless: bool,
    pub browser_executable: Option<PathBuf>,
    pub nav_timeout_secs: u64,
    pub marker_timeout_secs: u64,
    /// Upper bound on stopping a browser before it is killed.
    pub stop_timeout_secs: u64,
    pub fetch_max_attempts: u32,
    pub fetch_backoff_ms: u64,
    /// Proactive browser restart interval, in work items. `0` disables it.
    pub session_restart_every: usize,
    pub inter_item_delay_ms: u64,
}

impl AppConfig {
    /// Result file for the partition starting at `start`.
    #[must_use]
    pub fn output_path(&self, start: u64) -> PathBuf {
        self.data_dir.join(format!("crawl_output_{start}.json"))
    }

    /// Error log for the partition starting at `start`.
    #[must_use]
    pub fn error_log_path(&self, start: u64) -> PathBuf {
        self.error_dir.join(format!("error_log_{start}.jsonl"))
    }
}
