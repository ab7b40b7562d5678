use crate::app_config::AppConfig;
use crate::ConfigError;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if a value is present but cannot be parsed.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if a value is present but cannot be parsed.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Decoupled from the process environment so tests can drive it with a
/// plain `HashMap`.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::path::PathBuf;

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let invalid = |var: &str, reason: String| ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason,
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        or_default(var, default)
            .parse::<u32>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        or_default(var, default)
            .parse::<u64>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_usize = |var: &str, default: &str| -> Result<usize, ConfigError> {
        or_default(var, default)
            .parse::<usize>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_bool = |var: &str, default: &str| -> Result<bool, ConfigError> {
        let raw = or_default(var, default);
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(invalid(var, format!("expected a boolean, got '{other}'"))),
        }
    };

    let log_level = or_default("BIZDB_LOG_LEVEL", "info");

    let registry_path = PathBuf::from(or_default("BIZDB_REGISTRY_PATH", "./food_data.db"));
    let merged_db_path = PathBuf::from(or_default("BIZDB_MERGED_DB_PATH", "./food_merged.db"));
    let data_dir = PathBuf::from(or_default("BIZDB_DATA_DIR", "./web_data"));
    let error_dir = PathBuf::from(or_default("BIZDB_ERROR_DIR", "./error_logs"));

    let base_url = or_default("BIZDB_BASE_URL", "https://m.place.naver.com")
        .trim_end_matches('/')
        .to_string();
    if base_url.is_empty() {
        return Err(invalid("BIZDB_BASE_URL", "must not be empty".to_string()));
    }

    let headless = parse_bool("BIZDB_HEADLESS", "true")?;
    let browser_executable = lookup("BIZDB_BROWSER_EXECUTABLE")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from);

    let nav_timeout_secs = parse_u64("BIZDB_NAV_TIMEOUT_SECS", "30")?;
    let marker_timeout_secs = parse_u64("BIZDB_MARKER_TIMEOUT_SECS", "10")?;
    let stop_timeout_secs = parse_u64("BIZDB_STOP_TIMEOUT_SECS", "10")?;
    let fetch_max_attempts = parse_u32("BIZDB_FETCH_MAX_ATTEMPTS", "30")?;
    if fetch_max_attempts == 0 {
        return Err(invalid(
            "BIZDB_FETCH_MAX_ATTEMPTS",
            "must be at least 1".to_string(),
        ));
    }
    let fetch_backoff_ms = parse_u64("BIZDB_FETCH_BACKOFF_MS", "3000")?;
    let session_restart_every = parse_usize("BIZDB_SESSION_RESTART_EVERY", "10")?;
    let inter_item_delay_ms = parse_u64("BIZDB_INTER_ITEM_DELAY_MS", "0")?;

    Ok(AppConfig {
        log_level,
        registry_path,
        merged_db_path,
        data_dir,
        error_dir,
        base_url,
        headless,
        browser_executable,
        nav_timeout_secs,
        marker_timeout_secs,
        stop_timeout_secs,
        fetch_max_attempts,
        fetch_backoff_ms,
        session_restart_every,
        inter_item_delay_ms,
    })
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
