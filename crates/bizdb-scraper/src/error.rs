use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScraperError {
    #[error("failed to launch browser: {reason}")]
    Launch { reason: String },

    #[error("transport failure for {url}: {reason}")]
    Transport { url: String, reason: String },

    #[error("error page served for {url} (matched \"{signature}\")")]
    SoftFailure { url: String, signature: String },

    #[error("none of [{markers}] appeared on {url} within {timeout_secs}s")]
    NoStructuralMarker {
        url: String,
        markers: String,
        timeout_secs: u64,
    },

    #[error("{operation} timed out after {timeout_secs}s for {url}")]
    Timeout {
        operation: &'static str,
        url: String,
        timeout_secs: u64,
    },

    #[error("embedded state parse error for {context}: {source}")]
    Parse {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("gave up on {url} after {attempts} attempts: {last_error}")]
    Exhausted {
        url: String,
        attempts: u32,
        last_error: Box<ScraperError>,
    },

    #[error("invalid CSS selector \"{selector}\"")]
    InvalidSelector { selector: String },
}

impl ScraperError {
    /// Whether the retry policy should try again (with a fresh session).
    ///
    /// Parse and selector errors are deterministic for a given page, so a
    /// retry would only reproduce them.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            ScraperError::Launch { .. }
                | ScraperError::Transport { .. }
                | ScraperError::SoftFailure { .. }
                | ScraperError::NoStructuralMarker { .. }
                | ScraperError::Timeout { .. }
        )
    }
}

/// Failure to read or write a result file or error log. Aborts the run.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize record for {}: {source}", .path.display())]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retriable() {
        let soft = ScraperError::SoftFailure {
            url: "https://m.place.naver.com/place/1".to_owned(),
            signature: "bad gateway".to_owned(),
        };
        let marker = ScraperError::NoStructuralMarker {
            url: "u".to_owned(),
            markers: "div.place_fixed_maintab".to_owned(),
            timeout_secs: 10,
        };
        assert!(soft.is_retriable());
        assert!(marker.is_retriable());
    }

    #[test]
    fn deterministic_errors_are_not_retriable() {
        let parse = ScraperError::Parse {
            context: "state".to_owned(),
            source: serde_json::from_str::<serde_json::Value>("{").unwrap_err(),
        };
        let selector = ScraperError::InvalidSelector {
            selector: "div[".to_owned(),
        };
        assert!(!parse.is_retriable());
        assert!(!selector.is_retriable());
    }

    #[test]
    fn exhausted_message_includes_last_error() {
        let err = ScraperError::Exhausted {
            url: "u".to_owned(),
            attempts: 3,
            last_error: Box::new(ScraperError::Transport {
                url: "u".to_owned(),
                reason: "net::ERR_CONNECTION_RESET".to_owned(),
            }),
        };
        let message = err.to_string();
        assert!(message.contains("3 attempts"));
        assert!(message.contains("ERR_CONNECTION_RESET"));
    }
}
