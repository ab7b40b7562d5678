//! Page fetching that survives browser crashes and error pages.
//!
//! One attempt is: navigate, poll until a structural marker appears, read
//! the markup. Error banners that render with a successful transport
//! (proxy pages, crashed tabs) are caught by scanning the visible text for
//! known signatures. A failed attempt always replaces the browser session
//! before the next one.

use std::time::Duration;

use bizdb_core::AppConfig;
use tokio::time::{timeout, Instant};

use crate::error::ScraperError;
use crate::page;
use crate::session::{BrowserLauncher, PageDriver, SessionManager};

/// Lower-cased fragments of error pages that still load "successfully".
pub const SOFT_FAILURE_SIGNATURES: &[&str] = &[
    "internal server error",
    "proxy error",
    "nginx",
    "html error",
    "bad gateway",
    "sigkill",
    "sigtrap",
    "aw, snap",
    "aw snap",
    "페이지를 표시하는 도중 문제",
];

const MARKER_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// The same delay before every retry.
    Fixed,
    /// `delay * attempt`.
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first; at least 1.
    pub max_attempts: u32,
    pub delay: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Sleep after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Linear => self.delay.saturating_mul(attempt.max(1)),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            delay: Duration::from_secs(3),
            backoff: Backoff::Fixed,
        }
    }
}

/// Markup accepted by the fetcher.
#[derive(Debug, Clone)]
pub struct PageContent {
    pub url: String,
    pub html: String,
    /// Index into the marker list of the marker that was found.
    pub marker: usize,
    pub attempts: u32,
}

#[derive(Debug, Clone)]
pub struct ResilientFetcher {
    policy: RetryPolicy,
    nav_timeout: Duration,
    marker_timeout: Duration,
    poll_interval: Duration,
    signatures: Vec<String>,
}

impl ResilientFetcher {
    #[must_use]
    pub fn new(policy: RetryPolicy, nav_timeout: Duration, marker_timeout: Duration) -> Self {
        Self {
            policy: RetryPolicy {
                max_attempts: policy.max_attempts.max(1),
                ..policy
            },
            nav_timeout,
            marker_timeout,
            poll_interval: MARKER_POLL_INTERVAL,
            signatures: SOFT_FAILURE_SIGNATURES
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
        }
    }

    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            RetryPolicy {
                max_attempts: config.fetch_max_attempts,
                delay: Duration::from_millis(config.fetch_backoff_ms),
                backoff: Backoff::Fixed,
            },
            Duration::from_secs(config.nav_timeout_secs),
            Duration::from_secs(config.marker_timeout_secs),
        )
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// First soft-failure signature found in the visible text of `html`.
    #[must_use]
    pub fn soft_failure(&self, html: &str) -> Option<&str> {
        let text = page::visible_text(html).to_lowercase();
        self.signatures
            .iter()
            .find(|sig| text.contains(sig.as_str()))
            .map(String::as_str)
    }

    /// Fetch `url` and wait until one of `markers` (CSS selectors) is present.
    ///
    /// Retriable failures restart the session and try again, up to the
    /// policy's attempt bound.
    ///
    /// # Errors
    ///
    /// - [`ScraperError::Exhausted`] once every attempt has failed; it wraps
    ///   the last attempt's error.
    /// - Non-retriable errors (such as [`ScraperError::InvalidSelector`]) are
    ///   returned as-is on first occurrence.
    pub async fn fetch<L: BrowserLauncher>(
        &self,
        sessions: &mut SessionManager<L>,
        url: &str,
        markers: &[&str],
    ) -> Result<PageContent, ScraperError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = match sessions.driver().await {
                Ok(driver) => self.attempt(driver, url, markers).await,
                Err(err) => Err(err),
            };

            let err = match result {
                Ok((html, marker)) => {
                    sessions.mark_ready();
                    return Ok(PageContent {
                        url: url.to_owned(),
                        html,
                        marker,
                        attempts: attempt,
                    });
                }
                Err(err) if !err.is_retriable() => return Err(err),
                Err(err) => err,
            };

            tracing::warn!(
                url,
                attempt,
                max_attempts = self.policy.max_attempts,
                error = %err,
                "fetch attempt failed; restarting browser"
            );
            sessions.mark_degraded();
            if let Err(restart_err) = sessions.restart().await {
                tracing::warn!(error = %restart_err, "browser restart failed");
            }

            if attempt >= self.policy.max_attempts {
                return Err(ScraperError::Exhausted {
                    url: url.to_owned(),
                    attempts: attempt,
                    last_error: Box::new(err),
                });
            }
            tokio::time::sleep(self.policy.delay_after(attempt)).await;
        }
    }

    async fn attempt<D: PageDriver>(
        &self,
        driver: &mut D,
        url: &str,
        markers: &[&str],
    ) -> Result<(String, usize), ScraperError> {
        timeout(self.nav_timeout, driver.navigate(url))
            .await
            .map_err(|_| ScraperError::Timeout {
                operation: "navigation",
                url: url.to_owned(),
                timeout_secs: self.nav_timeout.as_secs(),
            })??;

        let deadline = Instant::now() + self.marker_timeout;
        loop {
            let html = timeout(self.nav_timeout, driver.content())
                .await
                .map_err(|_| ScraperError::Timeout {
                    operation: "reading page content",
                    url: url.to_owned(),
                    timeout_secs: self.nav_timeout.as_secs(),
                })??;

            if let Some(signature) = self.soft_failure(&html) {
                return Err(ScraperError::SoftFailure {
                    url: url.to_owned(),
                    signature: signature.to_owned(),
                });
            }
            if let Some(marker) = page::first_match(&html, markers)? {
                return Ok((html, marker));
            }
            if Instant::now() >= deadline {
                return Err(ScraperError::NoStructuralMarker {
                    url: url.to_owned(),
                    markers: markers.join(", "),
                    timeout_secs: self.marker_timeout.as_secs(),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
#[path = "fetch_test.rs"]
mod tests;
