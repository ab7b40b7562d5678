//! Chromium-backed [`BrowserLauncher`] using chromiumoxide.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::error::ScraperError;
use crate::session::{BrowserLauncher, LaunchOptions, PageDriver};

/// Chromium builds to try on ARM hosts, where the bundled lookup finds
/// nothing usable.
const AARCH64_CANDIDATES: &[&str] = &["/usr/bin/ungoogled-chromium", "/usr/bin/chromium"];

/// Pick the browser binary: an explicit override wins, then the ARM
/// fallbacks. `None` lets chromiumoxide search its default locations.
#[must_use]
pub fn find_browser_executable(configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = configured {
        return Some(path.to_path_buf());
    }
    if cfg!(target_arch = "aarch64") {
        return AARCH64_CANDIDATES
            .iter()
            .map(PathBuf::from)
            .find(|p| p.exists());
    }
    None
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChromiumLauncher;

pub struct ChromiumDriver {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    stop_timeout: Duration,
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    type Driver = ChromiumDriver;

    async fn launch(&self, options: &LaunchOptions) -> Result<ChromiumDriver, ScraperError> {
        let (width, height) = options.viewport;
        let mut builder = BrowserConfig::builder()
            .window_size(width, height)
            .args(options.browser_args());
        if !options.headless {
            builder = builder.with_head();
        }
        if let Some(path) = find_browser_executable(options.executable.as_deref()) {
            tracing::debug!(executable = %path.display(), "using browser executable");
            builder = builder.chrome_executable(path);
        }
        let config = builder
            .build()
            .map_err(|reason| ScraperError::Launch { reason })?;

        let (browser, mut handler) =
            Browser::launch(config)
                .await
                .map_err(|e| ScraperError::Launch {
                    reason: e.to_string(),
                })?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    tracing::trace!(error = %err, "browser handler event error");
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| ScraperError::Launch {
                reason: format!("failed to open page: {e}"),
            })?;

        Ok(ChromiumDriver {
            browser,
            page,
            handler,
            stop_timeout: options.stop_timeout,
        })
    }
}

#[async_trait]
impl PageDriver for ChromiumDriver {
    async fn navigate(&mut self, url: &str) -> Result<(), ScraperError> {
        let transport = |e: chromiumoxide::error::CdpError| ScraperError::Transport {
            url: url.to_owned(),
            reason: e.to_string(),
        };
        self.page.goto(url).await.map_err(transport)?;
        self.page.wait_for_navigation().await.map_err(transport)?;
        Ok(())
    }

    async fn content(&mut self) -> Result<String, ScraperError> {
        self.page
            .content()
            .await
            .map_err(|e| ScraperError::Transport {
                url: "current page".to_owned(),
                reason: e.to_string(),
            })
    }

    async fn close(&mut self) -> Result<(), ScraperError> {
        let closed = timeout(self.stop_timeout, self.browser.close()).await;
        let exited = match &closed {
            Ok(Ok(_)) => matches!(
                timeout(self.stop_timeout, self.browser.wait()).await,
                Ok(Ok(_))
            ),
            _ => false,
        };
        if !exited {
            if let Some(Err(err)) = self.browser.kill().await {
                tracing::warn!(error = %err, "failed to kill browser process");
            }
        }
        self.handler.abort();
        match closed {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(ScraperError::Transport {
                url: "about:blank".to_owned(),
                reason: format!("browser close failed: {e}"),
            }),
            Err(_) => Err(ScraperError::Timeout {
                operation: "browser close",
                url: "about:blank".to_owned(),
                timeout_secs: self.stop_timeout.as_secs(),
            }),
        }
    }
}

impl Drop for ChromiumDriver {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_executable_wins() {
        let configured = PathBuf::from("/opt/custom/chrome");
        assert_eq!(
            find_browser_executable(Some(configured.as_path())),
            Some(configured.clone())
        );
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn chromium_renders_data_url() {
        let mut driver = ChromiumLauncher
            .launch(&LaunchOptions::default())
            .await
            .expect("failed to launch chromium");

        driver
            .navigate("data:text/html,<div class=\"place_fixed_maintab\">ok</div>")
            .await
            .expect("navigation failed");
        let html = driver.content().await.expect("content failed");
        assert!(html.contains("place_fixed_maintab"));

        driver.close().await.expect("close failed");
    }
}
