use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use super::*;
use crate::session::LaunchOptions;

const READY_PAGE: &str = r#"<html><body><div class="place_fixed_maintab"><a href="/home">Home</a></div></body></html>"#;
const ERROR_PAGE: &str = "<html><body><h1>502 Bad Gateway</h1><hr><center>nginx</center></body></html>";
const DETAIL: &[&str] = &[page::DETAIL_READY];

#[derive(Clone, Copy)]
enum Failure {
    Transport,
    ErrorPage,
    NoMarker,
    Hang,
}

/// Fails the first `failures` navigations (across every session) in the
/// configured way, then serves a ready detail page.
struct FlakyLauncher {
    failures: Arc<AtomicU32>,
    launches: Arc<AtomicU32>,
    mode: Failure,
    stuck_on_close: bool,
}

struct FlakyDriver {
    failures: Arc<AtomicU32>,
    mode: Failure,
    failing: bool,
    stuck_on_close: bool,
}

impl FlakyLauncher {
    fn new(failures: u32, mode: Failure) -> Self {
        Self {
            failures: Arc::new(AtomicU32::new(failures)),
            launches: Arc::new(AtomicU32::new(0)),
            mode,
            stuck_on_close: false,
        }
    }

    /// Drivers whose close never completes, like a wedged browser.
    fn stuck_on_close(mut self) -> Self {
        self.stuck_on_close = true;
        self
    }
}

#[async_trait]
impl BrowserLauncher for FlakyLauncher {
    type Driver = FlakyDriver;

    async fn launch(&self, _options: &LaunchOptions) -> Result<FlakyDriver, ScraperError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(FlakyDriver {
            failures: Arc::clone(&self.failures),
            mode: self.mode,
            failing: false,
            stuck_on_close: self.stuck_on_close,
        })
    }
}

#[async_trait]
impl PageDriver for FlakyDriver {
    async fn navigate(&mut self, url: &str) -> Result<(), ScraperError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        self.failing = remaining > 0;
        if !self.failing {
            return Ok(());
        }
        self.failures.fetch_sub(1, Ordering::SeqCst);
        match self.mode {
            Failure::Transport => Err(ScraperError::Transport {
                url: url.to_owned(),
                reason: "net::ERR_CONNECTION_RESET".to_owned(),
            }),
            Failure::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            }
            Failure::ErrorPage | Failure::NoMarker => Ok(()),
        }
    }

    async fn content(&mut self) -> Result<String, ScraperError> {
        let html = match (self.failing, self.mode) {
            (true, Failure::ErrorPage) => ERROR_PAGE,
            (true, Failure::NoMarker) => "<html><body><p>loading</p></body></html>",
            _ => READY_PAGE,
        };
        Ok(html.to_owned())
    }

    async fn close(&mut self) -> Result<(), ScraperError> {
        if self.stuck_on_close {
            futures::future::pending::<()>().await;
        }
        Ok(())
    }
}

fn fetcher(max_attempts: u32) -> ResilientFetcher {
    ResilientFetcher::new(
        RetryPolicy {
            max_attempts,
            delay: Duration::ZERO,
            backoff: Backoff::Fixed,
        },
        Duration::from_millis(100),
        Duration::ZERO,
    )
    .with_poll_interval(Duration::from_millis(1))
}

fn sessions(launcher: FlakyLauncher) -> SessionManager<FlakyLauncher> {
    let options = LaunchOptions {
        stop_timeout: Duration::from_millis(50),
        ..LaunchOptions::default()
    };
    SessionManager::new(launcher, options, 0)
}

#[tokio::test]
async fn succeeds_first_try_without_restart() {
    let mut sessions = sessions(FlakyLauncher::new(0, Failure::Transport));
    let page = fetcher(3)
        .fetch(&mut sessions, "https://m.place.naver.com/place/1", DETAIL)
        .await
        .unwrap();
    assert_eq!(page.attempts, 1);
    assert_eq!(page.marker, 0);
    assert_eq!(sessions.restarts(), 0);
}

#[tokio::test]
async fn recovers_when_failures_stay_below_bound() {
    for k in 1..5 {
        let launcher = FlakyLauncher::new(k, Failure::Transport);
        let launches = Arc::clone(&launcher.launches);
        let mut sessions = sessions(launcher);
        let page = fetcher(5)
            .fetch(&mut sessions, "https://m.place.naver.com/place/1", DETAIL)
            .await
            .unwrap();
        assert_eq!(page.attempts, k + 1);
        assert_eq!(sessions.restarts(), k, "k = {k}");
        assert_eq!(launches.load(Ordering::SeqCst), k + 1);
    }
}

#[tokio::test]
async fn exhausts_when_failures_reach_bound() {
    let mut sessions = sessions(FlakyLauncher::new(5, Failure::Transport));
    let err = fetcher(5)
        .fetch(&mut sessions, "https://m.place.naver.com/place/1", DETAIL)
        .await
        .unwrap_err();

    match err {
        ScraperError::Exhausted {
            attempts,
            last_error,
            ..
        } => {
            assert_eq!(attempts, 5);
            assert!(matches!(*last_error, ScraperError::Transport { .. }));
        }
        other => panic!("expected Exhausted, got {other:?}"),
    }
    assert_eq!(sessions.restarts(), 5);
}

#[tokio::test]
async fn error_page_counts_as_failure() {
    let mut sessions = sessions(FlakyLauncher::new(1, Failure::ErrorPage));
    let page = fetcher(3)
        .fetch(&mut sessions, "https://m.place.naver.com/place/1", DETAIL)
        .await
        .unwrap();
    assert_eq!(page.attempts, 2);
    assert_eq!(sessions.restarts(), 1);
}

#[tokio::test]
async fn missing_marker_is_a_retriable_failure() {
    let mut sessions = sessions(FlakyLauncher::new(1, Failure::NoMarker));
    let err = fetcher(1)
        .fetch(&mut sessions, "https://m.place.naver.com/place/1", DETAIL)
        .await
        .unwrap_err();
    let ScraperError::Exhausted { last_error, .. } = err else {
        panic!("expected Exhausted");
    };
    assert!(matches!(*last_error, ScraperError::NoStructuralMarker { .. }));
}

#[tokio::test]
async fn hung_navigation_times_out() {
    let mut sessions = sessions(FlakyLauncher::new(1, Failure::Hang));
    let page = fetcher(2)
        .fetch(&mut sessions, "https://m.place.naver.com/place/1", DETAIL)
        .await
        .unwrap();
    assert_eq!(page.attempts, 2);
    assert_eq!(sessions.restarts(), 1);
}

#[tokio::test]
async fn invalid_selector_is_not_retried() {
    let mut sessions = sessions(FlakyLauncher::new(0, Failure::Transport));
    let err = fetcher(5)
        .fetch(&mut sessions, "https://m.place.naver.com/place/1", &["div["])
        .await
        .unwrap_err();
    assert!(matches!(err, ScraperError::InvalidSelector { .. }));
    assert_eq!(sessions.restarts(), 0);
}

#[test]
fn soft_failure_ignores_script_text() {
    let fetcher = fetcher(1);
    assert_eq!(fetcher.soft_failure(ERROR_PAGE), Some("nginx"));
    assert_eq!(
        fetcher.soft_failure("<body><script>var server = 'nginx';</script><p>가격 15,500원</p></body>"),
        None
    );
    assert_eq!(
        fetcher.soft_failure("<body><p>Aw, Snap! Something went wrong</p></body>"),
        Some("aw, snap")
    );
}

#[test]
fn backoff_schedules() {
    let fixed = RetryPolicy {
        max_attempts: 3,
        delay: Duration::from_secs(2),
        backoff: Backoff::Fixed,
    };
    let linear = RetryPolicy {
        backoff: Backoff::Linear,
        ..fixed
    };
    assert_eq!(fixed.delay_after(3), Duration::from_secs(2));
    assert_eq!(linear.delay_after(3), Duration::from_secs(6));
}

#[test]
fn zero_attempts_is_clamped_to_one() {
    let fetcher = ResilientFetcher::new(
        RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        },
        Duration::from_secs(1),
        Duration::from_secs(1),
    );
    assert_eq!(fetcher.policy().max_attempts, 1);
}

#[tokio::test]
async fn wedged_browser_close_does_not_stall_retries() {
    let launcher = FlakyLauncher::new(1, Failure::Transport).stuck_on_close();
    let launches = Arc::clone(&launcher.launches);
    let mut sessions = sessions(launcher);

    let page = tokio::time::timeout(
        Duration::from_secs(3),
        fetcher(2).fetch(&mut sessions, "https://m.place.naver.com/place/1", DETAIL),
    )
    .await
    .expect("fetch must finish while the old browser refuses to close")
    .unwrap();

    assert_eq!(page.attempts, 2);
    assert_eq!(sessions.restarts(), 1);
    assert_eq!(launches.load(Ordering::SeqCst), 2);
}
