//! Ownership of the single live browser.
//!
//! [`SessionManager`] is the only holder of a [`BrowserSession`]. Callers
//! borrow its page driver for one operation at a time; a restart replaces
//! the session wholesale instead of repairing it in place.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use bizdb_core::AppConfig;
use tokio::time::timeout;

use crate::error::ScraperError;

/// Window size shared by every launch so layouts (and selectors) are stable.
pub const VIEWPORT: (u32, u32) = (1280, 800);

const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

const STEALTH_ARGS: &[&str] = &[
    "--no-sandbox",
    "--disable-dev-shm-usage",
    "--disable-setuid-sandbox",
    "--disable-software-rasterizer",
    "--disable-blink-features=AutomationControlled",
    "--disable-infobars",
    "--disable-extensions",
    "--disable-popup-blocking",
];

/// One page in one browser process.
#[async_trait]
pub trait PageDriver: Send {
    /// Start loading `url` in the page. Callers bound this with a timeout.
    async fn navigate(&mut self, url: &str) -> Result<(), ScraperError>;

    /// Current rendered markup of the page.
    async fn content(&mut self) -> Result<String, ScraperError>;

    /// Stop the browser process behind this page. The session manager
    /// abandons a driver whose close outlives [`LaunchOptions::stop_timeout`].
    async fn close(&mut self) -> Result<(), ScraperError>;
}

/// Starts browser processes.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    type Driver: PageDriver;

    async fn launch(&self, options: &LaunchOptions) -> Result<Self::Driver, ScraperError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    pub headless: bool,
    pub executable: Option<PathBuf>,
    pub viewport: (u32, u32),
    pub stop_timeout: Duration,
}

impl LaunchOptions {
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            headless: config.headless,
            executable: config.browser_executable.clone(),
            viewport: VIEWPORT,
            stop_timeout: Duration::from_secs(config.stop_timeout_secs),
        }
    }

    /// Command-line flags for the browser process.
    #[must_use]
    pub fn browser_args(&self) -> Vec<String> {
        let mut args: Vec<String> = STEALTH_ARGS.iter().map(|a| (*a).to_owned()).collect();
        args.push(format!("--window-size={},{}", self.viewport.0, self.viewport.1));
        args
    }
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            headless: true,
            executable: None,
            viewport: VIEWPORT,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Ready,
    /// A fetch failed on this session; it is about to be replaced.
    Degraded,
    Stopped,
}

#[derive(Debug)]
pub struct BrowserSession<D> {
    driver: D,
    generation: u32,
}

impl<D> BrowserSession<D> {
    /// 0 for the first launch, +1 per replacement.
    #[must_use]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

pub struct SessionManager<L: BrowserLauncher> {
    launcher: L,
    options: LaunchOptions,
    session: Option<BrowserSession<L::Driver>>,
    state: SessionState,
    restart_every: usize,
    items_on_session: usize,
    launches: u32,
    restarts: u32,
}

impl<L: BrowserLauncher> SessionManager<L> {
    /// `restart_every` is the proactive restart interval in items; 0 disables it.
    pub fn new(launcher: L, options: LaunchOptions, restart_every: usize) -> Self {
        Self {
            launcher,
            options,
            session: None,
            state: SessionState::Stopped,
            restart_every,
            items_on_session: 0,
            launches: 0,
            restarts: 0,
        }
    }

    /// Launch a session unless one is already live.
    ///
    /// # Errors
    ///
    /// Returns [`ScraperError::Launch`] (or whatever the launcher reports)
    /// if the browser does not come up.
    pub async fn start(&mut self) -> Result<(), ScraperError> {
        if self.session.is_some() {
            return Ok(());
        }
        tracing::debug!(
            generation = self.launches,
            headless = self.options.headless,
            "starting browser session"
        );
        self.state = SessionState::Starting;
        let driver = match self.launcher.launch(&self.options).await {
            Ok(driver) => driver,
            Err(err) => {
                self.state = SessionState::Stopped;
                return Err(err);
            }
        };
        self.session = Some(BrowserSession {
            driver,
            generation: self.launches,
        });
        self.state = SessionState::Ready;
        self.launches += 1;
        self.items_on_session = 0;
        Ok(())
    }

    /// The live page driver, launching a session first if there is none.
    ///
    /// # Errors
    ///
    /// Propagates launch failures from [`SessionManager::start`].
    pub async fn driver(&mut self) -> Result<&mut L::Driver, ScraperError> {
        self.start().await?;
        match self.session.as_mut() {
            Some(session) => Ok(&mut session.driver),
            None => Err(ScraperError::Launch {
                reason: "session missing after start".to_owned(),
            }),
        }
    }

    pub fn mark_degraded(&mut self) {
        if self.session.is_some() {
            self.state = SessionState::Degraded;
        }
    }

    pub(crate) fn mark_ready(&mut self) {
        if self.session.is_some() {
            self.state = SessionState::Ready;
        }
    }

    /// Replace the current session with a fresh one.
    ///
    /// Stopping the old process is best effort; its errors are logged and
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns the launch error if the new session does not come up. The
    /// manager is then left without a session and the next
    /// [`SessionManager::driver`] call tries again.
    pub async fn restart(&mut self) -> Result<(), ScraperError> {
        self.stop().await;
        self.restarts += 1;
        tracing::info!(restarts = self.restarts, "restarting browser session");
        self.start().await
    }

    /// Count one processed item and restart proactively when the interval is
    /// reached. Returns whether a restart happened.
    ///
    /// # Errors
    ///
    /// Propagates a failed relaunch.
    pub async fn tick_item(&mut self) -> Result<bool, ScraperError> {
        self.items_on_session += 1;
        if self.restart_every == 0 || self.items_on_session < self.restart_every {
            return Ok(false);
        }
        tracing::debug!(
            items = self.items_on_session,
            "scheduled browser restart"
        );
        self.restart().await?;
        Ok(true)
    }

    /// Stop the live session, if any.
    pub async fn shutdown(&mut self) {
        self.stop().await;
    }

    async fn stop(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        self.state = SessionState::Stopped;
        self.items_on_session = 0;
        match timeout(self.options.stop_timeout, session.driver.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(
                    generation = session.generation,
                    error = %err,
                    "ignoring error while stopping browser"
                );
            }
            Err(_) => {
                tracing::warn!(
                    generation = session.generation,
                    timeout_secs = self.options.stop_timeout.as_secs(),
                    "browser did not stop in time; abandoning it"
                );
            }
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn session(&self) -> Option<&BrowserSession<L::Driver>> {
        self.session.as_ref()
    }

    /// Replacements so far, reactive and scheduled.
    #[must_use]
    pub fn restarts(&self) -> u32 {
        self.restarts
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    #[derive(Clone, Copy)]
    enum Close {
        Clean,
        Fails,
        Hangs,
    }

    struct CountingLauncher {
        launches: Arc<AtomicU32>,
        closes: Arc<AtomicU32>,
        close: Close,
    }

    struct CountingDriver {
        closes: Arc<AtomicU32>,
        close: Close,
    }

    #[async_trait]
    impl PageDriver for CountingDriver {
        async fn navigate(&mut self, _url: &str) -> Result<(), ScraperError> {
            Ok(())
        }

        async fn content(&mut self) -> Result<String, ScraperError> {
            Ok(String::new())
        }

        async fn close(&mut self) -> Result<(), ScraperError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            match self.close {
                Close::Clean => Ok(()),
                Close::Fails => Err(ScraperError::Transport {
                    url: "about:blank".to_owned(),
                    reason: "browser already gone".to_owned(),
                }),
                Close::Hangs => futures::future::pending().await,
            }
        }
    }

    #[async_trait]
    impl BrowserLauncher for CountingLauncher {
        type Driver = CountingDriver;

        async fn launch(&self, _options: &LaunchOptions) -> Result<CountingDriver, ScraperError> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            Ok(CountingDriver {
                closes: Arc::clone(&self.closes),
                close: self.close,
            })
        }
    }

    fn manager(
        restart_every: usize,
        close: Close,
    ) -> (SessionManager<CountingLauncher>, Arc<AtomicU32>, Arc<AtomicU32>) {
        let launches = Arc::new(AtomicU32::new(0));
        let closes = Arc::new(AtomicU32::new(0));
        let launcher = CountingLauncher {
            launches: Arc::clone(&launches),
            closes: Arc::clone(&closes),
            close,
        };
        let options = LaunchOptions {
            stop_timeout: Duration::from_millis(50),
            ..LaunchOptions::default()
        };
        (
            SessionManager::new(launcher, options, restart_every),
            launches,
            closes,
        )
    }

    #[tokio::test]
    async fn driver_launches_lazily_once() {
        let (mut sessions, launches, _) = manager(0, Close::Clean);
        assert_eq!(sessions.state(), SessionState::Stopped);
        sessions.driver().await.unwrap();
        sessions.driver().await.unwrap();
        assert_eq!(launches.load(Ordering::SeqCst), 1);
        assert_eq!(sessions.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn restart_swallows_stop_errors_and_replaces_session() {
        let (mut sessions, launches, closes) = manager(0, Close::Fails);
        sessions.start().await.unwrap();
        sessions.mark_degraded();
        assert_eq!(sessions.state(), SessionState::Degraded);

        sessions.restart().await.unwrap();

        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(launches.load(Ordering::SeqCst), 2);
        assert_eq!(sessions.restarts(), 1);
        assert_eq!(sessions.state(), SessionState::Ready);
        assert_eq!(sessions.session().map(BrowserSession::generation), Some(1));
    }

    #[tokio::test]
    async fn restart_abandons_a_browser_that_never_stops() {
        let (mut sessions, launches, closes) = manager(0, Close::Hangs);
        sessions.start().await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), sessions.restart())
            .await
            .expect("restart must not wait on a hung browser")
            .unwrap();

        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(launches.load(Ordering::SeqCst), 2);
        assert_eq!(sessions.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn tick_item_restarts_on_schedule() {
        let (mut sessions, launches, _) = manager(3, Close::Clean);
        sessions.start().await.unwrap();

        let mut restarted = Vec::new();
        for _ in 0..7 {
            restarted.push(sessions.tick_item().await.unwrap());
        }

        assert_eq!(
            restarted,
            vec![false, false, true, false, false, true, false]
        );
        assert_eq!(launches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn zero_interval_never_restarts() {
        let (mut sessions, _, _) = manager(0, Close::Clean);
        for _ in 0..50 {
            assert!(!sessions.tick_item().await.unwrap());
        }
        assert_eq!(sessions.restarts(), 0);
    }

    #[tokio::test]
    async fn shutdown_stops_the_session() {
        let (mut sessions, _, closes) = manager(0, Close::Clean);
        sessions.start().await.unwrap();
        sessions.shutdown().await;
        assert_eq!(sessions.state(), SessionState::Stopped);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn browser_args_carry_window_size() {
        let args = LaunchOptions::default().browser_args();
        assert!(args.iter().any(|a| a == "--window-size=1280,800"));
        assert!(args.iter().any(|a| a == "--disable-blink-features=AutomationControlled"));
    }
}
