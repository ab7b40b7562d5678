pub mod chromium;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod page;
pub mod session;
pub mod store;
pub mod url;

pub use chromium::{find_browser_executable, ChromiumDriver, ChromiumLauncher};
pub use error::{ScraperError, StoreError};
pub use extract::{
    EmbeddedStateExtractor, Extraction, Extractor, LiteralStrategy, StateEntity, StateMarker,
};
pub use fetch::{Backoff, PageContent, ResilientFetcher, RetryPolicy};
pub use session::{BrowserLauncher, BrowserSession, LaunchOptions, PageDriver, SessionManager, SessionState};
pub use store::{AppendOutcome, ErrorLog, ResultStore};
pub use url::PlaceUrls;
