// Re-export modules
pub mod captcha;
pub mod classify;
pub mod config;
pub mod error;
pub mod external;
pub mod extract;
pub mod records;
pub mod retry;
pub mod search;
pub mod session;

// Re-export commonly used types for convenience
pub use config::ScoutConfig;
pub use error::CrawlError;
pub use records::{PageBatch, SearchEvent, SearchOutcome, SearchSummary, SupplierRecord};
pub use search::{Canceller, SearchHandle, SearchRequest, Searcher};

use crate::external::{LoginGate, OcrRecognizer};
use std::sync::Arc;

/// Builder for running a one-off keyword search.
///
/// Constructs its own `Searcher` (and session pool) per call; applications
/// that run many searches should hold a `Searcher` directly so the pool and
/// its idle browser survive between keywords.
pub struct Search {
    keyword: String,
    page_cap: Option<u32>,
    config: Option<ScoutConfig>,
    ocr: Option<Arc<dyn OcrRecognizer>>,
    login: Option<Arc<dyn LoginGate>>,
}

impl Search {
    /// Create a new Search builder for the given keyword
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            page_cap: None,
            config: None,
            ocr: None,
            login: None,
        }
    }

    /// Stop paginating after this many result pages
    pub fn with_page_cap(mut self, cap: u32) -> Self {
        self.page_cap = Some(cap);
        self
    }

    /// Apply a configuration
    pub fn with_config(mut self, config: ScoutConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Load configuration from a JSON file
    pub fn with_config_file(
        mut self,
        path: impl AsRef<std::path::Path>,
    ) -> Result<Self, CrawlError> {
        self.config = Some(ScoutConfig::from_file(path)?);
        Ok(self)
    }

    /// Attach an optical-recognition collaborator for the challenge solver
    pub fn with_ocr(mut self, ocr: Arc<dyn OcrRecognizer>) -> Self {
        self.ocr = Some(ocr);
        self
    }

    /// Attach the secondary-site login gate
    pub fn with_login_gate(mut self, gate: Arc<dyn LoginGate>) -> Self {
        self.login = Some(gate);
        self
    }

    /// Start the search and return a handle streaming one event per page.
    pub async fn stream(self) -> Result<SearchHandle, CrawlError> {
        let mut config = self.config.unwrap_or_default();

        // Override the WebDriver URL with an environment variable if provided
        if let Ok(webdriver_url) = std::env::var("WEBDRIVER_URL") {
            if !webdriver_url.is_empty() {
                config.pool.webdriver_url = webdriver_url;
            }
        }

        let mut searcher = Searcher::new(config);
        if let Some(ocr) = self.ocr {
            searcher = searcher.with_ocr(ocr);
        }
        if let Some(gate) = self.login {
            searcher = searcher.with_login_gate(gate);
        }

        searcher
            .start(SearchRequest {
                keyword: self.keyword,
                page_cap: self.page_cap,
            })
            .await
    }
}
