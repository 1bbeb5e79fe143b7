use thiserror::Error;

/// Errors produced by the crawl core.
///
/// Page-scoped failures (`NavigationFailed`, `ChallengeExhausted`,
/// `ExtractionFailed`) are recovered locally by skipping the page; the rest
/// propagate to the caller.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// Pool caps reached and no idle page is available
    #[error("session pool exhausted: {0}")]
    ResourceExhausted(String),

    /// Navigation retries exhausted for one page
    #[error("navigation failed for {url}: {reason}")]
    NavigationFailed { url: String, reason: String },

    /// Anti-bot remediation exhausted for one page
    #[error("anti-bot challenge unsolved after {attempts} attempts")]
    ChallengeExhausted { attempts: u32 },

    /// Unexpected error while processing result cards
    #[error("extraction failed on page {page}: {reason}")]
    ExtractionFailed { page: u32, reason: String },

    /// Underlying browser process died or the WebDriver session was lost
    #[error("browser session disconnected: {0}")]
    SessionDisconnected(String),

    /// A search was requested while another one is active
    #[error("a search is already running")]
    Busy,

    /// Secondary-site login gate reported not logged in
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// Any other WebDriver command failure
    #[error("webdriver command failed: {0}")]
    WebDriver(#[from] fantoccini::error::CmdError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CrawlError {
    /// True when the error indicates the WebDriver session itself is gone,
    /// as opposed to a single command failing on a live session.
    pub fn is_session_loss(&self) -> bool {
        match self {
            CrawlError::SessionDisconnected(_) => true,
            CrawlError::WebDriver(e) => is_session_loss_cmd(e),
            _ => false,
        }
    }
}

/// ChromeDriver and geckodriver phrase session loss differently; match on the
/// strings observed from both.
pub fn is_session_loss_cmd(e: &fantoccini::error::CmdError) -> bool {
    let msg = e.to_string();
    msg.contains("Unable to find session")
        || msg.contains("invalid session id")
        || msg.contains("session deleted")
        || msg.contains("no such window")
}
