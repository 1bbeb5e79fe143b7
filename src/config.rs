use crate::error::CrawlError;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Configuration for the browser session pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// URL for the WebDriver instance
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,

    /// Maximum number of browser instances (WebDriver sessions)
    #[serde(default = "default_max_instances")]
    pub max_instances: usize,

    /// Maximum number of pages (windows) per browser instance
    #[serde(default = "default_max_pages_per_instance")]
    pub max_pages_per_instance: usize,

    /// Seconds an idle page survives before being reaped
    #[serde(default = "default_page_idle_secs")]
    pub page_idle_secs: u64,

    /// Grace period before tearing down a browser with no pages left.
    /// Long enough that a short burst of searches does not flash the
    /// browser window open and closed every time.
    #[serde(default = "default_teardown_grace_secs")]
    pub teardown_grace_secs: u64,

    /// Run the browser headless
    #[serde(default = "default_true")]
    pub headless: bool,

    /// Disable image loading to cut page weight and detection surface
    #[serde(default = "default_true")]
    pub block_images: bool,
}

/// Configuration for the navigation driver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationConfig {
    /// Per-navigation timeout in seconds
    #[serde(default = "default_nav_timeout_secs")]
    pub timeout_secs: u64,

    /// Navigation attempts before reporting failure upward
    #[serde(default = "default_nav_retries")]
    pub retries: u32,

    /// Base delay between navigation retries (multiplied by attempt number)
    #[serde(default = "default_nav_retry_base_ms")]
    pub retry_base_ms: u64,

    /// Poll interval while waiting for page stability
    #[serde(default = "default_stability_poll_ms")]
    pub stability_poll_ms: u64,

    /// A page is network-quiet when no resource completed within this window
    #[serde(default = "default_network_quiet_ms")]
    pub network_quiet_ms: u64,

    /// Both stability conditions must hold continuously for this long
    #[serde(default = "default_stable_dwell_ms")]
    pub stable_dwell_ms: u64,

    /// Give up waiting for stability after this many seconds (best-effort,
    /// a timeout only logs a warning)
    #[serde(default = "default_stability_timeout_secs")]
    pub stability_timeout_secs: u64,
}

/// Selectors used to classify a loaded page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Marker that definitively identifies a results page
    #[serde(default = "default_results_marker")]
    pub results_marker: String,

    /// Element shown when the result list has run out
    #[serde(default = "default_no_more_selector")]
    pub no_more_selector: String,

    /// Any of these present means an anti-bot challenge is being shown
    #[serde(default = "default_challenge_selectors")]
    pub challenge_selectors: Vec<String>,
}

/// Configuration for the slider challenge solver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Draggable slider handle
    #[serde(default = "default_slider_selector")]
    pub slider_selector: String,

    /// Wrapper whose class reflects challenge success/failure
    #[serde(default = "default_wrapper_selector")]
    pub wrapper_selector: String,

    /// Control that resets the challenge after a failed attempt
    #[serde(default = "default_refresh_selector")]
    pub refresh_selector: String,

    /// Challenge image, screenshotted for the OCR fallback
    #[serde(default = "default_challenge_image_selector")]
    pub image_selector: String,

    /// Text input the OCR answer is typed into
    #[serde(default = "default_challenge_input_selector")]
    pub input_selector: String,

    /// Class fragment the wrapper gains once the challenge is passed
    #[serde(default = "default_success_fragment")]
    pub success_fragment: String,

    /// Drag attempts before escalating
    #[serde(default = "default_solver_attempts")]
    pub max_attempts: u32,

    /// Horizontal distance of the drag in pixels
    #[serde(default = "default_drag_distance")]
    pub drag_distance_px: u32,

    /// Number of discrete pointer moves in one drag
    #[serde(default = "default_drag_steps")]
    pub drag_steps: u32,

    /// Delay before checking the wrapper class after releasing the slider
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// How long to wait for a human operator once automation gives up
    #[serde(default = "default_manual_wait_secs")]
    pub manual_wait_secs: u64,

    /// Poll interval during the manual-intervention window
    #[serde(default = "default_manual_poll_secs")]
    pub manual_poll_secs: u64,
}

/// Selectors and limits for the extraction engine.
///
/// Every per-field list is an ordered fallback: candidates are tried in order
/// and the first non-empty match wins, so markup drift on the target site
/// degrades a field instead of breaking the card.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Canonical origin used to absolutize root-relative detail links
    #[serde(default = "default_origin")]
    pub origin: String,

    #[serde(default = "default_card_selectors")]
    pub card_selectors: Vec<String>,

    /// Title link inside a card; yields both the name and the detail URL
    #[serde(default = "default_title_link_selectors")]
    pub title_link_selectors: Vec<String>,

    #[serde(default = "default_local_name_selectors")]
    pub local_name_selectors: Vec<String>,

    #[serde(default = "default_phone_selectors")]
    pub phone_selectors: Vec<String>,

    #[serde(default = "default_email_selectors")]
    pub email_selectors: Vec<String>,

    #[serde(default = "default_location_selectors")]
    pub location_selectors: Vec<String>,

    #[serde(default = "default_established_selectors")]
    pub established_selectors: Vec<String>,

    #[serde(default = "default_registration_selectors")]
    pub registration_selectors: Vec<String>,

    #[serde(default = "default_scope_selectors")]
    pub scope_selectors: Vec<String>,

    /// Cards processed per batch
    #[serde(default = "default_card_batch_size")]
    pub batch_size: usize,

    /// Pause between card batches
    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,
}

/// Keyword-level search settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    /// Search URL template; `{keyword}` and `{page}` are substituted
    #[serde(default = "default_search_url_template")]
    pub url_template: String,

    /// Whole-keyword retry attempts on unexpected failure
    #[serde(default = "default_keyword_retries")]
    pub keyword_retries: u32,

    /// Base delay for the keyword-level exponential backoff
    #[serde(default = "default_keyword_backoff_ms")]
    pub keyword_backoff_ms: u64,
}

/// Aggregate configuration for a Scout instance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoutConfig {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub navigation: NavigationConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub solver: SolverConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub search: SearchSettings,
}

impl ScoutConfig {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, CrawlError> {
        let path = path.as_ref();
        let mut file = File::open(path)
            .map_err(|e| CrawlError::Config(format!("cannot open {}: {}", path.display(), e)))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| CrawlError::Config(format!("cannot read {}: {}", path.display(), e)))?;

        serde_json::from_str(&contents)
            .map_err(|e| CrawlError::Config(format!("{}: {}", path.display(), e)))
    }
}

impl SearchSettings {
    /// Build the search URL for a keyword and page number
    pub fn search_url(&self, keyword: &str, page: u32) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(keyword.as_bytes()).collect();
        self.url_template
            .replace("{keyword}", &encoded)
            .replace("{page}", &page.to_string())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("default pool config")
    }
}

impl Default for NavigationConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("default navigation config")
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("default classifier config")
    }
}

impl Default for SolverConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("default solver config")
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("default extraction config")
    }
}

impl Default for SearchSettings {
    fn default() -> Self {
        serde_json::from_str("{}").expect("default search settings")
    }
}

fn default_webdriver_url() -> String {
    "http://localhost:4444".to_string()
}

fn default_max_instances() -> usize {
    2
}

fn default_max_pages_per_instance() -> usize {
    4
}

fn default_page_idle_secs() -> u64 {
    60
}

fn default_teardown_grace_secs() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

fn default_nav_timeout_secs() -> u64 {
    30
}

fn default_nav_retries() -> u32 {
    3
}

fn default_nav_retry_base_ms() -> u64 {
    1000
}

fn default_stability_poll_ms() -> u64 {
    300
}

fn default_network_quiet_ms() -> u64 {
    800
}

fn default_stable_dwell_ms() -> u64 {
    1000
}

fn default_stability_timeout_secs() -> u64 {
    10
}

fn default_results_marker() -> String {
    "div[data-content='search-results'], .organic-list".to_string()
}

fn default_no_more_selector() -> String {
    ".no-more-results, .search-no-more".to_string()
}

fn default_challenge_selectors() -> Vec<String> {
    vec![
        "iframe[src*='captcha']".to_string(),
        ".nc-container".to_string(),
        "#nc_1_wrapper".to_string(),
        "[class*='verify-wrap']".to_string(),
        "[class*='punish-page']".to_string(),
    ]
}

fn default_slider_selector() -> String {
    "#nc_1_n1z, .nc_iconfont.btn_slide".to_string()
}

fn default_wrapper_selector() -> String {
    "#nc_1_wrapper, .nc-container".to_string()
}

fn default_refresh_selector() -> String {
    "#nc_1_refresh1, .nc_refresh".to_string()
}

fn default_challenge_image_selector() -> String {
    ".captcha-img, img[src*='checkcode']".to_string()
}

fn default_challenge_input_selector() -> String {
    "input[name='checkcode'], .captcha-input input".to_string()
}

fn default_success_fragment() -> String {
    "btn_ok".to_string()
}

fn default_solver_attempts() -> u32 {
    4
}

fn default_drag_distance() -> u32 {
    300
}

fn default_drag_steps() -> u32 {
    18
}

fn default_settle_ms() -> u64 {
    1200
}

fn default_manual_wait_secs() -> u64 {
    240
}

fn default_manual_poll_secs() -> u64 {
    5
}

fn default_origin() -> String {
    "https://www.alibaba.com".to_string()
}

fn default_card_selectors() -> Vec<String> {
    vec![
        ".fy23-search-card".to_string(),
        ".organic-list-offer-outter".to_string(),
        ".J-offer-wrapper".to_string(),
    ]
}

fn default_title_link_selectors() -> Vec<String> {
    vec![
        ".search-card-e-company a".to_string(),
        "a.search-card-e-title".to_string(),
        "h2.title a".to_string(),
    ]
}

fn default_local_name_selectors() -> Vec<String> {
    vec![
        ".search-card-e-company-local".to_string(),
        ".company-name-cn".to_string(),
    ]
}

fn default_phone_selectors() -> Vec<String> {
    vec![
        ".contact-phone".to_string(),
        "[data-role='phone']".to_string(),
    ]
}

fn default_email_selectors() -> Vec<String> {
    vec![
        ".contact-email".to_string(),
        "[data-role='email']".to_string(),
    ]
}

fn default_location_selectors() -> Vec<String> {
    vec![
        ".search-card-e-country-flag + span".to_string(),
        ".supplier-location".to_string(),
        "[data-role='location']".to_string(),
    ]
}

fn default_established_selectors() -> Vec<String> {
    vec![
        ".search-card-e-review strong".to_string(),
        "[data-role='established-year']".to_string(),
    ]
}

fn default_registration_selectors() -> Vec<String> {
    vec!["[data-role='registration-no']".to_string()]
}

fn default_scope_selectors() -> Vec<String> {
    vec![
        ".search-card-m-sale-features__item".to_string(),
        "[data-role='business-scope']".to_string(),
    ]
}

fn default_card_batch_size() -> usize {
    5
}

fn default_batch_pause_ms() -> u64 {
    150
}

fn default_search_url_template() -> String {
    "https://www.alibaba.com/trade/search?fsb=y&IndexArea=company_en&SearchText={keyword}&page={page}"
        .to_string()
}

fn default_keyword_retries() -> u32 {
    3
}

fn default_keyword_backoff_ms() -> u64 {
    2000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ScoutConfig::default();
        assert_eq!(config.pool.webdriver_url, "http://localhost:4444");
        assert_eq!(config.pool.max_instances, 2);
        assert_eq!(config.solver.max_attempts, 4);
        assert_eq!(config.extraction.batch_size, 5);
        assert!(config.pool.headless);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{ "pool": { "max_instances": 1, "headless": false } }"#;
        let config: ScoutConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.pool.max_instances, 1);
        assert!(!config.pool.headless);
        assert_eq!(config.navigation.retries, 3);
        assert_eq!(config.solver.drag_distance_px, 300);
    }

    #[test]
    fn test_from_file_missing_path_is_config_error() {
        let err = ScoutConfig::from_file("/nonexistent/scout.json").unwrap_err();
        assert!(matches!(err, CrawlError::Config(_)));
    }

    #[test]
    fn test_from_file_rejects_malformed_json() {
        let path = std::env::temp_dir().join("scout-config-malformed.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = ScoutConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, CrawlError::Config(_)));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_from_file_round_trip() {
        let path = std::env::temp_dir().join("scout-config-valid.json");
        std::fs::write(&path, r#"{ "pool": { "max_instances": 7 } }"#).unwrap();
        let config = ScoutConfig::from_file(&path).unwrap();
        assert_eq!(config.pool.max_instances, 7);
        assert_eq!(config.navigation.retries, 3);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_search_url() {
        let settings = SearchSettings::default();
        let url = settings.search_url("office furniture", 3);
        assert!(url.contains("SearchText=office+furniture"));
        assert!(url.contains("page=3"));
    }
}
