//! Browser hardening against automation detection.
//!
//! Two layers: Chrome launch flags passed through WebDriver capabilities, and
//! a fingerprint-masking script evaluated on every freshly loaded page. The
//! flags handle what Chrome exposes at the process level (the
//! AutomationControlled blink feature drives `navigator.webdriver`); the
//! script covers the properties header-less profiles leave at giveaway
//! values.

use crate::config::PoolConfig;
use fantoccini::error::CmdError;
use fantoccini::Client;
use serde_json::{json, map::Map, Value};

/// Chrome flags applied to every launched instance
const HARDENING_ARGS: &[&str] = &[
    "--disable-blink-features=AutomationControlled",
    "--disable-infobars",
    "--no-first-run",
    "--no-default-browser-check",
    "--disable-background-timer-throttling",
    "--disable-backgrounding-occluded-windows",
    "--disable-renderer-backgrounding",
    "--disable-dev-shm-usage",
    "--window-size=1366,768",
    "--lang=en-US",
];

/// Masks the fingerprint surface the flags do not reach.
const MASK_SCRIPT: &str = r#"
    try {
        Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
        Object.defineProperty(navigator, 'plugins', {
            get: () => [1, 2, 3, 4, 5]
        });
        Object.defineProperty(navigator, 'languages', {
            get: () => ['en-US', 'en']
        });
    } catch (e) {}
    return true;
"#;

/// Builds the WebDriver capability document for a new browser instance.
pub fn capabilities(config: &PoolConfig) -> Map<String, Value> {
    let mut args: Vec<String> = HARDENING_ARGS.iter().map(|a| a.to_string()).collect();
    if config.headless {
        args.push("--headless=new".to_string());
    }
    if config.block_images {
        // WebDriver has no request interception; disabling images at the
        // blink level covers the heaviest resource class.
        args.push("--blink-settings=imagesEnabled=false".to_string());
    }

    let mut caps = Map::new();
    caps.insert(
        "goog:chromeOptions".to_string(),
        json!({
            "args": args,
            "excludeSwitches": ["enable-automation"],
        }),
    );
    caps
}

/// Applies the masking script to the page currently focused by `client`.
/// Called after every navigation; failures are non-fatal.
pub async fn apply_mask(client: &Client) -> Result<(), CmdError> {
    client.execute(MASK_SCRIPT, vec![]).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;

    #[test]
    fn test_headless_flag_follows_config() {
        let mut config = PoolConfig::default();
        config.headless = true;
        let caps = capabilities(&config);
        let args = caps["goog:chromeOptions"]["args"].to_string();
        assert!(args.contains("--headless=new"));

        config.headless = false;
        let caps = capabilities(&config);
        let args = caps["goog:chromeOptions"]["args"].to_string();
        assert!(!args.contains("--headless"));
    }

    #[test]
    fn test_automation_switches_excluded() {
        let caps = capabilities(&PoolConfig::default());
        let opts = caps["goog:chromeOptions"].to_string();
        assert!(opts.contains("enable-automation"));
        assert!(opts.contains("AutomationControlled"));
    }

    #[test]
    fn test_image_blocking_toggle() {
        let mut config = PoolConfig::default();
        config.block_images = false;
        let caps = capabilities(&config);
        assert!(!caps["goog:chromeOptions"]["args"]
            .to_string()
            .contains("imagesEnabled=false"));
    }
}
