//! Navigation with bounded retries and page-stability detection.

use crate::config::NavigationConfig;
use crate::error::CrawlError;
use crate::retry::{retry, Backoff};
use crate::session::pool::{PageHandle, SessionPool};
use crate::session::stealth;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Probes readiness and recent network activity in one round trip.
/// `arguments[0]` is the quiet window in milliseconds.
const STABILITY_SCRIPT: &str = r#"
    var ready = document.readyState === 'complete';
    var spinner = document.querySelector('.loading, .spinner, [class*="loading-indicator"]');
    var spinnerVisible = !!(spinner && spinner.offsetParent !== null);
    var entries = performance.getEntriesByType('resource');
    var now = performance.now();
    var quietMs = arguments[0];
    var recent = entries.some(function (e) {
        return e.responseEnd > 0 && now - e.responseEnd < quietMs;
    });
    return { ready: ready && !spinnerVisible, recent: recent };
"#;

pub struct Navigator {
    pool: Arc<SessionPool>,
    config: NavigationConfig,
}

impl Navigator {
    pub fn new(pool: Arc<SessionPool>, config: NavigationConfig) -> Self {
        Self { pool, config }
    }

    /// Navigates the page to `url` with bounded retries.
    ///
    /// The delay between attempts grows linearly with the attempt number.
    /// When the page object itself appears dead, it is recreated through the
    /// pool before the next attempt; `handle` is updated in place so the
    /// caller keeps working with the replacement. Only after every attempt
    /// fails does the error go upward, where the orchestrator treats the
    /// page number as skippable.
    pub async fn navigate(&self, handle: &mut PageHandle, url: &str) -> Result<(), CrawlError> {
        let slot = Mutex::new(handle.clone());

        let result = retry(
            self.config.retries,
            Backoff::Linear {
                base_ms: self.config.retry_base_ms,
            },
            "navigation",
            |attempt| {
                let slot = &slot;
                async move {
                    let mut current = slot.lock().await;
                    match self.attempt(&current, url).await {
                        Ok(()) => Ok(()),
                        Err(e) => {
                            if e.is_session_loss() {
                                ::log::warn!(
                                    "Page dead on attempt {} for {}, recreating",
                                    attempt,
                                    url
                                );
                                if let Ok(fresh) = self.pool.recreate_page(&current).await {
                                    *current = fresh;
                                }
                            }
                            Err(e)
                        }
                    }
                }
            },
        )
        .await;

        *handle = slot.into_inner();
        result.map_err(|e| match e {
            CrawlError::NavigationFailed { .. } => e,
            other => CrawlError::NavigationFailed {
                url: url.to_string(),
                reason: other.to_string(),
            },
        })
    }

    async fn attempt(&self, handle: &PageHandle, url: &str) -> Result<(), CrawlError> {
        handle.activate().await?;

        let nav = tokio::time::timeout(
            Duration::from_secs(self.config.timeout_secs),
            handle.client.goto(url),
        )
        .await;
        match nav {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(CrawlError::NavigationFailed {
                    url: url.to_string(),
                    reason: format!("timed out after {}s", self.config.timeout_secs),
                });
            }
        }

        if let Err(e) = stealth::apply_mask(&handle.client).await {
            ::log::debug!("Fingerprint mask failed (non-fatal): {}", e);
        }

        self.wait_for_stable(handle).await
    }

    /// Polls until the DOM is complete with no visible loading indicator and
    /// no network resource has finished within the quiet window, with both
    /// holding for the dwell time. Timing out is not an error; stability is
    /// a best-effort signal, so the caller proceeds either way.
    pub async fn wait_for_stable(&self, handle: &PageHandle) -> Result<(), CrawlError> {
        let deadline = Instant::now() + Duration::from_secs(self.config.stability_timeout_secs);
        let dwell = Duration::from_millis(self.config.stable_dwell_ms);
        let mut stable_since: Option<Instant> = None;

        while Instant::now() < deadline {
            let probe = handle
                .client
                .execute(STABILITY_SCRIPT, vec![json!(self.config.network_quiet_ms)])
                .await?;

            let ready = probe
                .get("ready")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            let recent = probe
                .get("recent")
                .and_then(|v| v.as_bool())
                .unwrap_or(true);

            if ready && !recent {
                let since = stable_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= dwell {
                    return Ok(());
                }
            } else {
                stable_since = None;
            }

            tokio::time::sleep(Duration::from_millis(self.config.stability_poll_ms)).await;
        }

        ::log::warn!("Page never reached stability, proceeding anyway");
        Ok(())
    }
}
