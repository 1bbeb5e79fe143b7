//! Per-keyword crawl orchestration.
//!
//! One `Searcher` drives at most one search at a time against its session
//! pool; a second concurrent request is rejected with `Busy` rather than
//! interleaved, because interleaving two crawls through the same browser
//! session multiplies the anti-bot detection surface.

use crate::captcha::ChallengeSolver;
use crate::classify::{self, PageClass};
use crate::config::ScoutConfig;
use crate::error::CrawlError;
use crate::extract::ExtractionEngine;
use crate::external::{LoginGate, OcrRecognizer};
use crate::records::{PageBatch, SearchEvent, SearchOutcome, SearchSummary};
use crate::retry::{retry, Backoff};
use crate::session::pool::{AcquireOptions, PageHandle, SessionPool};
use crate::session::Navigator;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// One keyword-driven crawl request
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub keyword: String,
    /// Stop after this many pages; None paginates until the site runs out
    pub page_cap: Option<u32>,
}

/// Cancels a running search from outside the event loop. Cancellation is
/// observed between page iterations; the current page finishes naturally.
#[derive(Clone)]
pub struct Canceller {
    flag: Arc<AtomicBool>,
}

impl Canceller {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }
}

/// Live handle to a running search: the event stream plus a canceller.
pub struct SearchHandle {
    events: mpsc::Receiver<SearchEvent>,
    cancel: Arc<AtomicBool>,
}

impl SearchHandle {
    /// Next streamed event; None once the search task has finished and the
    /// final `Finished` event was consumed.
    pub async fn next(&mut self) -> Option<SearchEvent> {
        self.events.recv().await
    }

    pub fn canceller(&self) -> Canceller {
        Canceller {
            flag: Arc::clone(&self.cancel),
        }
    }
}

/// Crawl orchestrator. Owns the session pool and the single-flight guard.
pub struct Searcher {
    config: ScoutConfig,
    pool: Arc<SessionPool>,
    active: Arc<AtomicBool>,
    ocr: Option<Arc<dyn OcrRecognizer>>,
    login: Option<Arc<dyn LoginGate>>,
}

impl Searcher {
    pub fn new(config: ScoutConfig) -> Self {
        let pool = SessionPool::new(config.pool.clone());
        Self {
            config,
            pool,
            active: Arc::new(AtomicBool::new(false)),
            ocr: None,
            login: None,
        }
    }

    /// Configure the optional optical-recognition collaborator.
    pub fn with_ocr(mut self, ocr: Arc<dyn OcrRecognizer>) -> Self {
        self.ocr = Some(ocr);
        self
    }

    /// Configure the secondary-site login gate checked before every search.
    pub fn with_login_gate(mut self, gate: Arc<dyn LoginGate>) -> Self {
        self.login = Some(gate);
        self
    }

    pub fn pool(&self) -> Arc<SessionPool> {
        Arc::clone(&self.pool)
    }

    /// Starts a search, streaming batches page by page.
    ///
    /// Fails fast with `Busy` while another search is active and with
    /// `PreconditionFailed` when the login gate reports not logged in. The
    /// returned handle's event stream always ends with a `Finished` event.
    pub async fn start(&self, request: SearchRequest) -> Result<SearchHandle, CrawlError> {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(CrawlError::Busy);
        }
        let guard = ActiveGuard(Arc::clone(&self.active));

        if let Some(gate) = &self.login {
            if !gate.ensure_logged_in().await {
                return Err(CrawlError::PreconditionFailed(
                    "secondary-site login check failed".to_string(),
                ));
            }
        }

        let (tx, rx) = mpsc::channel::<SearchEvent>(64);
        let cancel = Arc::new(AtomicBool::new(false));

        let run = SearchRun {
            config: self.config.clone(),
            pool: Arc::clone(&self.pool),
            navigator: Navigator::new(Arc::clone(&self.pool), self.config.navigation.clone()),
            solver: ChallengeSolver::new(
                self.config.solver.clone(),
                self.config.classifier.clone(),
                self.ocr.clone(),
            ),
            extractor: ExtractionEngine::new(self.config.extraction.clone()),
            request,
            cancel: Arc::clone(&cancel),
            tx,
        };

        tokio::spawn(async move {
            let _guard = guard;
            run.execute().await;
        });

        Ok(SearchHandle { events: rx, cancel })
    }
}

/// Clears the single-flight flag when the search task ends, however it ends.
struct ActiveGuard(Arc<AtomicBool>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Mutable progress shared across keyword-level retry attempts, so a retried
/// run resumes from the failing page instead of re-streaming earlier batches.
struct Progress {
    page: u32,
    pages_crawled: u32,
    total: usize,
}

struct SearchRun {
    config: ScoutConfig,
    pool: Arc<SessionPool>,
    navigator: Navigator,
    solver: ChallengeSolver,
    extractor: ExtractionEngine,
    request: SearchRequest,
    cancel: Arc<AtomicBool>,
    tx: mpsc::Sender<SearchEvent>,
}

impl SearchRun {
    async fn execute(self) {
        ::log::info!(
            "Starting search for {:?} (page cap: {:?})",
            self.request.keyword,
            self.request.page_cap
        );

        let progress = tokio::sync::Mutex::new(Progress {
            page: 1,
            pages_crawled: 0,
            total: 0,
        });

        // Keyword-level retry: ordinary per-page skips are handled inside
        // the loop; only unexpected errors (session loss, pool exhaustion)
        // land here and earn a fresh attempt after backoff. Progress lives
        // outside the attempts so a retry resumes from the failing page
        // instead of re-streaming earlier batches.
        let outcome = match retry(
            self.config.search.keyword_retries.max(1),
            Backoff::Exponential {
                base_ms: self.config.search.keyword_backoff_ms,
                max_ms: 60_000,
            },
            "keyword search",
            |_attempt| {
                let progress = &progress;
                let run = &self;
                async move {
                    let mut progress = progress.lock().await;
                    run.page_loop(&mut progress).await
                }
            },
        )
        .await
        {
            Ok(terminal) => terminal,
            Err(e) => SearchOutcome::Failed {
                reason: e.to_string(),
            },
        };

        let progress = progress.into_inner();
        let summary = SearchSummary {
            keyword: self.request.keyword.clone(),
            outcome,
            pages_crawled: progress.pages_crawled,
            total_records: progress.total,
        };
        ::log::info!(
            "Search finished: {:?} ({} records over {} pages)",
            summary.outcome,
            summary.total_records,
            summary.pages_crawled
        );
        let _ = self.tx.send(SearchEvent::Finished(summary)).await;
    }

    /// The page-by-page state machine. Returns the terminal outcome, or an
    /// error for the keyword-level retry wrapper.
    async fn page_loop(&self, progress: &mut Progress) -> Result<SearchOutcome, CrawlError> {
        loop {
            if self.cancel.load(Ordering::SeqCst) {
                return Ok(SearchOutcome::Cancelled);
            }
            if let Some(cap) = self.request.page_cap {
                if progress.page > cap {
                    return Ok(SearchOutcome::Completed);
                }
            }

            if !self.emit(SearchEvent::PageStarted { page: progress.page }).await {
                return Ok(SearchOutcome::Cancelled);
            }

            let mut handle = self.pool.acquire_page(AcquireOptions::default()).await?;
            let step = self.crawl_page(&mut handle, progress).await;
            self.pool.release_page(&handle).await;

            match step? {
                PageStep::Stop => return Ok(SearchOutcome::Completed),
                PageStep::Advance => progress.page += 1,
            }
        }
    }

    /// Handles one page: navigate, classify, remediate or extract, stream.
    async fn crawl_page(
        &self,
        handle: &mut PageHandle,
        progress: &mut Progress,
    ) -> Result<PageStep, CrawlError> {
        let page = progress.page;
        let url = self
            .config
            .search
            .search_url(&self.request.keyword, page);

        if let Err(e) = self.navigator.navigate(handle, &url).await {
            ::log::warn!("Skipping page {}: {}", page, e);
            self.emit(SearchEvent::PageSkipped {
                page,
                reason: e.to_string(),
            })
            .await;
            return Ok(PageStep::Advance);
        }

        // A solved challenge is followed by re-classification; bound the
        // rounds so a challenge that keeps coming back cannot spin forever.
        let mut challenge_rounds = 0;
        loop {
            let html = handle.client.source().await?;
            match classify::classify(&html, &self.config.classifier) {
                PageClass::NoMoreResults => {
                    ::log::info!("No more results after page {}", page.saturating_sub(1));
                    return Ok(PageStep::Stop);
                }
                PageClass::Unknown => {
                    ::log::warn!(
                        "Page {} did not match any known signature, stopping pagination",
                        page
                    );
                    return Ok(PageStep::Stop);
                }
                PageClass::Challenge => {
                    challenge_rounds += 1;
                    if challenge_rounds > 2 {
                        ::log::warn!("Challenge reappeared on page {}, skipping", page);
                        self.emit(SearchEvent::PageSkipped {
                            page,
                            reason: "challenge reappeared after solving".to_string(),
                        })
                        .await;
                        return Ok(PageStep::Advance);
                    }
                    match self.solver.solve(handle).await {
                        Ok(()) => continue,
                        Err(e @ CrawlError::ChallengeExhausted { .. }) => {
                            ::log::warn!("Skipping page {}: {}", page, e);
                            self.emit(SearchEvent::PageSkipped {
                                page,
                                reason: e.to_string(),
                            })
                            .await;
                            return Ok(PageStep::Advance);
                        }
                        Err(e) => return Err(e),
                    }
                }
                PageClass::Results => {
                    let records = self.extractor.extract(&html, page, progress.total).await?;
                    let empty = records.is_empty();
                    progress.total += records.len();
                    progress.pages_crawled += 1;

                    let batch = PageBatch {
                        page_number: page,
                        records,
                        total_so_far: progress.total,
                    };
                    if !self.emit(SearchEvent::Batch(batch)).await {
                        return Ok(PageStep::Stop);
                    }
                    // A results page with zero extractable cards means the
                    // listing has effectively run dry
                    if empty {
                        return Ok(PageStep::Stop);
                    }
                    return Ok(PageStep::Advance);
                }
            }
        }
    }

    /// Sends an event; false means the caller dropped the receiver, which is
    /// treated as cancellation.
    async fn emit(&self, event: SearchEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }
}

enum PageStep {
    Advance,
    Stop,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScoutConfig;

    fn offline_run(page_cap: Option<u32>) -> (SearchRun, mpsc::Receiver<SearchEvent>) {
        let mut config = ScoutConfig::default();
        config.pool.webdriver_url = "http://127.0.0.1:9".to_string();
        let pool = SessionPool::new(config.pool.clone());
        let (tx, rx) = mpsc::channel(64);
        let run = SearchRun {
            navigator: Navigator::new(Arc::clone(&pool), config.navigation.clone()),
            solver: ChallengeSolver::new(config.solver.clone(), config.classifier.clone(), None),
            extractor: ExtractionEngine::new(config.extraction.clone()),
            pool,
            config,
            request: SearchRequest {
                keyword: "furniture".to_string(),
                page_cap,
            },
            cancel: Arc::new(AtomicBool::new(false)),
            tx,
        };
        (run, rx)
    }

    fn offline_searcher(retries: u32, backoff_ms: u64) -> Searcher {
        let mut config = ScoutConfig::default();
        config.pool.webdriver_url = "http://127.0.0.1:9".to_string();
        config.search.keyword_retries = retries;
        config.search.keyword_backoff_ms = backoff_ms;
        Searcher::new(config)
    }

    #[tokio::test]
    async fn test_second_search_is_busy() {
        // Long backoff keeps the first task alive (and the flag held) while
        // the second request comes in.
        let searcher = offline_searcher(2, 30_000);
        let first = searcher
            .start(SearchRequest {
                keyword: "furniture".to_string(),
                page_cap: Some(1),
            })
            .await
            .expect("first search starts");

        let second = searcher
            .start(SearchRequest {
                keyword: "lamps".to_string(),
                page_cap: Some(1),
            })
            .await;
        assert!(matches!(second, Err(CrawlError::Busy)));
        drop(first);
    }

    #[tokio::test]
    async fn test_stream_ends_with_finished_failed_without_server() {
        let searcher = offline_searcher(1, 1);
        let mut handle = searcher
            .start(SearchRequest {
                keyword: "furniture".to_string(),
                page_cap: Some(1),
            })
            .await
            .unwrap();

        let mut last = None;
        while let Some(event) = handle.next().await {
            last = Some(event);
        }
        match last {
            Some(SearchEvent::Finished(summary)) => {
                assert!(matches!(summary.outcome, SearchOutcome::Failed { .. }));
                assert_eq!(summary.total_records, 0);
            }
            other => panic!("expected Finished event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_flag_clears_after_run_allows_next_search() {
        let searcher = offline_searcher(1, 1);
        let mut handle = searcher
            .start(SearchRequest {
                keyword: "furniture".to_string(),
                page_cap: Some(1),
            })
            .await
            .unwrap();
        while handle.next().await.is_some() {}

        // Give the guard drop a moment to land
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let again = searcher
            .start(SearchRequest {
                keyword: "furniture".to_string(),
                page_cap: Some(1),
            })
            .await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn test_page_counter_never_passes_cap() {
        let (run, mut rx) = offline_run(Some(2));
        let mut progress = Progress {
            page: 3,
            pages_crawled: 2,
            total: 10,
        };
        let outcome = run.page_loop(&mut progress).await.unwrap();
        assert_eq!(outcome, SearchOutcome::Completed);
        assert_eq!(progress.page, 3);
        drop(run);
        // A page beyond the cap must never even be announced
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_page_at_cap_is_still_attempted() {
        let (run, mut rx) = offline_run(Some(2));
        let mut progress = Progress {
            page: 2,
            pages_crawled: 1,
            total: 5,
        };
        // No server answers, so the attempt errors; the point is that the
        // page equal to the cap is announced rather than capped off.
        let result = run.page_loop(&mut progress).await;
        assert!(result.is_err());
        drop(run);
        match rx.recv().await {
            Some(SearchEvent::PageStarted { page }) => assert_eq!(page, 2),
            other => panic!("expected PageStarted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancel_before_first_page() {
        let searcher = offline_searcher(1, 1);
        let mut handle = searcher
            .start(SearchRequest {
                keyword: "furniture".to_string(),
                page_cap: None,
            })
            .await
            .unwrap();
        handle.canceller().cancel();

        let mut saw_finished = false;
        while let Some(event) = handle.next().await {
            if let SearchEvent::Finished(_) = event {
                saw_finished = true;
            }
        }
        assert!(saw_finished);
    }
}
