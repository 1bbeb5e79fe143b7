//! Pooled, health-checked browser sessions.
//!
//! One `BrowserInstance` is one WebDriver session, which maps to one browser
//! process on the driver side. One `ManagedPage` is one window within that
//! session. The pool owns all of them; callers only ever see a `PageHandle`
//! and never touch ambient globals.

use crate::config::PoolConfig;
use crate::error::{is_session_loss_cmd, CrawlError};
use crate::session::stealth;
use fantoccini::wd::WindowHandle;
use fantoccini::{Client, ClientBuilder};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Lifecycle state of a managed page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Idle,
    Active,
    Error,
    Closed,
}

struct ManagedPage {
    id: u64,
    window: WindowHandle,
    state: PageState,
    last_used: Instant,
    created_at: Instant,
}

struct BrowserInstance {
    id: u64,
    client: Client,
    connected: bool,
    created_at: Instant,
    last_used: Instant,
    pages: Vec<ManagedPage>,
}

impl BrowserInstance {
    fn active_pages(&self) -> usize {
        self.pages
            .iter()
            .filter(|p| p.state == PageState::Active)
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoolStatus {
    Ready,
    /// A disconnect was detected and automatic recreation failed; the pool
    /// refuses work until an explicit reset
    Error,
}

struct PoolState {
    instances: Vec<BrowserInstance>,
    status: PoolStatus,
}

/// Caller-facing handle to an acquired page.
///
/// The client is a cheap clone of the owning instance's session handle; all
/// commands issued through it go to the same browser. `activate` must be
/// called (the pool does so on acquisition) before element commands, since a
/// WebDriver session focuses one window at a time.
#[derive(Clone)]
pub struct PageHandle {
    pub client: Client,
    pub window: WindowHandle,
    pub instance_id: u64,
    pub page_id: u64,
}

impl PageHandle {
    /// Focus this page's window
    pub async fn activate(&self) -> Result<(), CrawlError> {
        self.client
            .switch_to_window(self.window.clone())
            .await
            .map_err(CrawlError::from)
    }
}

/// Options for a single page acquisition
#[derive(Debug, Clone, Copy)]
pub struct AcquireOptions {
    /// Reuse an idle page instead of opening a new one when possible
    pub reuse_idle: bool,
}

impl Default for AcquireOptions {
    fn default() -> Self {
        Self { reuse_idle: true }
    }
}

/// Browser session pool
pub struct SessionPool {
    config: PoolConfig,
    state: Mutex<PoolState>,
    next_id: AtomicU64,
    /// Bumped on every acquisition. Pending idle-cleanup tasks capture the
    /// epoch when scheduled and stand down if it moved, which closes the
    /// window between "pool looked empty" and "work arrived a moment later".
    epoch: AtomicU64,
}

impl SessionPool {
    pub fn new(config: PoolConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: Mutex::new(PoolState {
                instances: Vec::new(),
                status: PoolStatus::Ready,
            }),
            next_id: AtomicU64::new(1),
            epoch: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Returns an active page, reusing an idle one when requested, opening a
    /// new window under the per-instance cap, or launching a new instance
    /// under the instance cap. `ResourceExhausted` when every cap is hit.
    pub async fn acquire_page(
        self: &Arc<Self>,
        options: AcquireOptions,
    ) -> Result<PageHandle, CrawlError> {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().await;

        if state.status == PoolStatus::Error {
            return Err(CrawlError::SessionDisconnected(
                "pool is in error state; call reset()".to_string(),
            ));
        }

        if options.reuse_idle {
            if let Some(handle) = reuse_idle_page(&mut state).await {
                ::log::debug!("Reusing idle page {}", handle.page_id);
                return Ok(handle);
            }
        }

        // New window in an instance with capacity
        for instance in state
            .instances
            .iter_mut()
            .filter(|i| i.connected && i.pages.len() < self.config.max_pages_per_instance)
        {
            let page_id = self.next_id.fetch_add(1, Ordering::SeqCst);
            match open_window(instance, page_id).await {
                Ok(handle) => return Ok(handle),
                Err(e) if e.is_session_loss() => {
                    ::log::warn!("Instance {} lost while opening window: {}", instance.id, e);
                    instance.connected = false;
                }
                Err(e) => return Err(e),
            }
        }
        state.instances.retain(|i| i.connected);

        // New instance
        if state.instances.len() < self.config.max_instances {
            let instance_id = self.next_id();
            let page_id = self.next_id();
            let (instance, handle) =
                launch_instance(&self.config, instance_id, page_id).await?;
            state.instances.push(instance);
            ::log::info!("Launched browser instance {}", instance_id);
            return Ok(handle);
        }

        Err(CrawlError::ResourceExhausted(format!(
            "{} instances x {} pages, none idle",
            self.config.max_instances, self.config.max_pages_per_instance
        )))
    }

    /// Marks the page idle and eligible for reuse. The window stays open; a
    /// reaper closes it if nothing reuses it within the idle timeout.
    pub async fn release_page(self: &Arc<Self>, handle: &PageHandle) {
        {
            let mut state = self.state.lock().await;
            if let Some(page) = find_page(&mut state, handle) {
                page.state = PageState::Idle;
                page.last_used = Instant::now();
            }
        }
        self.schedule_page_reap(handle.instance_id, handle.page_id);
    }

    /// Closes the tab (when the instance keeps other pages) and drops its
    /// bookkeeping. The session's last window stays open: closing it would
    /// end the WebDriver session, so it is left for the grace-period
    /// teardown, which reclaims it together with the browser process.
    pub async fn close_page(self: &Arc<Self>, handle: &PageHandle) -> Result<(), CrawlError> {
        let now_empty = {
            let mut state = self.state.lock().await;
            if let Some(instance) = state
                .instances
                .iter_mut()
                .find(|i| i.id == handle.instance_id)
            {
                if let Some(page) = instance.pages.iter_mut().find(|p| p.id == handle.page_id) {
                    page.state = PageState::Closed;
                }
                if instance.pages.len() > 1 {
                    // Closing the focused window leaves the session without a
                    // focus target, so switch first.
                    let _ = instance
                        .client
                        .switch_to_window(handle.window.clone())
                        .await;
                    if let Err(e) = instance.client.close_window().await {
                        if is_session_loss_cmd(&e) {
                            instance.connected = false;
                        } else {
                            ::log::warn!("Failed to close window: {}", e);
                        }
                    }
                }
                instance.pages.retain(|p| p.state != PageState::Closed);
            }
            state.instances.iter().all(|i| i.pages.is_empty())
        };

        if now_empty {
            self.schedule_teardown();
        }
        Ok(())
    }

    /// False when the browser reports disconnected or a trivial script
    /// evaluation on an active page throws. Deliberately a no-op while no
    /// page is active: probing an idle pool caused spurious relaunches.
    pub async fn health_check(self: &Arc<Self>) -> bool {
        let mut state = self.state.lock().await;
        if state.status == PoolStatus::Error {
            return false;
        }

        let Some(instance) = state
            .instances
            .iter_mut()
            .find(|i| i.active_pages() > 0)
        else {
            return true;
        };

        if !instance.connected {
            return false;
        }
        match instance.client.execute("return 1;", vec![]).await {
            Ok(_) => true,
            Err(e) => {
                ::log::warn!("Health check failed on instance {}: {}", instance.id, e);
                if is_session_loss_cmd(&e) {
                    instance.connected = false;
                }
                false
            }
        }
    }

    /// Tears down every instance and page and reinitializes from zero.
    pub async fn reset(self: &Arc<Self>) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().await;
        ::log::info!("Resetting session pool ({} instances)", state.instances.len());
        for instance in state.instances.drain(..) {
            if let Err(e) = instance.client.clone().close().await {
                ::log::debug!("Ignoring close error during reset: {}", e);
            }
        }
        state.status = PoolStatus::Ready;
    }

    /// Handles a detected disconnect of one instance: discards its pages and
    /// attempts one automatic recreation. If recreation fails the pool goes
    /// into error state until an explicit `reset`.
    pub async fn handle_disconnect(self: &Arc<Self>, instance_id: u64) -> Result<PageHandle, CrawlError> {
        let mut state = self.state.lock().await;
        let before = state.instances.len();
        state.instances.retain(|i| i.id != instance_id);
        if state.instances.len() < before {
            ::log::warn!("Instance {} disconnected, dropping its pages", instance_id);
        }

        let new_instance_id = self.next_id();
        let page_id = self.next_id();
        match launch_instance(&self.config, new_instance_id, page_id).await {
            Ok((instance, handle)) => {
                state.instances.push(instance);
                ::log::info!("Recreated browser as instance {}", new_instance_id);
                Ok(handle)
            }
            Err(e) => {
                ::log::error!("Automatic browser recreation failed: {}", e);
                state.status = PoolStatus::Error;
                Err(CrawlError::SessionDisconnected(format!(
                    "recreation failed: {}",
                    e
                )))
            }
        }
    }

    /// Replaces a dead page with a fresh one, recreating the whole instance
    /// when the session itself is gone. Used by the navigation driver.
    pub async fn recreate_page(self: &Arc<Self>, handle: &PageHandle) -> Result<PageHandle, CrawlError> {
        {
            let mut state = self.state.lock().await;
            if let Some(instance) = state
                .instances
                .iter_mut()
                .find(|i| i.id == handle.instance_id)
            {
                instance.pages.retain(|p| p.id != handle.page_id);
                if instance.connected {
                    let page_id = self.next_id.fetch_add(1, Ordering::SeqCst);
                    match open_window(instance, page_id).await {
                        Ok(new_handle) => return Ok(new_handle),
                        Err(e) if e.is_session_loss() => {
                            instance.connected = false;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
        self.handle_disconnect(handle.instance_id).await
    }

    /// Count of pages currently tracked, any state
    pub async fn page_count(&self) -> usize {
        let state = self.state.lock().await;
        state.instances.iter().map(|i| i.pages.len()).sum()
    }

    fn schedule_page_reap(self: &Arc<Self>, instance_id: u64, page_id: u64) {
        let pool = Arc::clone(self);
        let idle = Duration::from_secs(self.config.page_idle_secs);
        tokio::spawn(async move {
            tokio::time::sleep(idle).await;
            let now_empty = {
                let mut state = pool.state.lock().await;
                let Some(instance) = state.instances.iter_mut().find(|i| i.id == instance_id)
                else {
                    return;
                };
                // Reap only if the page sat idle the whole time and no sibling
                // page is mid-operation on the same session.
                let still_idle = instance.pages.iter().any(|p| {
                    p.id == page_id && p.state == PageState::Idle && p.last_used.elapsed() >= idle
                });
                if !still_idle || instance.active_pages() > 0 {
                    return;
                }
                if instance.pages.len() > 1 {
                    let window = instance
                        .pages
                        .iter()
                        .find(|p| p.id == page_id)
                        .map(|p| p.window.clone());
                    if let Some(window) = window {
                        let _ = instance.client.switch_to_window(window).await;
                        let _ = instance.client.close_window().await;
                    }
                }
                let mut age = None;
                if let Some(page) = instance.pages.iter_mut().find(|p| p.id == page_id) {
                    page.state = PageState::Closed;
                    age = Some(page.created_at.elapsed());
                }
                instance.pages.retain(|p| p.state != PageState::Closed);
                ::log::debug!("Reaped idle page {} (age {:?})", page_id, age);
                state.instances.iter().all(|i| i.pages.is_empty())
            };
            if now_empty {
                pool.schedule_teardown();
            }
        });
    }

    /// Schedules teardown of all browser processes once the pool has been
    /// empty for the grace period. A new acquisition in the meantime bumps
    /// the epoch and the task stands down.
    fn schedule_teardown(self: &Arc<Self>) {
        let pool = Arc::clone(self);
        let epoch = self.epoch.load(Ordering::SeqCst);
        let grace = Duration::from_secs(self.config.teardown_grace_secs);
        ::log::debug!("Pool empty, scheduling browser teardown in {:?}", grace);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            pool.teardown_if_still_idle(epoch).await;
        });
    }

    /// Tears down all instances unless the pool saw new work since the
    /// teardown was scheduled (the epoch moved) or holds pages again.
    /// Returns whether the teardown went ahead.
    async fn teardown_if_still_idle(self: &Arc<Self>, epoch: u64) -> bool {
        if self.epoch.load(Ordering::SeqCst) != epoch {
            ::log::debug!("Teardown cancelled, pool saw new work");
            return false;
        }
        let mut state = self.state.lock().await;
        if state.instances.iter().any(|i| !i.pages.is_empty()) {
            return false;
        }
        ::log::info!("Idle grace elapsed, tearing down browser instances");
        for instance in state.instances.drain(..) {
            ::log::debug!(
                "Closing instance {} (alive {:?}, last used {:?} ago)",
                instance.id,
                instance.created_at.elapsed(),
                instance.last_used.elapsed()
            );
            if let Err(e) = instance.client.clone().close().await {
                ::log::debug!("Ignoring close error during teardown: {}", e);
            }
        }
        true
    }
}

fn find_page<'a>(state: &'a mut PoolState, handle: &PageHandle) -> Option<&'a mut ManagedPage> {
    state
        .instances
        .iter_mut()
        .find(|i| i.id == handle.instance_id)?
        .pages
        .iter_mut()
        .find(|p| p.id == handle.page_id)
}

async fn reuse_idle_page(state: &mut PoolState) -> Option<PageHandle> {
    for instance in state.instances.iter_mut().filter(|i| i.connected) {
        let client = instance.client.clone();
        let instance_id = instance.id;
        for page in instance
            .pages
            .iter_mut()
            .filter(|p| p.state == PageState::Idle)
        {
            match client.switch_to_window(page.window.clone()).await {
                Ok(()) => {
                    page.state = PageState::Active;
                    page.last_used = Instant::now();
                    return Some(PageHandle {
                        client,
                        window: page.window.clone(),
                        instance_id,
                        page_id: page.id,
                    });
                }
                Err(e) => {
                    ::log::debug!("Idle page {} unusable ({}), discarding", page.id, e);
                    page.state = PageState::Error;
                }
            }
        }
        instance.pages.retain(|p| p.state != PageState::Error);
    }
    None
}

async fn open_window(instance: &mut BrowserInstance, page_id: u64) -> Result<PageHandle, CrawlError> {
    let new_window = instance.client.new_window(true).await?;
    instance
        .client
        .switch_to_window(new_window.handle.clone())
        .await?;
    let now = Instant::now();
    instance.pages.push(ManagedPage {
        id: page_id,
        window: new_window.handle.clone(),
        state: PageState::Active,
        last_used: now,
        created_at: now,
    });
    instance.last_used = now;
    Ok(PageHandle {
        client: instance.client.clone(),
        window: new_window.handle,
        instance_id: instance.id,
        page_id,
    })
}

/// Launches a new browser instance and returns it with its first page active.
async fn launch_instance(
    config: &PoolConfig,
    instance_id: u64,
    page_id: u64,
) -> Result<(BrowserInstance, PageHandle), CrawlError> {
    let client = connect(config).await?;
    let window = client.window().await?;
    let now = Instant::now();

    let instance = BrowserInstance {
        id: instance_id,
        client: client.clone(),
        connected: true,
        created_at: now,
        last_used: now,
        pages: vec![ManagedPage {
            id: page_id,
            window: window.clone(),
            state: PageState::Active,
            last_used: now,
            created_at: now,
        }],
    };
    let handle = PageHandle {
        client,
        window,
        instance_id,
        page_id,
    };
    Ok((instance, handle))
}

/// Connects to the WebDriver server, trying common local fallbacks when the
/// configured URL is unreachable.
async fn connect(config: &PoolConfig) -> Result<Client, CrawlError> {
    let caps = stealth::capabilities(config);

    match ClientBuilder::native()
        .capabilities(caps.clone())
        .connect(&config.webdriver_url)
        .await
    {
        Ok(client) => return Ok(client),
        Err(e) => {
            ::log::error!(
                "Failed to connect to WebDriver at {}: {}",
                config.webdriver_url,
                e
            );
        }
    }

    let fallback_urls = [
        "http://localhost:9515", // ChromeDriver default
        "http://127.0.0.1:4444", // IP instead of localhost
    ];
    for url in fallback_urls {
        if url == config.webdriver_url {
            continue;
        }
        ::log::info!("Trying fallback WebDriver URL: {}", url);
        if let Ok(client) = ClientBuilder::native()
            .capabilities(caps.clone())
            .connect(url)
            .await
        {
            return Ok(client);
        }
    }

    Err(CrawlError::SessionDisconnected(format!(
        "no WebDriver server reachable (tried {} and fallbacks)",
        config.webdriver_url
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_pool() -> Arc<SessionPool> {
        let mut config = PoolConfig::default();
        // Port 9 is the discard service; nothing answers WebDriver there
        config.webdriver_url = "http://127.0.0.1:9".to_string();
        SessionPool::new(config)
    }

    #[tokio::test]
    async fn test_acquire_without_server_reports_disconnect() {
        let pool = unreachable_pool();
        let result = pool.acquire_page(AcquireOptions::default()).await;
        match result {
            Err(CrawlError::SessionDisconnected(_)) => {}
            other => panic!("expected SessionDisconnected, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_health_check_true_while_idle() {
        // No active pages: the check must not probe (probing an idle pool is
        // the documented anti-pattern) and reports healthy.
        let pool = unreachable_pool();
        assert!(pool.health_check().await);
    }

    #[tokio::test]
    async fn test_empty_pool_counts_zero_pages() {
        let pool = unreachable_pool();
        assert_eq!(pool.page_count().await, 0);
    }

    #[tokio::test]
    async fn test_teardown_stands_down_after_new_work() {
        let pool = unreachable_pool();
        let scheduled_at = pool.epoch.load(Ordering::SeqCst);
        // Acquisition bumps the epoch before it even reaches the driver, so
        // a teardown scheduled for the old epoch must stand down.
        let _ = pool.acquire_page(AcquireOptions::default()).await;
        assert!(!pool.teardown_if_still_idle(scheduled_at).await);
    }

    #[tokio::test]
    async fn test_teardown_proceeds_when_pool_stayed_idle() {
        let pool = unreachable_pool();
        let epoch = pool.epoch.load(Ordering::SeqCst);
        assert!(pool.teardown_if_still_idle(epoch).await);
    }

    #[tokio::test]
    async fn test_reset_returns_pool_to_ready() {
        let pool = unreachable_pool();
        pool.reset().await;
        // Still no server, but the failure mode stays SessionDisconnected
        // rather than an error-state refusal.
        let err = pool
            .acquire_page(AcquireOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CrawlError::SessionDisconnected(_)));
    }
}
