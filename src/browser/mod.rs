//! Browser Controller (concrete chromiumoxide backend).
//!
//! A browser session is never shared across runs unless the dashboard
//! explicitly binds one to a conversation, so `BrowserManager` here is
//! instantiated per run rather than as a process-wide singleton (contrast
//! with a tool server that shares one browser across calls).

pub mod controller;
pub mod wrapper;

use std::path::PathBuf;

use chromiumoxide::Browser;
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::Page;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{EngineError, EngineResult};
use crate::proxy::ResolvedProxy;
use wrapper::BrowserWrapper;

pub use controller::BrowserController;

/// Drains the CDP event stream for the lifetime of the browser. Known
/// benign deserialization errors (chromiumoxide doesn't recognize every
/// CDP event Chrome can send) are logged at trace level; anything else is
/// a real error worth surfacing.
async fn run_handler(mut handler: chromiumoxide::Handler) {
    use futures::StreamExt;
    while let Some(event) = handler.next().await {
        if let Err(e) = event {
            let msg = e.to_string();
            let benign = msg.contains("data did not match any variant of untagged enum Message")
                || msg.contains("Failed to deserialize WS response");
            if benign {
                tracing::trace!("suppressed benign CDP event error: {}", msg);
            } else {
                tracing::error!("browser handler error: {}", msg);
            }
        }
    }
}

/// Launches and health-checks a single browser instance for the lifetime of
/// one run. Uses `tokio::sync::Mutex`, not a sync lock, since every
/// operation on the held browser is async.
pub struct BrowserManager {
    headless: bool,
    proxy: Option<ResolvedProxy>,
    browser: Mutex<Option<BrowserWrapper>>,
    current_page: Mutex<Option<Page>>,
}

impl BrowserManager {
    pub fn new(headless: bool, proxy: Option<ResolvedProxy>) -> Self {
        Self {
            headless,
            proxy,
            browser: Mutex::new(None),
            current_page: Mutex::new(None),
        }
    }

    /// Get the live browser, launching it on first use and transparently
    /// recovering from a crashed process (health-checked via the CDP
    /// `version` command on every call).
    pub async fn get_or_launch(&self) -> EngineResult<()> {
        let mut guard = self.browser.lock().await;

        if let Some(wrapper) = guard.as_ref()
            && wrapper.browser().version().await.is_ok()
        {
            return Ok(());
        }

        if let Some(mut crashed) = guard.take() {
            warn!("browser health check failed, relaunching");
            let _ = crashed.browser_mut().close().await;
            let _ = crashed.browser_mut().wait().await;
            crashed.cleanup_temp_dir();
        }

        let (browser, handler, user_data_dir) = self.launch().await?;
        let handle = tokio::spawn(run_handler(handler));
        *guard = Some(BrowserWrapper::new(browser, handle, Some(user_data_dir)));
        Ok(())
    }

    async fn launch(&self) -> EngineResult<(Browser, chromiumoxide::Handler, PathBuf)> {
        let user_data_dir = std::env::temp_dir().join(format!("showrun-profile-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&user_data_dir)?;

        let mut builder = BrowserConfig::builder()
            .user_data_dir(&user_data_dir)
            .headless_mode(if self.headless {
                chromiumoxide::browser::HeadlessMode::New
            } else {
                chromiumoxide::browser::HeadlessMode::False
            });

        if let Some(proxy) = &self.proxy {
            builder = builder.arg(format!("--proxy-server={}", proxy.url));
        }

        let config = builder
            .build()
            .map_err(|e| EngineError::Operational(format!("invalid browser config: {}", e)))?;

        let (browser, handler) = Browser::launch(config)
            .await
            .map_err(|e| EngineError::Operational(format!("failed to launch browser: {}", e)))?;

        info!("launched browser for run");
        Ok((browser, handler, user_data_dir))
    }

    pub async fn current_page(&self) -> Option<Page> {
        self.current_page.lock().await.clone()
    }

    pub async fn set_current_page(&self, page: Page) {
        *self.current_page.lock().await = Some(page);
    }

    pub async fn new_page(&self, url: &str) -> EngineResult<Page> {
        self.get_or_launch().await?;
        let guard = self.browser.lock().await;
        let wrapper = guard.as_ref().expect("just launched");
        let page = wrapper
            .browser()
            .new_page(url)
            .await
            .map_err(|e| EngineError::Operational(format!("failed to open page: {}", e)))?;
        drop(guard);
        self.set_current_page(page.clone()).await;
        Ok(page)
    }

    pub async fn shutdown(&self) -> EngineResult<()> {
        let mut guard = self.browser.lock().await;
        if let Some(mut wrapper) = guard.take() {
            let _ = wrapper.browser_mut().close().await;
            let _ = wrapper.browser_mut().wait().await;
            wrapper.cleanup_temp_dir();
        }
        Ok(())
    }
}
