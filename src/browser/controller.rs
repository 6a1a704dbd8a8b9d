//! Browser Controller operations: the concrete chromiumoxide
//! operations the Step Interpreter drives — navigation, waiting, and the
//! thin layer over the Target Resolver for click/fill/extract.

use std::time::Duration;

use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::page::NavigateParams as CdpNavigateParams;
use tokio::time::timeout;

use crate::error::{EngineError, EngineResult};
use crate::pack::model::{Target, WaitUntil};
use crate::target::{self, ResolvedTarget};

/// Thin façade binding a live page to named operations: `goto`,
/// `waitForURL`, `waitForLoadState`, the `getBy*` family (delegated to the
/// Target Resolver), `screenshot`, `content`, `url`.
pub struct BrowserController<'a> {
    page: &'a Page,
}

impl<'a> BrowserController<'a> {
    pub fn new(page: &'a Page) -> Self {
        Self { page }
    }

    pub fn page(&self) -> &'a Page {
        self.page
    }

    pub async fn goto(&self, url: &str, wait_until: Option<WaitUntil>) -> EngineResult<()> {
        let params = CdpNavigateParams::builder()
            .url(url)
            .build()
            .map_err(|e| EngineError::Operational(format!("invalid navigate params: {}", e)))?;
        self.page
            .goto(params)
            .await
            .map_err(|e| EngineError::Operational(format!("navigation failed: {}", e)))?;

        match wait_until.unwrap_or(WaitUntil::Load) {
            WaitUntil::Commit => {}
            WaitUntil::Domcontentloaded | WaitUntil::Load | WaitUntil::Networkidle => {
                self.page
                    .wait_for_navigation()
                    .await
                    .map_err(|e| EngineError::Operational(format!("wait_for_navigation failed: {}", e)))?;
            }
        }
        Ok(())
    }

    pub async fn wait_for_url(&self, substring: &str, timeout_ms: u64) -> EngineResult<()> {
        let deadline = Duration::from_millis(timeout_ms);
        let poll = async {
            loop {
                let current = self.page.url().await.ok().flatten().unwrap_or_default();
                if current.contains(substring) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        };
        timeout(deadline, poll)
            .await
            .map_err(|_| EngineError::StepTimeout { step_id: String::new(), timeout_ms })
    }

    pub async fn wait_for_load_state(&self, state: WaitUntil, timeout_ms: u64) -> EngineResult<()> {
        let deadline = Duration::from_millis(timeout_ms);
        let fut = async {
            match state {
                WaitUntil::Commit => Ok(()),
                _ => self.page.wait_for_navigation().await.map(|_| ()),
            }
        };
        timeout(deadline, fut)
            .await
            .map_err(|_| EngineError::StepTimeout { step_id: String::new(), timeout_ms })?
            .map_err(|e| EngineError::Operational(format!("wait_for_load_state failed: {}", e)))
    }

    pub async fn resolve_target(&self, target: &Target, scope: Option<&Target>) -> EngineResult<ResolvedTarget> {
        target::resolve(self.page, target, scope).await
    }

    pub async fn content(&self) -> EngineResult<String> {
        self.page
            .content()
            .await
            .map_err(|e| EngineError::Operational(format!("failed to read page content: {}", e)))
    }

    pub async fn url(&self) -> EngineResult<String> {
        Ok(self.page.url().await.ok().flatten().unwrap_or_default())
    }

    pub async fn title(&self) -> EngineResult<String> {
        Ok(self.page.get_title().await.ok().flatten().unwrap_or_default())
    }

    pub async fn screenshot_png(&self) -> EngineResult<Vec<u8>> {
        use chromiumoxide::page::ScreenshotParams;
        self.page
            .screenshot(ScreenshotParams::builder().build())
            .await
            .map_err(|e| EngineError::Operational(format!("screenshot failed: {}", e)))
    }
}
