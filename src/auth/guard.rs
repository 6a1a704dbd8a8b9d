//! AuthGuardChecker: proactive "are we logged out" check. Off by default — only consulted when a pack declares
//! `auth.guard` — so packs that never hit a login wall pay nothing extra.

use chromiumoxide::Page;

use crate::error::{EngineError, EngineResult};
use crate::pack::model::AuthGuardStrategy;

pub struct AuthGuardChecker<'a> {
    strategy: &'a AuthGuardStrategy,
}

impl<'a> AuthGuardChecker<'a> {
    pub fn new(strategy: &'a AuthGuardStrategy) -> Self {
        Self { strategy }
    }

    /// True if the current page looks like a login wall: either the
    /// configured selector is visible, or the current URL contains the
    /// configured substring. Either condition alone is sufficient.
    pub async fn is_guarded(&self, page: &Page) -> EngineResult<bool> {
        if let Some(selector) = &self.strategy.visible_selector {
            let elements = page
                .find_elements(selector)
                .await
                .map_err(|e| EngineError::Operational(format!("guard selector query failed: {}", e)))?;
            if !elements.is_empty() {
                return Ok(true);
            }
        }

        if let Some(needle) = &self.strategy.url_includes {
            let url = page
                .url()
                .await
                .map_err(|e| EngineError::Operational(format!("failed to read page url: {}", e)))?
                .unwrap_or_default();
            if url.contains(needle.as_str()) {
                return Ok(true);
            }
        }

        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_with_no_constraints_cannot_trigger_on_url_check_alone() {
        // Sanity check on the config shape only; page-dependent behavior is
        // exercised at the interpreter/integration layer where a live Page
        // (or chromiumoxide's CDP mock) is available.
        let strategy = AuthGuardStrategy {
            visible_selector: None,
            url_includes: None,
        };
        let checker = AuthGuardChecker::new(&strategy);
        assert!(checker.strategy.visible_selector.is_none());
        assert!(checker.strategy.url_includes.is_none());
    }
}
