//! RAII wrapper around a launched browser process.
//!
//! Ensures the CDP event-handler task is aborted and (where applicable) the
//! profile directory is cleaned up when the wrapper is dropped, so a run
//! that errors out mid-flow never leaves an orphaned Chrome process.

use chromiumoxide::Browser;
use std::path::PathBuf;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct BrowserWrapper {
    browser: Browser,
    handler: JoinHandle<()>,
    user_data_dir: Option<PathBuf>,
}

impl BrowserWrapper {
    pub(crate) fn new(browser: Browser, handler: JoinHandle<()>, user_data_dir: Option<PathBuf>) -> Self {
        Self {
            browser,
            handler,
            user_data_dir,
        }
    }

    pub(crate) fn browser(&self) -> &Browser {
        &self.browser
    }

    pub(crate) fn browser_mut(&mut self) -> &mut Browser {
        &mut self.browser
    }

    /// Blocking cleanup of the temp profile directory. Must be called after
    /// `browser.wait()` completes so Chrome has released its file handles.
    pub fn cleanup_temp_dir(&mut self) {
        if let Some(path) = self.user_data_dir.take() {
            info!(path = %path.display(), "cleaning up browser profile directory");
            if let Err(e) = std::fs::remove_dir_all(&path) {
                warn!(path = %path.display(), error = %e, "failed to clean up profile directory");
            }
        }
    }
}

impl Drop for BrowserWrapper {
    fn drop(&mut self) {
        self.handler.abort();
        if self.user_data_dir.is_some() {
            warn!(
                "BrowserWrapper dropped without explicit shutdown; profile directory will be orphaned. \
                 Call BrowserManager::shutdown() before dropping to ensure cleanup."
            );
        }
    }
}
