//! AuthFailureMonitor: detects auth-shaped failures from observed
//! `(url, status)` pairs and remembers them for the recovery driver.

use parking_lot::Mutex;
use regex::Regex;

use crate::pack::model::AuthFailureMonitorConfig;

#[derive(Debug, Clone)]
pub struct AuthFailure {
    pub url: String,
    pub status: u16,
    pub step_id: String,
}

pub struct AuthFailureMonitor {
    config: AuthFailureMonitorConfig,
    url_regex: Option<Regex>,
    failures: Mutex<Vec<AuthFailure>>,
}

impl AuthFailureMonitor {
    pub fn new(config: AuthFailureMonitorConfig) -> Result<Self, regex::Error> {
        let url_regex = match &config.url_regex {
            Some(pattern) => Some(Regex::new(pattern)?),
            None => None,
        };
        Ok(Self {
            config,
            url_regex,
            failures: Mutex::new(Vec::new()),
        })
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// True iff `status` is in the configured set *and* (no URL constraint
    /// is set, or at least one constraint matches).
    pub fn is_auth_failure(&self, url: &str, status: u16) -> bool {
        if !self.config.enabled {
            return false;
        }
        if !self.config.status_codes.contains(&status) {
            return false;
        }
        let has_url_constraint = self.config.url_includes.is_some() || self.url_regex.is_some();
        if !has_url_constraint {
            return true;
        }
        let includes_match = self
            .config
            .url_includes
            .as_ref()
            .is_some_and(|needle| url.contains(needle.as_str()));
        let regex_match = self.url_regex.as_ref().is_some_and(|re| re.is_match(url));
        includes_match || regex_match
    }

    pub fn record_failure(&self, url: String, status: u16, step_id: String) {
        self.failures.lock().push(AuthFailure { url, status, step_id });
    }

    pub fn latest_failure(&self) -> Option<AuthFailure> {
        self.failures.lock().last().cloned()
    }

    pub fn failures_for_step(&self, step_id: &str) -> Vec<AuthFailure> {
        self.failures
            .lock()
            .iter()
            .filter(|f| f.step_id == step_id)
            .cloned()
            .collect()
    }

    pub fn max_recoveries_per_run(&self) -> u32 {
        self.config.max_recoveries_per_run
    }

    pub fn max_step_retry_after_recovery(&self) -> u32 {
        self.config.max_step_retry_after_recovery
    }

    pub fn cooldown_ms(&self) -> u64 {
        self.config.cooldown_ms
    }

    pub fn is_login_step(&self, step_id: &str) -> bool {
        self.config
            .login_url_includes
            .as_ref()
            .is_some_and(|needle| step_id.contains(needle.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_configured_status_with_no_url_constraint() {
        let monitor = AuthFailureMonitor::new(AuthFailureMonitorConfig::default()).unwrap();
        assert!(monitor.is_auth_failure("https://example.com/api", 401));
        assert!(!monitor.is_auth_failure("https://example.com/api", 500));
    }

    #[test]
    fn url_constraint_must_match_when_present() {
        let config = AuthFailureMonitorConfig {
            url_includes: Some("/api/".to_string()),
            ..Default::default()
        };
        let monitor = AuthFailureMonitor::new(config).unwrap();
        assert!(monitor.is_auth_failure("https://example.com/api/x", 401));
        assert!(!monitor.is_auth_failure("https://example.com/static/x", 401));
    }

    #[test]
    fn records_and_queries_failures() {
        let monitor = AuthFailureMonitor::new(AuthFailureMonitorConfig::default()).unwrap();
        monitor.record_failure("https://example.com".to_string(), 401, "step1".to_string());
        assert_eq!(monitor.failures_for_step("step1").len(), 1);
        assert!(monitor.latest_failure().is_some());
    }
}
