//! Auth recovery driver.
//!
//! When the [`AuthFailureMonitor`] flags a response as an auth failure, this
//! driver reruns every `once`-tagged step (in original flow order — e.g. a
//! login flow) and then retries the step that originally failed, up to
//! `maxStepRetryAfterRecovery` times with `cooldownMs` between attempts. A
//! recovery is counted once per run regardless of how many `once` steps it
//! reran.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;

use crate::auth::monitor::AuthFailureMonitor;
use crate::error::{EngineError, EngineResult};

/// Executes a single step by id. Implemented by the step interpreter; kept
/// as a trait here so the recovery driver has no dependency on it.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute_step(&self, step_id: &str) -> EngineResult<()>;
}

pub struct RecoveryDriver<'a> {
    monitor: &'a AuthFailureMonitor,
    recoveries_used: AtomicU32,
}

impl<'a> RecoveryDriver<'a> {
    pub fn new(monitor: &'a AuthFailureMonitor) -> Self {
        Self {
            monitor,
            recoveries_used: AtomicU32::new(0),
        }
    }

    pub fn recoveries_used(&self) -> u32 {
        self.recoveries_used.load(Ordering::SeqCst)
    }

    /// Attempt recovery for `failing_step_id`, given the ids of all `once`
    /// steps in original flow order. Returns `Ok(())` once the failing step
    /// succeeds again, or the last error if every retry is exhausted.
    pub async fn recover(
        &self,
        executor: &dyn StepExecutor,
        once_step_ids: &[String],
        failing_step_id: &str,
    ) -> EngineResult<()> {
        if self.recoveries_used() >= self.monitor.max_recoveries_per_run() {
            return Err(EngineError::AuthFailure(format!(
                "recovery budget exhausted for step '{}'",
                failing_step_id
            )));
        }
        self.recoveries_used.fetch_add(1, Ordering::SeqCst);

        for step_id in once_step_ids {
            executor.execute_step(step_id).await?;
        }

        let max_retries = self.monitor.max_step_retry_after_recovery();
        let cooldown_ms = self.monitor.cooldown_ms();
        let mut last_err = None;
        for attempt in 0..max_retries.max(1) {
            if attempt > 0 && cooldown_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(cooldown_ms)).await;
            }
            match executor.execute_step(failing_step_id).await {
                Ok(()) => return Ok(()),
                Err(e) => last_err = Some(e),
            }
        }

        Err(last_err.unwrap_or_else(|| {
            EngineError::AuthFailure(format!("recovery retries exhausted for step '{}'", failing_step_id))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::model::AuthFailureMonitorConfig;
    use std::sync::Mutex;

    struct FlakyExecutor {
        calls: Mutex<Vec<String>>,
        fail_until: u32,
    }

    #[async_trait]
    impl StepExecutor for FlakyExecutor {
        async fn execute_step(&self, step_id: &str) -> EngineResult<()> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(step_id.to_string());
            let failing_attempts = calls.iter().filter(|id| id.as_str() == step_id).count() as u32;
            if step_id == "protected" && failing_attempts <= self.fail_until {
                return Err(EngineError::AuthFailure("still unauthorized".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn reruns_once_steps_then_retries_failing_step() {
        let config = AuthFailureMonitorConfig {
            max_recoveries_per_run: 1,
            max_step_retry_after_recovery: 2,
            cooldown_ms: 0,
            ..Default::default()
        };
        let monitor = AuthFailureMonitor::new(config).unwrap();
        let driver = RecoveryDriver::new(&monitor);
        let executor = FlakyExecutor {
            calls: Mutex::new(vec![]),
            fail_until: 1,
        };

        let result = driver
            .recover(&executor, &["login".to_string()], "protected")
            .await;
        assert!(result.is_ok());
        let calls = executor.calls.lock().unwrap();
        assert_eq!(calls[0], "login");
        assert!(calls.iter().filter(|c| c.as_str() == "protected").count() >= 2);
    }

    #[tokio::test]
    async fn exhausted_recovery_budget_errors_without_running_anything() {
        let config = AuthFailureMonitorConfig {
            max_recoveries_per_run: 0,
            ..Default::default()
        };
        let monitor = AuthFailureMonitor::new(config).unwrap();
        let driver = RecoveryDriver::new(&monitor);
        let executor = FlakyExecutor {
            calls: Mutex::new(vec![]),
            fail_until: 0,
        };
        let result = driver.recover(&executor, &[], "protected").await;
        assert!(result.is_err());
        assert!(executor.calls.lock().unwrap().is_empty());
    }
}
