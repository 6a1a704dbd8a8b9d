//! Auth Resilience: memoizing `once` steps, detecting auth-shaped
//! failures, a proactive login-wall guard, and the recovery driver that
//! ties them together.

pub mod guard;
pub mod monitor;
pub mod once_cache;
pub mod recovery;

pub use guard::AuthGuardChecker;
pub use monitor::{AuthFailure, AuthFailureMonitor};
pub use once_cache::OnceCache;
pub use recovery::{RecoveryDriver, StepExecutor};
