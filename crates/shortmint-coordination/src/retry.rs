use crate::coordinator::Coordinator;
use crate::error::{CoordinationError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};
use typed_builder::TypedBuilder;

pub const DEFAULT_ATTEMPTS: u32 = 3;
pub const DEFAULT_DELAY: Duration = Duration::from_millis(100);

/// Bounded retry with a fixed delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TypedBuilder)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    #[builder(default = DEFAULT_ATTEMPTS)]
    pub attempts: u32,
    /// Pause between two attempts.
    #[builder(default = DEFAULT_DELAY)]
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Runs `f` until it succeeds, fails with a non-retryable error, or the
    /// attempts are used up. The last error is returned.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(operation, attempt, error = %e, "transient coordination failure, retrying");
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Deletes `path`, treating an already missing node as success.
///
/// Any other failure is retried until `policy.attempts` calls have been made;
/// the last error is then returned.
pub async fn remove_node_with_retry(
    coordinator: &Coordinator,
    path: &str,
    policy: RetryPolicy,
) -> Result<()> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match coordinator.delete(path).await {
            Ok(()) => {
                debug!(path = %path, "node removed");
                return Ok(());
            }
            Err(CoordinationError::NodeNotFound(_)) => {
                warn!(path = %path, "node does not exist, skipping deletion");
                return Ok(());
            }
            Err(e) if attempt < attempts => {
                warn!(path = %path, attempt, error = %e, "retrying node removal");
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
