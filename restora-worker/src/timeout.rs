/// Per-job deadline
///
/// Vendor tasks cannot be cancelled, so a deadline does not stop the remote
/// work. It only stops this runner from waiting: when the timer fires the
/// job's deadline token is cancelled and the poll loop resolves the job as
/// failed.
///
/// # Example
///
/// ```no_run
/// use restora_worker::timeout::TimeoutEnforcer;
/// use std::time::Duration;
/// use tokio_util::sync::CancellationToken;
/// use uuid::Uuid;
///
/// # async fn example() {
/// let deadline = CancellationToken::new();
/// let timer = TimeoutEnforcer::new(Duration::from_secs(300)).enforce(Uuid::new_v4(), deadline.clone());
///
/// // Poll the vendor until `deadline` is cancelled...
///
/// timer.abort();
/// # }
/// ```

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Default job timeout (5 minutes)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Minimum allowed job timeout
pub const MIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum allowed job timeout (1 hour)
pub const MAX_TIMEOUT: Duration = Duration::from_secs(3600);

/// Cancels a job's deadline token once its timeout elapses
#[derive(Debug, Clone, Copy)]
pub struct TimeoutEnforcer {
    timeout: Duration,
}

impl TimeoutEnforcer {
    pub fn new(timeout: Duration) -> Self {
        TimeoutEnforcer { timeout }
    }

    /// Builds an enforcer from a configured number of seconds
    ///
    /// `None` means the default; other values are clamped to
    /// [`MIN_TIMEOUT`]..=[`MAX_TIMEOUT`].
    pub fn from_secs(timeout_secs: Option<u64>) -> Self {
        let timeout = match timeout_secs {
            Some(secs) => Duration::from_secs(secs).clamp(MIN_TIMEOUT, MAX_TIMEOUT),
            None => DEFAULT_TIMEOUT,
        };

        TimeoutEnforcer::new(timeout)
    }

    /// Spawns the timer for one job
    ///
    /// Abort the returned handle when the job finishes first.
    pub fn enforce(&self, job_id: Uuid, deadline: CancellationToken) -> JoinHandle<()> {
        let timeout = self.timeout;

        tokio::spawn(async move {
            tokio::select! {
                _ = deadline.cancelled() => {}
                _ = sleep(timeout) => {
                    tracing::warn!(
                        generation_id = %job_id,
                        timeout_secs = timeout.as_secs(),
                        "Job timeout reached"
                    );
                    deadline.cancel();
                }
            }
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for TimeoutEnforcer {
    fn default() -> Self {
        TimeoutEnforcer::new(DEFAULT_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_secs_default() {
        assert_eq!(TimeoutEnforcer::from_secs(None).timeout(), DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_from_secs_valid() {
        assert_eq!(TimeoutEnforcer::from_secs(Some(600)).timeout(), Duration::from_secs(600));
    }

    #[test]
    fn test_from_secs_clamped() {
        assert_eq!(TimeoutEnforcer::from_secs(Some(0)).timeout(), MIN_TIMEOUT);
        assert_eq!(TimeoutEnforcer::from_secs(Some(100_000)).timeout(), MAX_TIMEOUT);
    }

    #[tokio::test]
    async fn test_enforce_cancels_after_timeout() {
        let enforcer = TimeoutEnforcer::new(Duration::from_millis(50));
        let deadline = CancellationToken::new();

        let timer = enforcer.enforce(Uuid::new_v4(), deadline.clone());
        assert!(!deadline.is_cancelled());

        tokio::time::timeout(Duration::from_secs(2), deadline.cancelled())
            .await
            .expect("deadline should fire");

        timer.await.unwrap();
    }

    #[tokio::test]
    async fn test_enforce_exits_when_job_finishes_first() {
        let enforcer = TimeoutEnforcer::new(Duration::from_secs(60));
        let deadline = CancellationToken::new();

        let timer = enforcer.enforce(Uuid::new_v4(), deadline.clone());
        deadline.cancel();

        tokio::time::timeout(Duration::from_secs(2), timer)
            .await
            .expect("timer should exit")
            .unwrap();
    }
}
