/// Job runner
///
/// The orchestrator claims generation jobs, polls the vendor for each one
/// until it reaches a terminal state, and resolves the job through the
/// [`GenerationQueue`].
///
/// # Architecture
///
/// ```text
/// Orchestrator::run
///   ├─> GenerationQueue::claim      (bounded by free job slots)
///   └─> run_job (one tokio task per job)
///         ├─> TimeoutEnforcer       (per-job deadline)
///         ├─> lease renewal ticker
///         ├─> await_vendor          (poll until terminal)
///         └─> GenerationQueue::complete / fail / release
/// ```
///
/// Poll errors the vendor marks retryable are retried on the next tick;
/// anything else fails the job. On shutdown, jobs still waiting are released
/// back to `pending` for the next runner.

use crate::queue::GenerationQueue;
use crate::timeout::TimeoutEnforcer;
use restora_shared::models::generation::GenerationRecord;
use restora_shared::vendor::{ImageVendor, VendorTaskStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Runner settings
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Delay between vendor polls for one job
    pub poll_interval: Duration,

    /// Delay between claim attempts when the queue is empty
    pub claim_interval: Duration,

    /// Jobs polled concurrently by this runner
    pub max_concurrent_jobs: usize,

    /// Per-job deadline
    pub job_timeout: Duration,

    /// How long shutdown waits for in-flight jobs to hand back their claims
    pub shutdown_grace: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            poll_interval: Duration::from_millis(3000),
            claim_interval: Duration::from_secs(1),
            max_concurrent_jobs: 10,
            job_timeout: crate::timeout::DEFAULT_TIMEOUT,
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

/// How waiting on a vendor task ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { result_url: String },
    Failed { message: String },
    TimedOut,

    /// Runner is shutting down; the job was not resolved
    Interrupted,
}

/// Polls `task_id` until it is terminal, the deadline fires or shutdown starts
pub async fn await_vendor(
    vendor: &dyn ImageVendor,
    task_id: &str,
    poll_interval: Duration,
    deadline: &CancellationToken,
    shutdown: &CancellationToken,
) -> JobOutcome {
    loop {
        let polled = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return JobOutcome::Interrupted,
            _ = deadline.cancelled() => return JobOutcome::TimedOut,
            polled = vendor.poll(task_id) => polled,
        };

        match polled {
            Ok(VendorTaskStatus::Succeeded { result_url }) => {
                return JobOutcome::Completed { result_url };
            }
            Ok(VendorTaskStatus::Failed { message }) => {
                return JobOutcome::Failed { message };
            }
            Ok(VendorTaskStatus::InProgress) => {}
            Err(e) if e.is_retryable() => {
                tracing::warn!(task_id = %task_id, error = %e, "Vendor poll failed, will retry");
            }
            Err(e) => {
                return JobOutcome::Failed { message: e.to_string() };
            }
        }

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return JobOutcome::Interrupted,
            _ = deadline.cancelled() => return JobOutcome::TimedOut,
            _ = sleep(poll_interval) => {}
        }
    }
}

/// Claims and drives generation jobs until shutdown
pub struct Orchestrator {
    queue: GenerationQueue,
    vendor: Arc<dyn ImageVendor>,
    config: OrchestratorConfig,
    slots: Arc<Semaphore>,
    shutdown_token: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        queue: GenerationQueue,
        vendor: Arc<dyn ImageVendor>,
        config: OrchestratorConfig,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));

        Orchestrator {
            queue,
            vendor,
            config,
            slots,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Token that stops [`Orchestrator::run`] when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Runs the claim loop until the shutdown token is cancelled
    pub async fn run(&self) -> anyhow::Result<()> {
        tracing::info!(
            max_concurrent_jobs = self.config.max_concurrent_jobs,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            job_timeout_secs = self.config.job_timeout.as_secs(),
            "Job runner starting"
        );

        while !self.shutdown_token.is_cancelled() {
            let free = self.slots.available_permits();
            if free == 0 {
                if self.idle(Duration::from_millis(100)).await {
                    break;
                }
                continue;
            }

            let jobs = match self.queue.claim(free).await {
                Ok(jobs) => jobs,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to claim jobs");
                    if self.idle(self.config.claim_interval).await {
                        break;
                    }
                    continue;
                }
            };

            if jobs.is_empty() {
                if self.idle(self.config.claim_interval).await {
                    break;
                }
                continue;
            }

            for job in jobs {
                self.dispatch(job).await;
            }
        }

        self.drain().await;
        tracing::info!("Job runner stopped");
        Ok(())
    }

    /// Sleeps for `period`; returns true if shutdown started meanwhile
    async fn idle(&self, period: Duration) -> bool {
        tokio::select! {
            _ = self.shutdown_token.cancelled() => true,
            _ = sleep(period) => false,
        }
    }

    async fn dispatch(&self, job: GenerationRecord) {
        let permit = match self.slots.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                // Claimed more than we can hold; let another runner have it.
                if let Err(e) = self.queue.release(job.id).await {
                    tracing::error!(generation_id = %job.id, error = %e, "Failed to release job");
                }
                return;
            }
        };

        let context = JobContext {
            queue: self.queue.clone(),
            vendor: self.vendor.clone(),
            poll_interval: self.config.poll_interval,
            timeout: TimeoutEnforcer::new(self.config.job_timeout),
            shutdown: self.shutdown_token.clone(),
        };

        tokio::spawn(async move {
            context.run(job).await;
            drop(permit);
        });
    }

    /// Waits for in-flight jobs to finish or hand back their claims
    async fn drain(&self) {
        let total = self.config.max_concurrent_jobs.max(1) as u32;
        let in_flight = total as usize - self.slots.available_permits();
        if in_flight == 0 {
            return;
        }

        tracing::info!(count = in_flight, "Waiting for in-flight jobs");

        match tokio::time::timeout(self.config.shutdown_grace, self.slots.acquire_many(total)).await {
            Ok(_) => {}
            Err(_) => tracing::warn!(
                count = total as usize - self.slots.available_permits(),
                "Shutdown grace expired with jobs still running"
            ),
        }
    }
}

/// Everything one spawned job needs
struct JobContext {
    queue: GenerationQueue,
    vendor: Arc<dyn ImageVendor>,
    poll_interval: Duration,
    timeout: TimeoutEnforcer,
    shutdown: CancellationToken,
}

impl JobContext {
    async fn run(self, job: GenerationRecord) {
        let job_id = job.id;

        tracing::info!(
            generation_id = %job_id,
            user_id = %job.user_id,
            function_type = %job.function_type,
            vendor_task_id = %job.vendor_task_id,
            "Polling vendor task"
        );

        let deadline = CancellationToken::new();
        let timer = self.timeout.enforce(job_id, deadline.clone());
        let lease = self.spawn_lease_renewal(job_id);

        let outcome = await_vendor(
            self.vendor.as_ref(),
            &job.vendor_task_id,
            self.poll_interval,
            &deadline,
            &self.shutdown,
        )
        .await;

        timer.abort();
        lease.abort();

        let resolved = match outcome {
            JobOutcome::Completed { result_url } => self.queue.complete(job_id, &result_url).await,
            JobOutcome::Failed { message } => self.queue.fail(job_id, &message).await,
            JobOutcome::TimedOut => {
                let message = format!(
                    "Timed out after {} seconds waiting for the image service",
                    self.timeout.timeout().as_secs()
                );
                self.queue.fail(job_id, &message).await
            }
            JobOutcome::Interrupted => {
                if let Err(e) = self.queue.release(job_id).await {
                    tracing::error!(generation_id = %job_id, error = %e, "Failed to release job");
                } else {
                    tracing::info!(generation_id = %job_id, "Released job for shutdown");
                }
                return;
            }
        };

        // A failed write leaves the row `processing`; the lease expires and
        // the job is picked up again.
        if let Err(e) = resolved {
            tracing::error!(generation_id = %job_id, error = %e, "Failed to resolve job");
        }
    }

    fn spawn_lease_renewal(&self, job_id: uuid::Uuid) -> tokio::task::JoinHandle<()> {
        let queue = self.queue.clone();
        let period = Duration::from_secs((queue.lease_secs().max(2) / 2) as u64);

        tokio::spawn(async move {
            loop {
                sleep(period).await;
                match queue.renew_lease(job_id).await {
                    Ok(true) => tracing::debug!(generation_id = %job_id, "Renewed job lease"),
                    Ok(false) => return,
                    Err(e) => tracing::warn!(generation_id = %job_id, error = %e, "Failed to renew lease"),
                }
            }
        })
    }
}
