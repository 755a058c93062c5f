/// Generation job queue
///
/// The queue is the `generation_records` table itself. Runners claim rows
/// with `FOR UPDATE SKIP LOCKED` and resolve them in a transaction that also
/// writes the refund (for failures) and the `NOTIFY` for subscribers, so a
/// job's outcome, its credits and its notification commit together.
///
/// # Example
///
/// ```no_run
/// use restora_worker::queue::GenerationQueue;
/// use sqlx::PgPool;
///
/// # async fn example(pool: PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let queue = GenerationQueue::new(pool, 600);
///
/// for job in queue.claim(5).await? {
///     println!("Claimed generation {}", job.id);
/// }
/// # Ok(())
/// # }
/// ```

use restora_shared::credits::{self, CreditError};
use restora_shared::models::generation::{truncate_error_message, GenerationRecord};
use restora_shared::notify::{self, GenerationUpdate};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

/// Queue error
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Refund could not be written
    #[error("Credit ledger error: {0}")]
    Credits(#[from] CreditError),
}

/// Result of resolving a job
#[derive(Debug, Clone)]
pub enum Resolution {
    /// This call moved the job to a terminal state
    Resolved(GenerationRecord),

    /// Someone else resolved it first; nothing was written
    AlreadyResolved,
}

impl Resolution {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Resolution::Resolved(_))
    }
}

/// Claims and resolves generation jobs
#[derive(Debug, Clone)]
pub struct GenerationQueue {
    db: PgPool,

    /// Seconds after which a `processing` claim is considered abandoned
    lease_secs: i64,
}

impl GenerationQueue {
    pub fn new(db: PgPool, lease_secs: i64) -> Self {
        GenerationQueue { db, lease_secs }
    }

    pub fn lease_secs(&self) -> i64 {
        self.lease_secs
    }

    /// Claims up to `limit` jobs and announces them as `processing`
    pub async fn claim(&self, limit: usize) -> Result<Vec<GenerationRecord>, QueueError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let jobs = GenerationRecord::claim_batch(&self.db, limit as i64, self.lease_secs).await?;

        if !jobs.is_empty() {
            tracing::info!(count = jobs.len(), "Claimed generation jobs");

            let mut conn = self.db.acquire().await?;
            for job in &jobs {
                if let Err(e) = notify::publish(&mut conn, &GenerationUpdate::from(job)).await {
                    tracing::warn!(generation_id = %job.id, error = %e, "Failed to publish claim");
                }
            }
        }

        Ok(jobs)
    }

    /// Resolves a job as `completed`
    pub async fn complete(&self, job_id: Uuid, result_url: &str) -> Result<Resolution, QueueError> {
        let mut tx = self.db.begin().await?;

        let Some(record) = GenerationRecord::mark_completed(&mut tx, job_id, result_url).await? else {
            tx.rollback().await?;
            tracing::debug!(generation_id = %job_id, "Job already resolved, skipping completion");
            return Ok(Resolution::AlreadyResolved);
        };

        notify::publish(&mut tx, &GenerationUpdate::from(&record)).await?;
        tx.commit().await?;

        tracing::info!(generation_id = %job_id, user_id = %record.user_id, "Generation completed");
        Ok(Resolution::Resolved(record))
    }

    /// Resolves a job as `failed` and refunds its credits
    ///
    /// The refund is keyed by the generation id, so it is written at most
    /// once even if the API already refunded a failed submission.
    pub async fn fail(&self, job_id: Uuid, error_message: &str) -> Result<Resolution, QueueError> {
        let mut tx = self.db.begin().await?;

        let Some(record) = GenerationRecord::mark_failed(&mut tx, job_id, error_message).await? else {
            tx.rollback().await?;
            tracing::debug!(generation_id = %job_id, "Job already resolved, skipping failure");
            return Ok(Resolution::AlreadyResolved);
        };

        if record.credits_charged > 0 {
            credits::refund_usage(&mut tx, record.user_id, record.id, record.credits_charged).await?;
        }

        notify::publish(&mut tx, &GenerationUpdate::from(&record)).await?;
        tx.commit().await?;

        tracing::warn!(
            generation_id = %job_id,
            user_id = %record.user_id,
            refunded = record.credits_charged,
            error = %truncate_error_message(error_message),
            "Generation failed"
        );
        Ok(Resolution::Resolved(record))
    }

    /// Hands a claimed job back so another runner can pick it up immediately
    pub async fn release(&self, job_id: Uuid) -> Result<bool, QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE generation_records
            SET status = 'pending', claimed_at = NULL, updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(job_id)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Extends the claim on a job still being polled
    pub async fn renew_lease(&self, job_id: Uuid) -> Result<bool, QueueError> {
        Ok(GenerationRecord::renew_lease(&self.db, job_id).await?)
    }

    /// Jobs waiting for or held by a runner
    pub async fn active_count(&self) -> Result<i64, QueueError> {
        Ok(GenerationRecord::count_active(&self.db).await?)
    }
}
