/// Generation records: one per image job
///
/// # Lifecycle
///
/// ```text
/// pending ──claim──> processing ──resolve──> completed
///                        │                 └> failed
///                        └─lease expires─> (claimable again)
/// ```
///
/// The API inserts the row as `pending` once the vendor accepted the task. A
/// job runner claims it with `FOR UPDATE SKIP LOCKED`, so two runners never
/// work the same row, and resolves it exactly once: the resolve queries only
/// match non-terminal rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::vendor::FunctionType;

/// Job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl GenerationStatus {
    /// Terminal states never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, GenerationStatus::Completed | GenerationStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationStatus::Pending => "pending",
            GenerationStatus::Processing => "processing",
            GenerationStatus::Completed => "completed",
            GenerationStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct GenerationRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub function_type: FunctionType,
    pub input_image_url: String,
    pub prompt: String,

    /// Task id returned by the vendor on submission
    pub vendor_task_id: String,

    pub status: GenerationStatus,
    pub result_url: Option<String>,
    pub error_message: Option<String>,
    pub credits_charged: i64,

    /// Lease start, set when a runner claims the row
    #[serde(skip_serializing)]
    pub claimed_at: Option<DateTime<Utc>>,

    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for inserting a record
///
/// The id is chosen by the caller so credits can be debited under
/// `usage:<id>` before the vendor is called.
#[derive(Debug, Clone)]
pub struct CreateGeneration {
    pub id: Uuid,
    pub user_id: Uuid,
    pub function_type: FunctionType,
    pub input_image_url: String,
    pub prompt: String,
    pub vendor_task_id: String,
    pub credits_charged: i64,
}

const GENERATION_COLUMNS: &str = "id, user_id, function_type, input_image_url, prompt, \
                                  vendor_task_id, status, result_url, error_message, \
                                  credits_charged, claimed_at, completed_at, created_at, updated_at";

impl GenerationRecord {
    /// Inserts a `pending` record
    pub async fn create(pool: &PgPool, data: CreateGeneration) -> Result<Self, sqlx::Error> {
        let query = format!(
            r#"
            INSERT INTO generation_records
                (id, user_id, function_type, input_image_url, prompt, vendor_task_id, credits_charged)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            GENERATION_COLUMNS
        );

        sqlx::query_as::<_, GenerationRecord>(&query)
            .bind(data.id)
            .bind(data.user_id)
            .bind(data.function_type)
            .bind(data.input_image_url)
            .bind(data.prompt)
            .bind(data.vendor_task_id)
            .bind(data.credits_charged)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let query = format!("SELECT {} FROM generation_records WHERE id = $1", GENERATION_COLUMNS);

        sqlx::query_as::<_, GenerationRecord>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Finds a record owned by `user_id`
    ///
    /// Someone else's record is reported as absent.
    pub async fn find_for_user(
        pool: &PgPool,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {} FROM generation_records WHERE id = $1 AND user_id = $2",
            GENERATION_COLUMNS
        );

        sqlx::query_as::<_, GenerationRecord>(&query)
            .bind(id)
            .bind(user_id)
            .fetch_optional(pool)
            .await
    }

    /// Lists a user's records, newest first
    pub async fn list_by_user(
        pool: &PgPool,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            r#"
            SELECT {} FROM generation_records
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
            GENERATION_COLUMNS
        );

        sqlx::query_as::<_, GenerationRecord>(&query)
            .bind(user_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }

    /// Claims up to `limit` runnable records and moves them to `processing`
    ///
    /// Runnable means `pending`, or `processing` with a lease older than
    /// `lease_secs` (the runner that held it is presumed dead). Oldest first.
    pub async fn claim_batch(
        pool: &PgPool,
        limit: i64,
        lease_secs: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let query = r#"
            WITH claimable AS (
                SELECT id
                FROM generation_records
                WHERE status = 'pending'
                   OR (status = 'processing'
                       AND claimed_at < NOW() - make_interval(secs => $2))
                ORDER BY created_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE generation_records g
            SET status = 'processing', claimed_at = NOW(), updated_at = NOW()
            FROM claimable
            WHERE g.id = claimable.id
            RETURNING g.*
            "#;

        sqlx::query_as::<_, GenerationRecord>(query)
            .bind(limit)
            .bind(lease_secs as f64)
            .fetch_all(pool)
            .await
    }

    /// Extends the lease of a record still being worked on
    pub async fn renew_lease(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE generation_records
            SET claimed_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Resolves a record as `completed`
    ///
    /// Returns `None` if the record was already terminal.
    pub async fn mark_completed(
        conn: &mut PgConnection,
        id: Uuid,
        result_url: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            r#"
            UPDATE generation_records
            SET status = 'completed', result_url = $2, error_message = NULL,
                completed_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'processing')
            RETURNING {}
            "#,
            GENERATION_COLUMNS
        );

        sqlx::query_as::<_, GenerationRecord>(&query)
            .bind(id)
            .bind(result_url)
            .fetch_optional(conn)
            .await
    }

    /// Resolves a record as `failed`
    ///
    /// The message is cut to [`MAX_ERROR_MESSAGE_BYTES`]. Returns `None` if
    /// the record was already terminal.
    pub async fn mark_failed(
        conn: &mut PgConnection,
        id: Uuid,
        error_message: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            r#"
            UPDATE generation_records
            SET status = 'failed', error_message = $2,
                completed_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'processing')
            RETURNING {}
            "#,
            GENERATION_COLUMNS
        );

        sqlx::query_as::<_, GenerationRecord>(&query)
            .bind(id)
            .bind(truncate_error_message(error_message))
            .fetch_optional(conn)
            .await
    }

    /// Counts records that still need a runner
    pub async fn count_active(pool: &PgPool) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM generation_records WHERE status IN ('pending', 'processing')",
        )
        .fetch_one(pool)
        .await?;

        Ok(count)
    }
}

/// Longest error message kept on a failed record
///
/// Vendor errors can carry whole HTML pages; the message also rides in the
/// `NOTIFY` payload, which Postgres caps at 8000 bytes.
pub const MAX_ERROR_MESSAGE_BYTES: usize = 1024;

/// Cuts `message` to at most [`MAX_ERROR_MESSAGE_BYTES`] on a char boundary
pub fn truncate_error_message(message: &str) -> &str {
    if message.len() <= MAX_ERROR_MESSAGE_BYTES {
        return message;
    }

    let mut end = MAX_ERROR_MESSAGE_BYTES;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    &message[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_error_message() {
        assert_eq!(truncate_error_message("InvalidParameter"), "InvalidParameter");

        let page = "<html>".repeat(2000);
        let cut = truncate_error_message(&page);
        assert_eq!(cut.len(), MAX_ERROR_MESSAGE_BYTES);
        assert!(page.starts_with(cut));

        // 3-byte chars never split
        let wide = "\u{753b}".repeat(500);
        let cut = truncate_error_message(&wide);
        assert!(cut.len() <= MAX_ERROR_MESSAGE_BYTES);
        assert_eq!(cut.chars().count(), MAX_ERROR_MESSAGE_BYTES / 3);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!GenerationStatus::Pending.is_terminal());
        assert!(!GenerationStatus::Processing.is_terminal());
        assert!(GenerationStatus::Completed.is_terminal());
        assert!(GenerationStatus::Failed.is_terminal());
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&GenerationStatus::Processing).unwrap(),
            "\"processing\""
        );
        assert_eq!(GenerationStatus::Completed.as_str(), "completed");
    }
}
