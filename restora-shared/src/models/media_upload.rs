/// Uploaded media
///
/// One row per distinct file per user. `(user_id, sha256)` is unique so the
/// same bytes uploaded twice resolve to the existing row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MediaUpload {
    pub id: Uuid,
    pub user_id: Uuid,

    /// Key inside the storage bucket: `<user_id>/<sha256>.<ext>`
    pub object_key: String,

    pub public_url: String,

    /// Client supplied file name, sanitized
    pub file_name: String,

    pub content_type: String,
    pub size_bytes: i64,

    /// Hex SHA-256 of the content
    pub sha256: String,

    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateMediaUpload {
    pub user_id: Uuid,
    pub object_key: String,
    pub public_url: String,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub sha256: String,
}

const UPLOAD_COLUMNS: &str =
    "id, user_id, object_key, public_url, file_name, content_type, size_bytes, sha256, created_at";

impl MediaUpload {
    /// Inserts an upload
    ///
    /// Returns `None` if the user already has an upload with the same hash. The
    /// existing row is left untouched.
    pub async fn create(pool: &PgPool, data: CreateMediaUpload) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            r#"
            INSERT INTO media_uploads
                (user_id, object_key, public_url, file_name, content_type, size_bytes, sha256)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT ON CONSTRAINT media_uploads_user_sha256_unique DO NOTHING
            RETURNING {}
            "#,
            UPLOAD_COLUMNS
        );

        sqlx::query_as::<_, MediaUpload>(&query)
            .bind(data.user_id)
            .bind(data.object_key)
            .bind(data.public_url)
            .bind(data.file_name)
            .bind(data.content_type)
            .bind(data.size_bytes)
            .bind(data.sha256)
            .fetch_optional(pool)
            .await
    }

    /// Finds a user's upload by content hash
    pub async fn find_by_hash(
        pool: &PgPool,
        user_id: Uuid,
        sha256: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!(
            "SELECT {} FROM media_uploads WHERE user_id = $1 AND sha256 = $2",
            UPLOAD_COLUMNS
        );

        sqlx::query_as::<_, MediaUpload>(&query)
            .bind(user_id)
            .bind(sha256)
            .fetch_optional(pool)
            .await
    }

    /// Lists a user's uploads, newest first
    pub async fn list_by_user(
        pool: &PgPool,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            r#"
            SELECT {} FROM media_uploads
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
            UPLOAD_COLUMNS
        );

        sqlx::query_as::<_, MediaUpload>(&query)
            .bind(user_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }
}
