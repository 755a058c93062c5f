/// Upload validation and persistence
///
/// An upload is checked before anything touches storage: it must be non-empty,
/// within the size limit, and its bytes must be a JPEG, PNG or WebP image. The
/// declared content type is ignored in favour of the sniffed one.
///
/// Objects are keyed by content, `<user_id>/<sha256>.<ext>`, so uploading the
/// same file twice resolves to the existing record and writes nothing.
///
/// # Example
///
/// ```no_run
/// use restora_shared::storage::local::LocalStorage;
/// use restora_shared::uploads::store_upload;
/// use sqlx::PgPool;
/// use uuid::Uuid;
///
/// # async fn example(pool: PgPool, user_id: Uuid, bytes: bytes::Bytes) -> Result<(), Box<dyn std::error::Error>> {
/// let storage = LocalStorage::new("./media", "http://localhost:8080/media");
/// let stored = store_upload(&pool, &storage, user_id, "grandma.jpg", bytes, 10 * 1024 * 1024).await?;
/// println!("{} (new: {})", stored.record.public_url, stored.created);
/// # Ok(())
/// # }
/// ```

use bytes::Bytes;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::media_upload::{CreateMediaUpload, MediaUpload};
use crate::storage::{StorageBackend, StorageError};

/// Default size limit (10 MiB)
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

const MAX_FILE_NAME_LEN: usize = 255;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("File is empty")]
    Empty,

    #[error("File is too large: {size} bytes (limit {max} bytes)")]
    TooLarge { size: usize, max: usize },

    #[error("Unsupported file type; expected JPEG, PNG or WebP")]
    UnsupportedType,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Image formats accepted for upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Webp,
}

impl ImageKind {
    /// Detects the format from magic bytes
    pub fn sniff(data: &[u8]) -> Option<Self> {
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(ImageKind::Jpeg)
        } else if data.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            Some(ImageKind::Png)
        } else if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
            Some(ImageKind::Webp)
        } else {
            None
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageKind::Jpeg => "image/jpeg",
            ImageKind::Png => "image/png",
            ImageKind::Webp => "image/webp",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageKind::Jpeg => "jpg",
            ImageKind::Png => "png",
            ImageKind::Webp => "webp",
        }
    }
}

/// Result of validating an upload's bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedUpload {
    pub kind: ImageKind,
    pub size: usize,

    /// Lowercase hex SHA-256
    pub sha256: String,
}

/// Checks size and type without side effects
pub fn validate_upload(data: &[u8], max_bytes: usize) -> Result<ValidatedUpload, UploadError> {
    if data.is_empty() {
        return Err(UploadError::Empty);
    }

    if data.len() > max_bytes {
        return Err(UploadError::TooLarge {
            size: data.len(),
            max: max_bytes,
        });
    }

    let kind = ImageKind::sniff(data).ok_or(UploadError::UnsupportedType)?;

    Ok(ValidatedUpload {
        kind,
        size: data.len(),
        sha256: hex::encode(Sha256::digest(data)),
    })
}

/// Storage key for a user's file: `<user_id>/<sha256>.<ext>`
pub fn object_key(user_id: Uuid, upload: &ValidatedUpload) -> String {
    format!("{}/{}.{}", user_id, upload.sha256, upload.kind.extension())
}

/// Strips path components and control characters from a client file name
pub fn sanitize_file_name(name: &str, fallback_ext: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_FILE_NAME_LEN)
        .collect();
    let cleaned = cleaned.trim();

    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        format!("upload.{}", fallback_ext)
    } else {
        cleaned.to_string()
    }
}

/// Outcome of [`store_upload`]
#[derive(Debug, Clone)]
pub struct StoredUpload {
    pub record: MediaUpload,

    /// False when the same file was already uploaded by this user
    pub created: bool,
}

/// Validates, stores and records an upload
///
/// Either returns a persisted record whose object exists in storage, or an
/// error with no new record. If the row insert fails after the object was
/// written, the object is deleted again unless another record owns it
/// (see [`release_object`]).
pub async fn store_upload(
    pool: &PgPool,
    storage: &dyn StorageBackend,
    user_id: Uuid,
    file_name: &str,
    data: Bytes,
    max_bytes: usize,
) -> Result<StoredUpload, UploadError> {
    let validated = validate_upload(&data, max_bytes)?;

    if let Some(existing) = MediaUpload::find_by_hash(pool, user_id, &validated.sha256).await? {
        tracing::debug!(
            user_id = %user_id,
            upload_id = %existing.id,
            "Duplicate upload, returning existing record"
        );
        return Ok(StoredUpload {
            record: existing,
            created: false,
        });
    }

    let key = object_key(user_id, &validated);
    let public_url = storage.public_url(&key);

    storage.put(&key, data, validated.kind.mime_type()).await?;

    let inserted = MediaUpload::create(
        pool,
        CreateMediaUpload {
            user_id,
            object_key: key.clone(),
            public_url,
            file_name: sanitize_file_name(file_name, validated.kind.extension()),
            content_type: validated.kind.mime_type().to_string(),
            size_bytes: validated.size as i64,
            sha256: validated.sha256.clone(),
        },
    )
    .await;

    match inserted {
        Ok(Some(record)) => {
            tracing::info!(
                user_id = %user_id,
                upload_id = %record.id,
                size = validated.size,
                "Stored upload"
            );
            Ok(StoredUpload {
                record,
                created: true,
            })
        }
        // Lost a race with a concurrent upload of the same file. The object
        // key is the same, so the stored object belongs to the winner.
        Ok(None) => {
            let record = MediaUpload::find_by_hash(pool, user_id, &validated.sha256)
                .await?
                .ok_or(sqlx::Error::RowNotFound)?;
            Ok(StoredUpload {
                record,
                created: false,
            })
        }
        Err(e) => match release_object(pool, storage, user_id, &validated.sha256, &key).await {
            Some(record) => {
                tracing::warn!(
                    user_id = %user_id,
                    upload_id = %record.id,
                    error = %e,
                    "Upload insert failed but a concurrent upload recorded the same file"
                );
                Ok(StoredUpload {
                    record,
                    created: false,
                })
            }
            None => Err(e.into()),
        },
    }
}

/// Deletes `key` after its row insert failed, unless a record owns it
///
/// Keys are content addressed, so a concurrent upload of the same file may
/// have committed a row pointing at the same object. That record is returned
/// and the object kept. If the lookup itself fails the object is kept too.
pub async fn release_object(
    pool: &PgPool,
    storage: &dyn StorageBackend,
    user_id: Uuid,
    sha256: &str,
    key: &str,
) -> Option<MediaUpload> {
    match MediaUpload::find_by_hash(pool, user_id, sha256).await {
        Ok(Some(record)) => return Some(record),
        Ok(None) => {}
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Could not check object ownership, keeping it");
            return None;
        }
    }

    if let Err(e) = storage.delete(key).await {
        tracing::warn!(key = %key, error = %e, "Failed to remove orphaned object");
    }
    None
}
