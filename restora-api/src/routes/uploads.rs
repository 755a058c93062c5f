/// Upload endpoints
///
/// - `POST /v1/uploads` - Multipart upload, field `file`
/// - `GET /v1/uploads` - Caller's uploads, newest first
///
/// Type and size are checked on the received bytes before anything reaches
/// storage. Uploading the same bytes again returns the existing record.

use super::Pagination;
use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{multipart::MultipartError, Multipart, Query, State},
    http::StatusCode,
    Json,
};
use restora_shared::{
    auth::middleware::AuthContext,
    models::media_upload::MediaUpload,
    uploads::{self, StoredUpload},
};
use serde::Serialize;

/// Multipart field holding the file
const FILE_FIELD: &str = "file";

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    #[serde(flatten)]
    pub upload: MediaUpload,

    /// False when this file was uploaded before
    pub created: bool,
}

#[derive(Debug, Serialize)]
pub struct UploadsResponse {
    pub uploads: Vec<MediaUpload>,
    pub limit: i64,
    pub offset: i64,
}

/// Upload an image
///
/// ```text
/// POST /v1/uploads
/// Content-Type: multipart/form-data; boundary=...
/// ```
///
/// # Response
///
/// `201 Created` for a new file, `200 OK` for a duplicate.
///
/// # Errors
///
/// - `400 Bad Request`: Empty file or malformed multipart body
/// - `422 Unprocessable Entity`: No `file` field
/// - `413 Payload Too Large`: Over the configured limit
/// - `415 Unsupported Media Type`: Not a JPEG, PNG or WebP image
pub async fn upload(
    State(state): State<AppState>,
    auth: AuthContext,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let file_name = field.file_name().unwrap_or("upload").to_string();
        let data = field.bytes().await.map_err(multipart_error)?;

        let StoredUpload { record, created } = uploads::store_upload(
            &state.db,
            state.storage.as_ref(),
            auth.user_id,
            &file_name,
            data,
            state.config.uploads.max_bytes,
        )
        .await?;

        if created {
            tracing::info!(
                user_id = %auth.user_id,
                upload_id = %record.id,
                size_bytes = record.size_bytes,
                "Upload stored"
            );
        }

        let status = if created { StatusCode::CREATED } else { StatusCode::OK };
        return Ok((status, Json(UploadResponse { upload: record, created })));
    }

    Err(ApiError::invalid_field(FILE_FIELD, "A file is required"))
}

pub async fn list_uploads(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(page): Query<Pagination>,
) -> ApiResult<Json<UploadsResponse>> {
    let (limit, offset) = (page.limit(), page.offset());
    let uploads = MediaUpload::list_by_user(&state.db, auth.user_id, limit, offset).await?;

    Ok(Json(UploadsResponse {
        uploads,
        limit,
        offset,
    }))
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge("File exceeds the upload limit".to_string())
    } else {
        ApiError::BadRequest(format!("Invalid multipart body: {}", err.body_text()))
    }
}
