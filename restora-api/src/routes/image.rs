/// Image job submission
///
/// `POST /api/image/process` charges credits, submits the task to the image
/// vendor and records it as `pending`. A job runner picks the record up and
/// resolves it; clients follow along on `/v1/generations/:id/events`.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{extract::State, http::StatusCode, Json};
use restora_shared::{
    auth::middleware::AuthContext,
    credits,
    models::generation::{CreateGeneration, GenerationRecord, GenerationStatus},
    vendor::{FunctionType, SubmitTask},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRequest {
    pub function_type: String,

    #[validate(
        url(message = "imageUrl must be a valid URL"),
        length(max = 2048, message = "imageUrl must be at most 2048 characters")
    )]
    pub image_url: String,

    #[validate(length(max = 800, message = "Prompt must be at most 800 characters"))]
    pub prompt: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProcessResponse {
    /// Generation record id
    pub id: Uuid,

    /// Vendor task id
    pub task_id: String,

    pub status: GenerationStatus,
}

/// Submit an image job
///
/// ```text
/// POST /api/image/process
/// { "functionType": "colorization", "imageUrl": "https://...", "prompt": "" }
/// ```
///
/// # Response
///
/// `202 Accepted` with `{ "id", "task_id", "status": "pending" }`.
///
/// Credits are debited before the vendor is called and refunded if the
/// submission or the insert fails.
///
/// # Errors
///
/// - `402 Payment Required`: Not enough credits (vendor not called)
/// - `422 Unprocessable Entity`: Unknown function type, bad URL, missing prompt
/// - `429 Too Many Requests`: Submission rate limit hit
/// - `503 Service Unavailable`: Vendor temporarily unavailable
pub async fn process(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<ProcessRequest>,
) -> ApiResult<(StatusCode, Json<ProcessResponse>)> {
    req.validate()?;

    let function: FunctionType = req
        .function_type
        .parse()
        .map_err(|message: String| ApiError::invalid_field("functionType", message))?;

    let prompt = function
        .resolve_prompt(req.prompt.as_deref())
        .ok_or_else(|| ApiError::invalid_field("prompt", "prompt is required"))?;

    let id = Uuid::new_v4();
    let cost = state.config.credits.per_image;

    let mut tx = state.db.begin().await?;
    credits::debit_usage(&mut tx, auth.user_id, id, cost).await?;
    tx.commit().await?;

    let task = SubmitTask {
        function,
        prompt: prompt.clone(),
        image_url: req.image_url.clone(),
    };

    let vendor_task_id = match state.vendor.submit(&task).await {
        Ok(task_id) => task_id,
        Err(e) => {
            tracing::warn!(generation_id = %id, error = %e, "Vendor submission failed");
            refund(&state, auth.user_id, id, cost).await;
            return Err(e.into());
        }
    };

    let created = GenerationRecord::create(
        &state.db,
        CreateGeneration {
            id,
            user_id: auth.user_id,
            function_type: function,
            input_image_url: req.image_url,
            prompt,
            vendor_task_id,
            credits_charged: cost,
        },
    )
    .await;

    let record = match created {
        Ok(record) => record,
        Err(e) => {
            // The vendor task is orphaned; it cannot be cancelled.
            tracing::error!(generation_id = %id, error = %e, "Failed to record generation");
            refund(&state, auth.user_id, id, cost).await;
            return Err(e.into());
        }
    };

    tracing::info!(
        generation_id = %record.id,
        user_id = %auth.user_id,
        function = %function,
        vendor_task_id = %record.vendor_task_id,
        "Generation submitted"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(ProcessResponse {
            id: record.id,
            task_id: record.vendor_task_id,
            status: record.status,
        }),
    ))
}

async fn refund(state: &AppState, user_id: Uuid, generation_id: Uuid, amount: i64) {
    let result = async {
        let mut tx = state.db.begin().await?;
        credits::refund_usage(&mut tx, user_id, generation_id, amount).await?;
        tx.commit().await?;
        Ok::<_, credits::CreditError>(())
    }
    .await;

    if let Err(e) = result {
        tracing::error!(
            generation_id = %generation_id,
            user_id = %user_id,
            error = %e,
            "Failed to refund credits"
        );
    }
}
