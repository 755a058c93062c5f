/// Profile endpoints
///
/// - `GET /v1/profile` - Current user with credit balance
/// - `PATCH /v1/profile` - Update name and avatar

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{extract::State, Json};
use restora_shared::{
    auth::middleware::AuthContext,
    models::{
        credit::CreditBalance,
        user::{UpdateProfile, User},
    },
};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    #[serde(flatten)]
    pub user: User,

    pub credits: i64,

    /// Whether the billing portal is available
    pub has_billing_account: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProfileRequest {
    #[validate(length(max = 100, message = "Name must be at most 100 characters"))]
    pub name: Option<String>,

    #[validate(url(message = "Avatar must be a valid URL"))]
    pub avatar_url: Option<String>,
}

/// Get the caller's profile
///
/// # Errors
///
/// - `404 Not Found`: Account deleted after the token was issued
pub async fn get_profile(
    State(state): State<AppState>,
    auth: AuthContext,
) -> ApiResult<Json<ProfileResponse>> {
    let user = User::find_by_id(&state.db, auth.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    let credits = CreditBalance::get(&state.db, user.id).await?;

    Ok(Json(profile_response(user, credits)))
}

/// Update the caller's profile
///
/// ```text
/// PATCH /v1/profile
/// { "name": "Ada", "avatar_url": "https://cdn.example.com/a.png" }
/// ```
///
/// Omitted fields are left unchanged.
pub async fn update_profile(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<UpdateProfileRequest>,
) -> ApiResult<Json<ProfileResponse>> {
    req.validate()?;

    let changes = UpdateProfile {
        name: req.name.map(|n| n.trim().to_string()),
        avatar_url: req.avatar_url,
    };

    let user = User::update_profile(&state.db, auth.user_id, changes)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    tracing::debug!(user_id = %user.id, "Profile updated");

    let credits = CreditBalance::get(&state.db, user.id).await?;

    Ok(Json(profile_response(user, credits)))
}

fn profile_response(user: User, credits: i64) -> ProfileResponse {
    ProfileResponse {
        has_billing_account: user.stripe_customer_id.is_some(),
        user,
        credits,
    }
}
