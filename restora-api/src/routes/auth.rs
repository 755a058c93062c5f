/// Authentication endpoints
///
/// - `POST /v1/auth/register` - Create an account, grant the signup bonus
/// - `POST /v1/auth/login` - Exchange credentials for tokens
/// - `POST /v1/auth/refresh` - Exchange a refresh token for an access token
/// - `POST /v1/auth/logout` - Clear the session cookie
///
/// Token responses also set the `access_token` cookie (HttpOnly) so browser
/// sessions can skip the Authorization header.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{AppendHeaders, IntoResponse},
    Json,
};
use restora_shared::{
    auth::{jwt, middleware::ACCESS_TOKEN_COOKIE, password},
    credits,
    models::user::{normalize_email, CreateUser, User},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Register request
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    /// Checked for strength separately
    #[validate(length(min = 8, max = 128, message = "Password must be 8-128 characters"))]
    pub password: String,

    #[validate(length(max = 100, message = "Name must be at most 100 characters"))]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    pub password: String,
}

/// Register and login response
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub user_id: Uuid,

    /// Access token (24h)
    pub access_token: String,

    /// Refresh token (30d)
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub access_token: String,
}

/// Register a new user
///
/// ```text
/// POST /v1/auth/register
/// { "email": "user@example.com", "password": "correct-horse-1", "name": "Ada" }
/// ```
///
/// The user, the credit balance and the signup bonus are written in one
/// transaction.
///
/// # Errors
///
/// - `409 Conflict`: Email already registered
/// - `422 Unprocessable Entity`: Validation failed
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()?;

    password::validate_password_strength(&req.password)
        .map_err(|message| ApiError::invalid_field("password", message))?;

    let password_hash = password::hash_password(&req.password)?;
    let name = req
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());

    let mut tx = state.db.begin().await?;

    let user = User::create(
        &mut tx,
        CreateUser {
            email: normalize_email(&req.email),
            password_hash,
            name,
        },
    )
    .await?;

    credits::grant_signup_bonus(&mut tx, user.id, state.config.credits.signup_bonus).await?;

    tx.commit().await?;

    tracing::info!(user_id = %user.id, bonus = state.config.credits.signup_bonus, "User registered");

    let tokens = issue_tokens(&state, user.id)?;
    let cookie = session_cookie(&state, &tokens.access_token)?;

    Ok((StatusCode::CREATED, AppendHeaders([(header::SET_COOKIE, cookie)]), Json(tokens)))
}

/// Log in with email and password
///
/// # Errors
///
/// - `401 Unauthorized`: Unknown email or wrong password (same message for both)
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    req.validate()?;

    let invalid = || ApiError::Unauthorized("Invalid email or password".to_string());

    let user = User::find_by_email(&state.db, &req.email)
        .await?
        .ok_or_else(invalid)?;

    if !password::verify_password(&req.password, &user.password_hash)? {
        tracing::info!(user_id = %user.id, "Login rejected: wrong password");
        return Err(invalid());
    }

    User::update_last_login(&state.db, user.id).await?;

    let tokens = issue_tokens(&state, user.id)?;
    let cookie = session_cookie(&state, &tokens.access_token)?;

    Ok((AppendHeaders([(header::SET_COOKIE, cookie)]), Json(tokens)))
}

/// Exchange a refresh token for a new access token
///
/// # Errors
///
/// - `401 Unauthorized`: Invalid or expired refresh token
pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> ApiResult<impl IntoResponse> {
    let access_token = jwt::refresh_access_token(&req.refresh_token, state.jwt_secret())?;
    let cookie = session_cookie(&state, &access_token)?;

    Ok((
        AppendHeaders([(header::SET_COOKIE, cookie)]),
        Json(RefreshResponse { access_token }),
    ))
}

/// Clear the session cookie
///
/// Tokens are stateless, so this only affects the browser.
pub async fn logout(State(state): State<AppState>) -> impl IntoResponse {
    let secure = if state.config.api.production { "; Secure" } else { "" };
    let cleared = format!(
        "{}=; HttpOnly; Path=/; SameSite=Lax; Max-Age=0{}",
        ACCESS_TOKEN_COOKIE, secure
    );

    match HeaderValue::from_str(&cleared) {
        Ok(value) => (StatusCode::NO_CONTENT, AppendHeaders([(header::SET_COOKIE, value)])).into_response(),
        Err(_) => StatusCode::NO_CONTENT.into_response(),
    }
}

fn issue_tokens(state: &AppState, user_id: Uuid) -> ApiResult<TokenResponse> {
    let access_token = jwt::create_token(
        &jwt::Claims::new(user_id, jwt::TokenType::Access),
        state.jwt_secret(),
    )?;
    let refresh_token = jwt::create_token(
        &jwt::Claims::new(user_id, jwt::TokenType::Refresh),
        state.jwt_secret(),
    )?;

    Ok(TokenResponse {
        user_id,
        access_token,
        refresh_token,
    })
}

fn session_cookie(state: &AppState, access_token: &str) -> ApiResult<HeaderValue> {
    let max_age = jwt::TokenType::Access.default_expiration().num_seconds();
    let secure = if state.config.api.production { "; Secure" } else { "" };

    HeaderValue::from_str(&format!(
        "{}={}; HttpOnly; Path=/; SameSite=Lax; Max-Age={}{}",
        ACCESS_TOKEN_COOKIE, access_token, max_age, secure
    ))
    .map_err(|e| ApiError::InternalError(format!("Invalid session cookie: {}", e)))
}
