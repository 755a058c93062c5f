/// Request authentication for axum
///
/// Browser sessions keep the access token in an `access_token` cookie while
/// API clients send `Authorization: Bearer <token>`. Both are accepted; the
/// header wins when both are present.
///
/// After successful authentication an [`AuthContext`] is stored in the request
/// extensions. Handlers take it directly as an extractor.
///
/// # Example
///
/// ```no_run
/// use axum::{extract::Request, middleware::{self, Next}, response::Response, routing::get, Router};
/// use restora_shared::auth::middleware::{authenticate, AuthContext, AuthError};
///
/// async fn require_auth(mut req: Request, next: Next) -> Result<Response, AuthError> {
///     let auth = authenticate(req.headers(), "jwt-secret")?;
///     req.extensions_mut().insert(auth);
///     Ok(next.run(req).await)
/// }
///
/// async fn whoami(auth: AuthContext) -> String {
///     auth.user_id.to_string()
/// }
///
/// let app: Router = Router::new()
///     .route("/whoami", get(whoami))
///     .layer(middleware::from_fn(require_auth));
/// ```

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::jwt::{validate_access_token, JwtError};

/// Cookie carrying the access token for browser sessions
pub const ACCESS_TOKEN_COOKIE: &str = "access_token";

/// Authenticated caller, inserted into request extensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    /// Authenticated user id
    pub user_id: Uuid,
}

impl AuthContext {
    pub fn new(user_id: Uuid) -> Self {
        Self { user_id }
    }
}

/// Error type for authentication
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Neither a Bearer header nor the session cookie was sent
    #[error("Missing credentials")]
    MissingCredentials,

    /// Authorization header present but not a Bearer token
    #[error("{0}")]
    InvalidFormat(String),

    /// Token failed validation
    #[error("{0}")]
    InvalidToken(String),
}

impl From<JwtError> for AuthError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::Expired => AuthError::InvalidToken("Token expired".to_string()),
            JwtError::InvalidIssuer => AuthError::InvalidToken("Invalid issuer".to_string()),
            other => AuthError::InvalidToken(format!("Invalid token: {}", other)),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match self {
            AuthError::InvalidFormat(_) => StatusCode::BAD_REQUEST,
            AuthError::MissingCredentials | AuthError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
        };
        (status, self.to_string()).into_response()
    }
}

/// Finds the access token in the request headers
///
/// Looks at `Authorization: Bearer` first, then the `access_token` cookie.
pub fn extract_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    if let Some(value) = headers.get(header::AUTHORIZATION) {
        let value = value
            .to_str()
            .map_err(|_| AuthError::InvalidFormat("Malformed authorization header".to_string()))?;
        return value
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::InvalidFormat("Expected Bearer token".to_string()));
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == ACCESS_TOKEN_COOKIE && !value.is_empty())
        .map(|(_, value)| value)
        .ok_or(AuthError::MissingCredentials)
}

/// Validates the request's access token and returns the caller
pub fn authenticate(headers: &HeaderMap, secret: &str) -> Result<AuthContext, AuthError> {
    let token = extract_token(headers)?;
    let claims = validate_access_token(token, secret)?;
    Ok(AuthContext::new(claims.sub))
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .copied()
            .ok_or(AuthError::MissingCredentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::{create_token, Claims, TokenType};
    use axum::http::HeaderValue;

    const SECRET: &str = "test-secret-key-at-least-32-bytes-long";

    fn token_for(user_id: Uuid, token_type: TokenType) -> String {
        create_token(&Claims::new(user_id, token_type), SECRET).unwrap()
    }

    #[test]
    fn test_extract_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(extract_token(&headers).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn test_extract_non_bearer_is_bad_format() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert!(matches!(extract_token(&headers), Err(AuthError::InvalidFormat(_))));
    }

    #[test]
    fn test_extract_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; access_token=tok123; lang=en"),
        );
        assert_eq!(extract_token(&headers).unwrap(), "tok123");
    }

    #[test]
    fn test_extract_missing() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark"));
        assert!(matches!(extract_token(&headers), Err(AuthError::MissingCredentials)));
    }

    #[test]
    fn test_authenticate_access_token() {
        let user_id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        let value = format!("Bearer {}", token_for(user_id, TokenType::Access));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(&value).unwrap());

        assert_eq!(authenticate(&headers, SECRET).unwrap().user_id, user_id);
    }

    #[test]
    fn test_authenticate_rejects_refresh_token() {
        let mut headers = HeaderMap::new();
        let value = format!("access_token={}", token_for(Uuid::new_v4(), TokenType::Refresh));
        headers.insert(header::COOKIE, HeaderValue::from_str(&value).unwrap());

        assert!(matches!(authenticate(&headers, SECRET), Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn test_auth_error_status_codes() {
        assert_eq!(
            AuthError::MissingCredentials.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthError::InvalidFormat("x".into()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
    }
}
