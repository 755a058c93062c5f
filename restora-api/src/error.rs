/// Error handling for the API server
///
/// Handlers return `ApiResult<T>`. Every library error converts into
/// [`ApiError`], which renders as an HTTP status plus a JSON body:
///
/// ```json
/// { "error": "payment_required", "message": "Insufficient credits: balance 0, required 1" }
/// ```
///
/// Internal errors are logged with their detail and reported to the client
/// without it.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use restora_shared::{
    auth::{jwt::JwtError, middleware::AuthError, password::PasswordError},
    credits::CreditError,
    payments::PaymentError,
    storage::StorageError,
    uploads::UploadError,
    vendor::VendorError,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// API result type alias
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type
#[derive(Debug)]
pub enum ApiError {
    /// 400
    BadRequest(String),

    /// 401
    Unauthorized(String),

    /// 402, not enough credits
    PaymentRequired(String),

    /// 404
    NotFound(String),

    /// 409, e.g. duplicate email
    Conflict(String),

    /// 413
    PayloadTooLarge(String),

    /// 415
    UnsupportedMediaType(String),

    /// 422 with per-field details
    ValidationError(Vec<ValidationErrorDetail>),

    /// 429 with `Retry-After`
    RateLimitExceeded { retry_after: u64, message: String },

    /// 500, detail is logged but not returned
    InternalError(String),

    /// 502, an upstream service failed
    BadGateway(String),

    /// 503
    ServiceUnavailable(String),
}

/// Validation error detail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationErrorDetail {
    /// Field that failed validation
    pub field: String,

    /// Error message
    pub message: String,
}

impl ValidationErrorDetail {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code (e.g., "bad_request", "unauthorized")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// Optional validation errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<ValidationErrorDetail>>,
}

impl ApiError {
    /// Single-field validation failure
    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        ApiError::ValidationError(vec![ValidationErrorDetail::new(field, message)])
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::PaymentRequired(_) => StatusCode::PAYMENT_REQUIRED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::PaymentRequired(_) => "payment_required",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::PayloadTooLarge(_) => "payload_too_large",
            ApiError::UnsupportedMediaType(_) => "unsupported_media_type",
            ApiError::ValidationError(_) => "validation_error",
            ApiError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            ApiError::InternalError(_) => "internal_error",
            ApiError::BadGateway(_) => "bad_gateway",
            ApiError::ServiceUnavailable(_) => "service_unavailable",
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::PaymentRequired(msg) => write!(f, "Payment required: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ApiError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            ApiError::PayloadTooLarge(msg) => write!(f, "Payload too large: {}", msg),
            ApiError::UnsupportedMediaType(msg) => write!(f, "Unsupported media type: {}", msg),
            ApiError::ValidationError(errors) => {
                write!(f, "Validation failed: {} errors", errors.len())
            }
            ApiError::RateLimitExceeded { message, .. } => write!(f, "Rate limit exceeded: {}", message),
            ApiError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            ApiError::BadGateway(msg) => write!(f, "Bad gateway: {}", msg),
            ApiError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = self.code().to_string();

        let (message, details, retry_after) = match self {
            ApiError::ValidationError(errors) => {
                ("Request validation failed".to_string(), Some(errors), None)
            }
            ApiError::RateLimitExceeded { retry_after, message } => (message, None, Some(retry_after)),
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                ("An internal error occurred".to_string(), None, None)
            }
            ApiError::BadRequest(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::PaymentRequired(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::PayloadTooLarge(msg)
            | ApiError::UnsupportedMediaType(msg)
            | ApiError::BadGateway(msg)
            | ApiError::ServiceUnavailable(msg) => (msg, None, None),
        };

        let mut response = (
            status,
            Json(ErrorResponse {
                error,
                message,
                details,
            }),
        )
            .into_response();

        if let Some(seconds) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
        }

        response
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound("Resource not found".to_string()),
            sqlx::Error::Database(db_err) => {
                if let Some(constraint) = db_err.constraint() {
                    if constraint.contains("email") {
                        return ApiError::Conflict("Email already registered".to_string());
                    }
                    return ApiError::Conflict(format!("Constraint violation: {}", constraint));
                }

                ApiError::InternalError(format!("Database error: {}", db_err))
            }
            _ => ApiError::InternalError(format!("Database error: {}", err)),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let details = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |error| ValidationErrorDetail {
                    field: field.to_string(),
                    message: error
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| "Validation failed".to_string()),
                })
            })
            .collect();
        ApiError::ValidationError(details)
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingCredentials => ApiError::Unauthorized("Missing credentials".to_string()),
            AuthError::InvalidFormat(msg) => ApiError::BadRequest(msg),
            AuthError::InvalidToken(msg) => ApiError::Unauthorized(msg),
        }
    }
}

impl From<JwtError> for ApiError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::CreateError(msg) => ApiError::InternalError(format!("Token creation failed: {}", msg)),
            JwtError::Expired => ApiError::Unauthorized("Token expired".to_string()),
            JwtError::InvalidIssuer => ApiError::Unauthorized("Invalid token issuer".to_string()),
            other => ApiError::Unauthorized(format!("Invalid token: {}", other)),
        }
    }
}

impl From<PasswordError> for ApiError {
    fn from(err: PasswordError) -> Self {
        ApiError::InternalError(format!("Password operation failed: {}", err))
    }
}

impl From<CreditError> for ApiError {
    fn from(err: CreditError) -> Self {
        match err {
            CreditError::Insufficient { .. } => ApiError::PaymentRequired(err.to_string()),
            CreditError::InvalidAmount(_) => ApiError::InternalError(err.to_string()),
            CreditError::Database(e) => e.into(),
        }
    }
}

impl From<VendorError> for ApiError {
    fn from(err: VendorError) -> Self {
        match err {
            VendorError::Rejected { ref message, .. } => {
                ApiError::BadRequest(format!("Image service rejected the request: {}", message))
            }
            VendorError::RateLimited | VendorError::Unavailable { .. } | VendorError::Network(_) => {
                tracing::warn!(error = %err, "Image service unavailable");
                ApiError::ServiceUnavailable("Image service is temporarily unavailable".to_string())
            }
            VendorError::InvalidResponse(_) => {
                tracing::error!(error = %err, "Unexpected image service response");
                ApiError::BadGateway("Image service returned an unexpected response".to_string())
            }
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Network(_) | StorageError::Rejected { .. } => {
                tracing::error!(error = %err, "Storage request failed");
                ApiError::BadGateway("File storage is unavailable".to_string())
            }
            StorageError::Io(_) | StorageError::InvalidKey(_) => ApiError::InternalError(err.to_string()),
        }
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::Empty => ApiError::BadRequest(err.to_string()),
            UploadError::TooLarge { .. } => ApiError::PayloadTooLarge(err.to_string()),
            UploadError::UnsupportedType => ApiError::UnsupportedMediaType(err.to_string()),
            UploadError::Storage(e) => e.into(),
            UploadError::Database(e) => e.into(),
        }
    }
}

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::ProviderApi(_) => {
                tracing::error!(error = %err, "Payment provider request failed");
                ApiError::BadGateway("Payment provider is unavailable".to_string())
            }
            PaymentError::InvalidSignature(_) | PaymentError::InvalidData(_) => {
                ApiError::BadRequest(err.to_string())
            }
            PaymentError::NoCustomerId => {
                ApiError::NotFound("No billing account yet; complete a purchase first".to_string())
            }
            PaymentError::Database(e) => e.into(),
            PaymentError::Credits(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ApiError::BadRequest("Invalid input".to_string());
        assert_eq!(err.to_string(), "Bad request: Invalid input");

        let err = ApiError::NotFound("Generation not found".to_string());
        assert_eq!(err.to_string(), "Not found: Generation not found");
    }

    #[test]
    fn test_insufficient_credits_is_payment_required() {
        let err: ApiError = CreditError::Insufficient {
            balance: 0,
            required: 1,
        }
        .into();
        assert_eq!(err.into_response().status(), StatusCode::PAYMENT_REQUIRED);
    }

    #[test]
    fn test_upload_errors_map_to_client_statuses() {
        let too_large: ApiError = UploadError::TooLarge { size: 11, max: 10 }.into();
        assert_eq!(too_large.into_response().status(), StatusCode::PAYLOAD_TOO_LARGE);

        let wrong_type: ApiError = UploadError::UnsupportedType.into();
        assert_eq!(wrong_type.into_response().status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[test]
    fn test_vendor_errors() {
        let rejected: ApiError = VendorError::Rejected {
            status: 400,
            code: "InvalidParameter".to_string(),
            message: "url error".to_string(),
        }
        .into();
        assert_eq!(rejected.into_response().status(), StatusCode::BAD_REQUEST);

        let throttled: ApiError = VendorError::RateLimited.into();
        assert_eq!(throttled.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_rate_limit_sets_retry_after() {
        let response = ApiError::RateLimitExceeded {
            retry_after: 42,
            message: "slow down".to_string(),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "42");
    }

    #[test]
    fn test_validation_error() {
        let err = ApiError::ValidationError(vec![
            ValidationErrorDetail::new("email", "Invalid email format"),
            ValidationErrorDetail::new("password", "Password too short"),
        ]);
        assert_eq!(err.to_string(), "Validation failed: 2 errors");
    }
}
