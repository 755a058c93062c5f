/// API route handlers, by resource
///
/// - `health`: Health check
/// - `auth`: Register, login, token refresh, logout
/// - `profile`: The caller's profile
/// - `credits`: Balance, ledger and package catalogue
/// - `payments`: Checkout, billing portal, provider webhook
/// - `uploads`: Image uploads
/// - `image`: Job submission
/// - `generations`: Job records and live status events

pub mod auth;
pub mod credits;
pub mod generations;
pub mod health;
pub mod image;
pub mod payments;
pub mod profile;
pub mod uploads;

use serde::Deserialize;

/// `?limit&offset` query for list endpoints
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Pagination {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Pagination {
    pub const DEFAULT_LIMIT: i64 = 20;
    pub const MAX_LIMIT: i64 = 100;

    /// Limit clamped to `1..=MAX_LIMIT`
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT).clamp(1, Self::MAX_LIMIT)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}
