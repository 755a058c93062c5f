/// Middleware for the API server
///
/// - `security`: Security response headers
/// - `rate_limit`: Per-user submission rate limiting

pub mod rate_limit;
pub mod security;
