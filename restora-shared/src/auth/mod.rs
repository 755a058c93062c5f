/// Authentication primitives
///
/// - [`password`]: Argon2id password hashing and strength checks
/// - [`jwt`]: access/refresh token creation and validation
/// - [`middleware`]: request authentication for axum (Bearer header or cookie)

pub mod jwt;
pub mod middleware;
pub mod password;
