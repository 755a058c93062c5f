/// Password hashing with Argon2id
///
/// Hashes are stored in PHC string format, so the parameters travel with the
/// hash and verification does not depend on the current settings.
///
/// # Parameters
///
/// - Memory: 19 MiB
/// - Iterations: 2
/// - Parallelism: 1
///
/// # Example
///
/// ```
/// use restora_shared::auth::password::{hash_password, verify_password};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let hash = hash_password("Sup3r$ecret")?;
/// assert!(verify_password("Sup3r$ecret", &hash)?);
/// assert!(!verify_password("wrong", &hash)?);
/// # Ok(())
/// # }
/// ```

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, ParamsBuilder, Version,
};

/// Minimum accepted password length
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Error type for password hashing operations
#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    /// Failed to hash password
    #[error("Failed to hash password: {0}")]
    HashError(String),

    /// Failed to verify password
    #[error("Failed to verify password: {0}")]
    VerifyError(String),

    /// Stored hash is not a valid PHC string
    #[error("Invalid password hash format: {0}")]
    InvalidHash(String),
}

fn hasher() -> Result<Argon2<'static>, PasswordError> {
    let params = ParamsBuilder::new()
        .m_cost(19 * 1024)
        .t_cost(2)
        .p_cost(1)
        .output_len(32)
        .build()
        .map_err(|e| PasswordError::HashError(format!("Invalid parameters: {}", e)))?;

    Ok(Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params))
}

/// Hashes a password with a fresh random salt
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);

    let hash = hasher()?
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| PasswordError::HashError(format!("Hash generation failed: {}", e)))?;

    Ok(hash.to_string())
}

/// Verifies a password against a stored hash in constant time
///
/// Returns `Ok(false)` on mismatch and an error only when the stored hash is
/// unusable.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, PasswordError> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| PasswordError::InvalidHash(format!("Failed to parse hash: {}", e)))?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(PasswordError::VerifyError(format!("Verification failed: {}", e))),
    }
}

/// Checks minimum password strength
///
/// Requires at least [`MIN_PASSWORD_LENGTH`] characters, one letter and one
/// digit.
pub fn validate_password_strength(password: &str) -> Result<(), String> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(format!(
            "Password must be at least {} characters long",
            MIN_PASSWORD_LENGTH
        ));
    }

    if !password.chars().any(|c| c.is_alphabetic()) {
        return Err("Password must contain at least one letter".to_string());
    }

    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err("Password must contain at least one digit".to_string());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_password_format() {
        let hash = hash_password("photo-restore-1").expect("hash should succeed");
        assert!(hash.starts_with("$argon2id$"));
        assert!(hash.contains("m=19456"));
        assert!(hash.contains("t=2"));
    }

    #[test]
    fn test_hash_password_uses_distinct_salts() {
        let a = hash_password("same_password1").unwrap();
        let b = hash_password("same_password1").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_verify_password() {
        let hash = hash_password("correct-horse-9").unwrap();
        assert!(verify_password("correct-horse-9", &hash).unwrap());
        assert!(!verify_password("correct-horse-8", &hash).unwrap());
        assert!(!verify_password("", &hash).unwrap());
    }

    #[test]
    fn test_verify_password_invalid_hash() {
        assert!(verify_password("password", "not-a-phc-string").is_err());
    }

    #[test]
    fn test_validate_password_strength() {
        assert!(validate_password_strength("colorize42").is_ok());
        assert!(validate_password_strength("short1").is_err());
        assert!(validate_password_strength("nodigitshere").is_err());
        assert!(validate_password_strength("1234567890").is_err());
    }
}
