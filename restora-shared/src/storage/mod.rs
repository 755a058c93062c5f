/// Object storage for uploaded media
///
/// [`StorageBackend`] is the seam; [`supabase::SupabaseStorage`] talks to a
/// Supabase-Storage-compatible REST API and [`local::LocalStorage`] writes to
/// a directory for development.

pub mod local;
pub mod supabase;

use async_trait::async_trait;
use bytes::Bytes;

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Transport failure
    #[error("Storage request failed: {0}")]
    Network(String),

    /// Storage service answered with an error status
    #[error("Storage rejected the request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// Local filesystem failure
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Object key would escape the bucket
    #[error("Invalid object key: {0}")]
    InvalidKey(String),
}

/// A bucket of objects addressed by key
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Stores `data` under `key`, overwriting any existing object
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), StorageError>;

    /// Removes the object; removing a missing object is not an error
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Public URL for an object key
    fn public_url(&self, key: &str) -> String;
}

/// Rejects keys that are empty, absolute or contain `..` segments
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(StorageError::InvalidKey(key.to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("3f1c/abcd.png").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("/etc/passwd").is_err());
        assert!(validate_key("user/../other/x.png").is_err());
        assert!(validate_key("user//x.png").is_err());
        assert!(validate_key("user\\x.png").is_err());
    }
}
