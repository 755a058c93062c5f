/// Supabase Storage REST backend
///
/// Objects are written with `POST {url}/storage/v1/object/{bucket}/{key}` and
/// `x-upsert: true`, deleted with `DELETE` on the same path, and served from
/// `{url}/storage/v1/object/public/{bucket}/{key}`.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, Client, StatusCode};

use super::{validate_key, StorageBackend, StorageError};

#[derive(Debug, Clone)]
pub struct SupabaseStorageConfig {
    /// Project URL, e.g. `https://abcd.supabase.co`
    pub url: String,

    /// Service role key
    pub service_key: String,

    pub bucket: String,
}

#[derive(Debug, Clone)]
pub struct SupabaseStorage {
    http: Client,
    config: SupabaseStorageConfig,
}

impl SupabaseStorage {
    pub fn new(config: SupabaseStorageConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }

    fn object_url(&self, key: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.config.url.trim_end_matches('/'),
            self.config.bucket,
            key
        )
    }
}

async fn rejected(response: reqwest::Response) -> StorageError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    StorageError::Rejected { status, message }
}

#[async_trait]
impl StorageBackend for SupabaseStorage {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<(), StorageError> {
        validate_key(key)?;

        let response = self
            .http
            .post(self.object_url(key))
            .bearer_auth(&self.config.service_key)
            .header("apikey", &self.config.service_key)
            .header(header::CONTENT_TYPE, content_type)
            .header("x-upsert", "true")
            .body(data)
            .send()
            .await
            .map_err(|e| StorageError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(rejected(response).await);
        }

        tracing::debug!(key = %key, bucket = %self.config.bucket, "Stored object");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        validate_key(key)?;

        let response = self
            .http
            .delete(self.object_url(key))
            .bearer_auth(&self.config.service_key)
            .header("apikey", &self.config.service_key)
            .send()
            .await
            .map_err(|e| StorageError::Network(e.to_string()))?;

        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }

        Err(rejected(response).await)
    }

    fn public_url(&self, key: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.config.url.trim_end_matches('/'),
            self.config.bucket,
            key
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header as header_eq, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn storage_for(server: &MockServer) -> SupabaseStorage {
        SupabaseStorage::new(SupabaseStorageConfig {
            url: format!("{}/", server.uri()),
            service_key: "service-key".to_string(),
            bucket: "media".to_string(),
        })
    }

    #[tokio::test]
    async fn test_put_uploads_with_upsert() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/storage/v1/object/media/u1/abc.png"))
            .and(header_eq("authorization", "Bearer service-key"))
            .and(header_eq("x-upsert", "true"))
            .and(header_eq("content-type", "image/png"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        storage_for(&server)
            .put("u1/abc.png", Bytes::from_static(b"\x89PNG"), "image/png")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_put_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(413).set_body_string("Payload too large"))
            .mount(&server)
            .await;

        let err = storage_for(&server)
            .put("u1/abc.png", Bytes::from_static(b"x"), "image/png")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Rejected { status: 413, .. }));
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/storage/v1/object/media/u1/gone.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        storage_for(&server).delete("u1/gone.png").await.unwrap();
    }

    #[test]
    fn test_public_url() {
        let storage = SupabaseStorage::new(SupabaseStorageConfig {
            url: "https://abcd.supabase.co/".to_string(),
            service_key: "k".to_string(),
            bucket: "media".to_string(),
        });
        assert_eq!(
            storage.public_url("u1/abc.png"),
            "https://abcd.supabase.co/storage/v1/object/public/media/u1/abc.png"
        );
    }
}
