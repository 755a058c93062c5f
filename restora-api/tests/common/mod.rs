//! Shared setup for API integration tests
//!
//! Builds the full router over a real database (`DATABASE_URL`), local file
//! storage in a temporary directory, the dummy payment provider and a
//! scripted image vendor. Without `DATABASE_URL` the tests return early.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use axum::Router;
use restora_api::app::{build_router, AppState};
use restora_api::config::{Config, StorageConfig};
use restora_shared::auth::jwt::{create_token, Claims, TokenType};
use restora_shared::credits;
use restora_shared::db::{
    migrations::run_migrations,
    pool::{create_pool, DatabaseConfig},
};
use restora_shared::models::user::{CreateUser, User};
use restora_shared::payments::dummy::DummyProvider;
use restora_shared::storage::local::LocalStorage;
use restora_shared::vendor::{ImageVendor, SubmitTask, VendorError, VendorTaskStatus};
use sqlx::PgPool;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

pub const JWT_SECRET: &str = "integration-test-secret-at-least-32-bytes";

/// Image vendor that accepts every task, or fails when told to
#[derive(Default)]
pub struct ScriptedVendor {
    pub submissions: AtomicUsize,
    pub fail_submissions: AtomicBool,
}

#[async_trait]
impl ImageVendor for ScriptedVendor {
    async fn submit(&self, _task: &SubmitTask) -> Result<String, VendorError> {
        self.submissions.fetch_add(1, Ordering::SeqCst);

        if self.fail_submissions.load(Ordering::SeqCst) {
            return Err(VendorError::Unavailable {
                status: 503,
                message: "maintenance".to_string(),
            });
        }

        Ok(format!("task-{}", Uuid::new_v4()))
    }

    async fn poll(&self, _task_id: &str) -> Result<VendorTaskStatus, VendorError> {
        Ok(VendorTaskStatus::InProgress)
    }
}

pub struct TestContext {
    pub db: PgPool,
    pub app: Router,
    pub state: AppState,
    pub vendor: Arc<ScriptedVendor>,
    pub media_root: PathBuf,
}

impl TestContext {
    pub async fn new() -> Option<Self> {
        Self::with_config(|_| {}).await
    }

    /// Builds a context after `adjust` has tweaked the development config
    pub async fn with_config(adjust: impl FnOnce(&mut Config)) -> Option<Self> {
        let Ok(url) = std::env::var("DATABASE_URL") else {
            eprintln!("DATABASE_URL not set, skipping database test");
            return None;
        };

        let db = create_pool(DatabaseConfig {
            url: url.clone(),
            max_connections: 5,
            ..Default::default()
        })
        .await
        .expect("Failed to connect to test database");

        run_migrations(&db).await.expect("Failed to run migrations");

        let media_root = std::env::temp_dir().join(format!("restora-test-{}", Uuid::new_v4()));

        let mut config = Config::development(url, JWT_SECRET);
        config.storage = StorageConfig::Local {
            root: media_root.clone(),
        };
        adjust(&mut config);

        let vendor = Arc::new(ScriptedVendor::default());
        let storage = Arc::new(LocalStorage::new(media_root.clone(), config.local_media_url()));

        let state = AppState::with_services(
            db.clone(),
            config,
            vendor.clone(),
            storage,
            Arc::new(DummyProvider),
        );

        Some(Self {
            db,
            app: build_router(state.clone()),
            state,
            vendor,
            media_root,
        })
    }

    /// Creates a user holding `balance` credits and returns it with an access token
    pub async fn create_user(&self, balance: i64) -> (User, String) {
        let mut tx = self.db.begin().await.unwrap();
        let user = User::create(
            &mut tx,
            CreateUser {
                email: format!("api-{}@example.com", Uuid::new_v4()),
                password_hash: "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA".to_string(),
                name: Some("Test User".to_string()),
            },
        )
        .await
        .unwrap();
        credits::grant_signup_bonus(&mut tx, user.id, balance).await.unwrap();
        tx.commit().await.unwrap();

        let token = create_token(&Claims::new(user.id, TokenType::Access), JWT_SECRET).unwrap();
        (user, token)
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(request).await.unwrap()
    }

    pub async fn cleanup(self) {
        let _ = tokio::fs::remove_dir_all(&self.media_root).await;
    }
}

pub fn json_request(method: &str, uri: &str, token: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");

    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }

    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);

    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }

    builder.body(Body::empty()).unwrap()
}

/// Multipart body with one `file` field
pub fn upload_request(token: &str, file_name: &str, content: &[u8]) -> Request<Body> {
    let boundary = "restora-test-boundary";

    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
            file_name
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

    Request::builder()
        .method("POST")
        .uri("/v1/uploads")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", boundary),
        )
        .body(Body::from(body))
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
}

/// Asserts the status, printing the body on mismatch
pub async fn expect_status(response: Response<Body>, expected: StatusCode) -> serde_json::Value {
    let status = response.status();
    let body = body_json(response).await;
    assert_eq!(status, expected, "unexpected status, body: {}", body);
    body
}

/// Smallest valid PNG: signature plus the start of an IHDR chunk
pub fn png_bytes(seed: u8) -> Vec<u8> {
    let mut data = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    data.extend_from_slice(&[0, 0, 0, 13, b'I', b'H', b'D', b'R', 0, 0, 0, 1, 0, 0, 0, 1, 8, 6, 0, 0, 0]);
    data.push(seed);
    data
}
