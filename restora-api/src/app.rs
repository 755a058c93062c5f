/// Application state and router builder
///
/// # Example
///
/// ```no_run
/// use restora_api::{app::{build_router, AppState}, config::Config};
/// use sqlx::PgPool;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// let pool = PgPool::connect(&config.database.url).await?;
/// let state = AppState::new(pool, config)?;
/// let app = build_router(state);
/// # Ok(())
/// # }
/// ```

use crate::{
    config::{Config, StorageConfig},
    error::ApiError,
    middleware::{rate_limit::RateLimiter, security::SecurityHeadersLayer},
};
use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::{header, HeaderValue, Method},
    middleware::Next,
    response::Response,
    routing::{get, post},
    Router,
};
use restora_shared::{
    auth::middleware::authenticate,
    notify::NotificationHub,
    payments::{create_provider, PaymentProvider},
    storage::{local::LocalStorage, supabase::SupabaseStorage, StorageBackend},
    vendor::{dashscope::DashscopeClient, ImageVendor},
};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::CorsLayer,
    services::ServeDir,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

/// Multipart framing on top of the file itself
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Shared application state
///
/// Cloned for each request; everything inside is reference counted.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<Config>,
    pub vendor: Arc<dyn ImageVendor>,
    pub storage: Arc<dyn StorageBackend>,
    pub payments: Arc<dyn PaymentProvider>,

    /// Generation updates for SSE subscribers
    pub hub: NotificationHub,

    pub rate_limiter: Arc<RateLimiter>,

    /// Cancelled when the server starts shutting down; ends open SSE streams
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Builds the collaborators named in `config`
    pub fn new(db: PgPool, config: Config) -> anyhow::Result<Self> {
        let vendor: Arc<dyn ImageVendor> = Arc::new(DashscopeClient::new(config.vendor.clone())?);

        let storage: Arc<dyn StorageBackend> = match &config.storage {
            StorageConfig::Supabase(supabase) => Arc::new(SupabaseStorage::new(supabase.clone())),
            StorageConfig::Local { root } => {
                Arc::new(LocalStorage::new(root.clone(), config.local_media_url()))
            }
        };

        let payments = create_provider(config.payments.provider.clone())?;

        Ok(Self::with_services(db, config, vendor, storage, payments))
    }

    /// Builds state around given collaborators
    pub fn with_services(
        db: PgPool,
        config: Config,
        vendor: Arc<dyn ImageVendor>,
        storage: Arc<dyn StorageBackend>,
        payments: Arc<dyn PaymentProvider>,
    ) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(
            config.rate_limit.submissions,
            Duration::from_secs(config.rate_limit.window_secs),
        ));

        Self {
            db,
            config: Arc::new(config),
            vendor,
            storage,
            payments,
            hub: NotificationHub::new(),
            rate_limiter,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn jwt_secret(&self) -> &str {
        &self.config.jwt.secret
    }
}

/// Builds the complete router
///
/// ```text
/// /
/// ├── GET  /health
/// ├── /v1/
/// │   ├── /auth/                     register, login, refresh, logout (public)
/// │   ├── GET  /credits/packages     (public)
/// │   ├── POST /payments/webhook     (public, signature checked)
/// │   ├── GET|PATCH /profile
/// │   ├── GET  /credits/balance, /credits/transactions
/// │   ├── POST /payments/checkout, /payments/portal
/// │   ├── POST|GET /uploads
/// │   └── GET  /generations, /generations/:id, /generations/:id/events
/// ├── POST /api/image/process         (authenticated, rate limited)
/// └── GET  /media/*                   (local storage only)
/// ```
pub fn build_router(state: AppState) -> Router {
    use crate::routes;

    let health_routes = Router::new().route("/health", get(routes::health::health_check));

    let auth_routes = Router::new()
        .route("/register", post(routes::auth::register))
        .route("/login", post(routes::auth::login))
        .route("/refresh", post(routes::auth::refresh))
        .route("/logout", post(routes::auth::logout));

    let public_routes = Router::new()
        .route("/credits/packages", get(routes::credits::list_packages))
        .route("/payments/webhook", post(routes::payments::webhook));

    let upload_limit = state.config.uploads.max_bytes + MULTIPART_OVERHEAD_BYTES;

    let user_routes = Router::new()
        .route(
            "/profile",
            get(routes::profile::get_profile).patch(routes::profile::update_profile),
        )
        .route("/credits/balance", get(routes::credits::get_balance))
        .route("/credits/transactions", get(routes::credits::list_transactions))
        .route("/payments/checkout", post(routes::payments::create_checkout))
        .route("/payments/portal", post(routes::payments::create_portal))
        .route(
            "/uploads",
            post(routes::uploads::upload)
                .get(routes::uploads::list_uploads)
                .layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/generations", get(routes::generations::list_generations))
        .route("/generations/:id", get(routes::generations::get_generation))
        .route(
            "/generations/:id/events",
            get(routes::generations::generation_events),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            jwt_auth_layer,
        ));

    let image_routes = Router::new()
        .route("/process", post(routes::image::process))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::rate_limit::rate_limit_layer,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            jwt_auth_layer,
        ));

    let v1_routes = Router::new()
        .nest("/auth", auth_routes)
        .merge(public_routes)
        .merge(user_routes);

    let mut router = Router::new()
        .merge(health_routes)
        .nest("/v1", v1_routes)
        .nest("/api/image", image_routes);

    if let StorageConfig::Local { root } = &state.config.storage {
        router = router.nest_service("/media", ServeDir::new(root));
    }

    let cors = cors_layer(&state.config.api.cors_origins);

    router
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors)
        .layer(SecurityHeadersLayer::new(state.config.api.production))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    // Credentials so the session cookie crosses origins.
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600))
}

/// Authenticates with a Bearer token or the session cookie
async fn jwt_auth_layer(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth = authenticate(req.headers(), state.jwt_secret())?;
    req.extensions_mut().insert(auth);
    Ok(next.run(req).await)
}
