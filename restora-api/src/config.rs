/// Configuration management for the API server
///
/// Loaded from environment variables (a `.env` file is honoured) into typed
/// sections. Required variables fail startup with a message naming them.
///
/// # Environment Variables
///
/// Server:
/// - `API_HOST` (default: 0.0.0.0), `API_PORT` (default: 8080)
/// - `CORS_ORIGINS`: comma-separated origins, `*` for any (default: *)
/// - `PRODUCTION`: enables HSTS and secure cookies (default: false)
/// - `PUBLIC_BASE_URL`: where this server is reachable (default: http://localhost:8080)
/// - `APP_URL`: the web app, used for checkout redirects (default: http://localhost:3000)
///
/// Database and auth:
/// - `DATABASE_URL` (required), `DATABASE_MAX_CONNECTIONS` (default: 10)
/// - `JWT_SECRET` (required, at least 32 characters)
///
/// Image vendor and job runner: see `restora_worker::config`.
/// - `WORKER_EMBEDDED`: run the job runner inside the API process (default: true)
///
/// Storage:
/// - `STORAGE_BACKEND`: `supabase` or `local` (default: supabase when `STORAGE_URL` is set)
/// - `STORAGE_URL`, `STORAGE_SERVICE_KEY`, `STORAGE_BUCKET` (default bucket: media)
/// - `LOCAL_STORAGE_DIR` (default: ./media), served under `/media`
///
/// Payments:
/// - `PAYMENT_PROVIDER`: `stripe` or `dummy` (default: stripe when `STRIPE_SECRET_KEY` is set)
/// - `STRIPE_SECRET_KEY`, `STRIPE_WEBHOOK_SECRET`, `STRIPE_API_BASE`
/// - `CHECKOUT_SUCCESS_URL`, `CHECKOUT_CANCEL_URL`, `BILLING_PORTAL_RETURN_URL`
///
/// Limits:
/// - `MAX_UPLOAD_BYTES` (default: 10 MiB)
/// - `CREDITS_SIGNUP_BONUS` (default: 3), `CREDITS_PER_IMAGE` (default: 1)
/// - `RATE_LIMIT_SUBMISSIONS` per `RATE_LIMIT_WINDOW_SECS` (default: 10 per 60)
///
/// # Example
///
/// ```no_run
/// use restora_api::config::Config;
///
/// # fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.bind_address());
/// # Ok(())
/// # }
/// ```

use restora_shared::db::pool::DatabaseConfig;
use restora_shared::payments::stripe::{StripeConfig, DEFAULT_API_BASE};
use restora_shared::payments::ProviderConfig;
use restora_shared::storage::supabase::SupabaseStorageConfig;
use restora_shared::uploads::DEFAULT_MAX_UPLOAD_BYTES;
use restora_shared::vendor::dashscope::DashscopeConfig;
use restora_worker::config::{
    lease_secs_from_env, orchestrator_from_env, parse_env, vendor_from_env, DEFAULT_LEASE_SECS,
};
use restora_worker::orchestrator::OrchestratorConfig;
use std::env;
use std::path::PathBuf;

/// Complete application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub api: ApiConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub vendor: DashscopeConfig,
    pub storage: StorageConfig,
    pub payments: PaymentsConfig,
    pub uploads: UploadsConfig,
    pub worker: WorkerSettings,
    pub credits: CreditsConfig,
    pub rate_limit: RateLimitConfig,
}

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,

    /// Allowed CORS origins; `*` allows any
    pub cors_origins: Vec<String>,

    /// Production mode: HSTS and `Secure` cookies
    pub production: bool,

    /// Base URL of this server, without trailing slash
    pub public_base_url: String,

    /// Base URL of the web app, without trailing slash
    pub app_url: String,
}

/// JWT configuration
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// Signing secret, at least 32 bytes. Generate with `openssl rand -hex 32`.
    pub secret: String,
}

/// Where uploads are stored
#[derive(Debug, Clone)]
pub enum StorageConfig {
    Supabase(SupabaseStorageConfig),

    /// Files under `root`, served by this server at `/media`
    Local { root: PathBuf },
}

#[derive(Debug, Clone)]
pub struct PaymentsConfig {
    pub provider: ProviderConfig,

    /// May contain `{CHECKOUT_SESSION_ID}`
    pub success_url: String,
    pub cancel_url: String,
    pub portal_return_url: String,
}

#[derive(Debug, Clone)]
pub struct UploadsConfig {
    pub max_bytes: usize,
}

/// Job runner settings
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Run the job runner in this process
    pub embedded: bool,
    pub orchestrator: OrchestratorConfig,
    pub lease_secs: i64,
}

#[derive(Debug, Clone)]
pub struct CreditsConfig {
    /// Granted once at registration
    pub signup_bonus: i64,

    /// Charged per submitted image
    pub per_image: i64,
}

/// Per-user limit on job submissions
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub submissions: u32,
    pub window_secs: u64,
}

impl Config {
    /// Loads configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a value does not
    /// parse.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let host = env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port: u16 = parse_env("API_PORT", 8080)?;
        let cors_origins = env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "*".to_string())
            .split(',')
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect();
        let production = parse_bool("PRODUCTION", false)?;
        let public_base_url = trim_url(
            env::var("PUBLIC_BASE_URL").unwrap_or_else(|_| format!("http://localhost:{}", port)),
        );
        let app_url = trim_url(env::var("APP_URL").unwrap_or_else(|_| "http://localhost:3000".to_string()));

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?;
        let database = DatabaseConfig {
            url: database_url,
            max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10)?,
            ..DatabaseConfig::default()
        };

        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| anyhow::anyhow!("JWT_SECRET environment variable is required"))?;
        if jwt_secret.len() < 32 {
            anyhow::bail!("JWT_SECRET must be at least 32 characters long");
        }

        let payments = PaymentsConfig {
            provider: payment_provider_from_env()?,
            success_url: env::var("CHECKOUT_SUCCESS_URL").unwrap_or_else(|_| {
                format!("{}/billing/success?session_id={{CHECKOUT_SESSION_ID}}", app_url)
            }),
            cancel_url: env::var("CHECKOUT_CANCEL_URL")
                .unwrap_or_else(|_| format!("{}/billing/cancel", app_url)),
            portal_return_url: env::var("BILLING_PORTAL_RETURN_URL")
                .unwrap_or_else(|_| format!("{}/profile", app_url)),
        };

        if production && matches!(payments.provider, ProviderConfig::Dummy) {
            tracing::warn!("Dummy payment provider in production: checkouts credit without payment");
        }

        let credits = CreditsConfig {
            signup_bonus: parse_env("CREDITS_SIGNUP_BONUS", 3)?,
            per_image: parse_env("CREDITS_PER_IMAGE", 1)?,
        };
        if credits.signup_bonus < 0 || credits.per_image < 1 {
            anyhow::bail!("CREDITS_SIGNUP_BONUS must be >= 0 and CREDITS_PER_IMAGE >= 1");
        }

        Ok(Self {
            api: ApiConfig {
                host,
                port,
                cors_origins,
                production,
                public_base_url,
                app_url,
            },
            database,
            jwt: JwtConfig { secret: jwt_secret },
            vendor: vendor_from_env()?,
            storage: storage_from_env()?,
            payments,
            uploads: UploadsConfig {
                max_bytes: parse_env("MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
            },
            worker: WorkerSettings {
                embedded: parse_bool("WORKER_EMBEDDED", true)?,
                orchestrator: orchestrator_from_env()?,
                lease_secs: lease_secs_from_env()?,
            },
            credits,
            rate_limit: RateLimitConfig {
                submissions: parse_env("RATE_LIMIT_SUBMISSIONS", 10)?,
                window_secs: parse_env("RATE_LIMIT_WINDOW_SECS", 60)?,
            },
        })
    }

    /// Returns the server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }

    /// Public URL prefix for locally stored media
    pub fn local_media_url(&self) -> String {
        format!("{}/media", self.api.public_base_url)
    }

    /// Development defaults: local storage, dummy payments, no embedded runner
    ///
    /// Used by tests and as a base for hand-built configurations.
    pub fn development(database_url: impl Into<String>, jwt_secret: impl Into<String>) -> Self {
        Self {
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                cors_origins: vec!["*".to_string()],
                production: false,
                public_base_url: "http://localhost:8080".to_string(),
                app_url: "http://localhost:3000".to_string(),
            },
            database: DatabaseConfig {
                url: database_url.into(),
                ..DatabaseConfig::default()
            },
            jwt: JwtConfig {
                secret: jwt_secret.into(),
            },
            vendor: DashscopeConfig::new("sk-development"),
            storage: StorageConfig::Local {
                root: PathBuf::from("./media"),
            },
            payments: PaymentsConfig {
                provider: ProviderConfig::Dummy,
                success_url: "http://localhost:3000/billing/success?session_id={CHECKOUT_SESSION_ID}"
                    .to_string(),
                cancel_url: "http://localhost:3000/billing/cancel".to_string(),
                portal_return_url: "http://localhost:3000/profile".to_string(),
            },
            uploads: UploadsConfig {
                max_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            },
            worker: WorkerSettings {
                embedded: false,
                orchestrator: OrchestratorConfig::default(),
                lease_secs: DEFAULT_LEASE_SECS,
            },
            credits: CreditsConfig {
                signup_bonus: 3,
                per_image: 1,
            },
            rate_limit: RateLimitConfig {
                submissions: 10,
                window_secs: 60,
            },
        }
    }
}

fn storage_from_env() -> anyhow::Result<StorageConfig> {
    let backend = env::var("STORAGE_BACKEND").unwrap_or_else(|_| {
        if env::var("STORAGE_URL").is_ok() {
            "supabase".to_string()
        } else {
            "local".to_string()
        }
    });

    match backend.to_ascii_lowercase().as_str() {
        "supabase" => {
            let url = env::var("STORAGE_URL")
                .map_err(|_| anyhow::anyhow!("STORAGE_URL is required for supabase storage"))?;
            let service_key = env::var("STORAGE_SERVICE_KEY")
                .map_err(|_| anyhow::anyhow!("STORAGE_SERVICE_KEY is required for supabase storage"))?;
            Ok(StorageConfig::Supabase(SupabaseStorageConfig {
                url: trim_url(url),
                service_key,
                bucket: env::var("STORAGE_BUCKET").unwrap_or_else(|_| "media".to_string()),
            }))
        }
        "local" => Ok(StorageConfig::Local {
            root: PathBuf::from(env::var("LOCAL_STORAGE_DIR").unwrap_or_else(|_| "./media".to_string())),
        }),
        other => anyhow::bail!("Unknown STORAGE_BACKEND '{}': expected supabase or local", other),
    }
}

fn payment_provider_from_env() -> anyhow::Result<ProviderConfig> {
    let provider = env::var("PAYMENT_PROVIDER").unwrap_or_else(|_| {
        if env::var("STRIPE_SECRET_KEY").is_ok() {
            "stripe".to_string()
        } else {
            "dummy".to_string()
        }
    });

    match provider.to_ascii_lowercase().as_str() {
        "stripe" => {
            let secret_key = env::var("STRIPE_SECRET_KEY")
                .map_err(|_| anyhow::anyhow!("STRIPE_SECRET_KEY is required for stripe payments"))?;
            let webhook_secret = env::var("STRIPE_WEBHOOK_SECRET")
                .map_err(|_| anyhow::anyhow!("STRIPE_WEBHOOK_SECRET is required for stripe payments"))?;
            Ok(ProviderConfig::Stripe(StripeConfig {
                api_base: env::var("STRIPE_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_string()),
                ..StripeConfig::new(secret_key, webhook_secret)
            }))
        }
        "dummy" => Ok(ProviderConfig::Dummy),
        other => anyhow::bail!("Unknown PAYMENT_PROVIDER '{}': expected stripe or dummy", other),
    }
}

fn parse_bool(name: &str, default: bool) -> anyhow::Result<bool> {
    match env::var(name) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => anyhow::bail!("Invalid {} '{}': expected true or false", name, raw),
        },
        Err(_) => Ok(default),
    }
}

fn trim_url(url: String) -> String {
    url.trim_end_matches('/').to_string()
}
