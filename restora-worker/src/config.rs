/// Worker configuration
///
/// # Environment Variables
///
/// - `DATABASE_URL`: PostgreSQL connection string (required)
/// - `DATABASE_MAX_CONNECTIONS`: Pool size (default: 10)
/// - `DASHSCOPE_API_KEY`: Image vendor key (required)
/// - `DASHSCOPE_BASE_URL`: Vendor endpoint (default: public endpoint)
/// - `DASHSCOPE_MODEL`: Image-edit model (default: wanx2.1-imageedit)
/// - `DASHSCOPE_POLL_INTERVAL_MS`: Delay between polls of one task (default: 3000)
/// - `WORKER_JOB_TIMEOUT_SECS`: Per-job deadline (default: 300)
/// - `WORKER_LEASE_SECS`: Claim lease before a job is reclaimed (default: 600)
/// - `WORKER_MAX_CONCURRENT_JOBS`: Jobs polled at once (default: 10)
/// - `WORKER_CLAIM_INTERVAL_MS`: Idle delay between claims (default: 1000)
///
/// The API server reads the vendor and runner sections through the same
/// functions when it embeds the runner.

use restora_shared::db::pool::DatabaseConfig;
use restora_shared::vendor::dashscope::{DashscopeConfig, DEFAULT_BASE_URL, DEFAULT_MODEL};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::orchestrator::OrchestratorConfig;
use crate::timeout::TimeoutEnforcer;

/// Default claim lease in seconds
pub const DEFAULT_LEASE_SECS: i64 = 600;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database: DatabaseConfig,
    pub vendor: DashscopeConfig,
    pub orchestrator: OrchestratorConfig,
    pub lease_secs: i64,
}

impl WorkerConfig {
    /// Loads configuration from the environment (and `.env` if present)
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let url = env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?;

        let database = DatabaseConfig {
            url,
            max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10)?,
            ..DatabaseConfig::default()
        };

        Ok(Self {
            database,
            vendor: vendor_from_env()?,
            orchestrator: orchestrator_from_env()?,
            lease_secs: lease_secs_from_env()?,
        })
    }
}

/// Reads the `DASHSCOPE_*` variables
pub fn vendor_from_env() -> anyhow::Result<DashscopeConfig> {
    let api_key = env::var("DASHSCOPE_API_KEY")
        .map_err(|_| anyhow::anyhow!("DASHSCOPE_API_KEY environment variable is required"))?;

    Ok(DashscopeConfig {
        base_url: env::var("DASHSCOPE_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
        model: env::var("DASHSCOPE_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
        ..DashscopeConfig::new(api_key)
    })
}

/// Reads the runner tuning variables
pub fn orchestrator_from_env() -> anyhow::Result<OrchestratorConfig> {
    let defaults = OrchestratorConfig::default();

    let timeout_secs = match env::var("WORKER_JOB_TIMEOUT_SECS") {
        Ok(raw) => Some(
            raw.parse::<u64>()
                .map_err(|e| anyhow::anyhow!("Invalid WORKER_JOB_TIMEOUT_SECS '{}': {}", raw, e))?,
        ),
        Err(_) => None,
    };

    let max_concurrent_jobs: usize = parse_env("WORKER_MAX_CONCURRENT_JOBS", defaults.max_concurrent_jobs)?;
    if max_concurrent_jobs == 0 {
        anyhow::bail!("WORKER_MAX_CONCURRENT_JOBS must be at least 1");
    }

    Ok(OrchestratorConfig {
        poll_interval: Duration::from_millis(parse_env("DASHSCOPE_POLL_INTERVAL_MS", 3000)?),
        claim_interval: Duration::from_millis(parse_env("WORKER_CLAIM_INTERVAL_MS", 1000)?),
        max_concurrent_jobs,
        job_timeout: TimeoutEnforcer::from_secs(timeout_secs).timeout(),
        shutdown_grace: defaults.shutdown_grace,
    })
}

/// Reads `WORKER_LEASE_SECS`
pub fn lease_secs_from_env() -> anyhow::Result<i64> {
    let lease_secs: i64 = parse_env("WORKER_LEASE_SECS", DEFAULT_LEASE_SECS)?;
    if lease_secs < 30 {
        anyhow::bail!("WORKER_LEASE_SECS must be at least 30");
    }
    Ok(lease_secs)
}

/// Parses an optional variable, falling back to `default` when unset
pub fn parse_env<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Invalid {} '{}': {}", name, raw, e)),
        Err(_) => Ok(default),
    }
}
