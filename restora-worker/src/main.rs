//! # Restora Worker
//!
//! Claims pending image generations, polls the image vendor until each one
//! finishes, and writes the result back.
//!
//! ```bash
//! cargo run -p restora-worker
//! ```

use restora_shared::db::migrations::run_migrations;
use restora_shared::db::pool::{close_pool, create_pool};
use restora_shared::vendor::dashscope::DashscopeClient;
use restora_worker::config::WorkerConfig;
use restora_worker::logging::init_tracing;
use restora_worker::orchestrator::Orchestrator;
use restora_worker::queue::GenerationQueue;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing("restora_worker=debug,restora_shared=info");

    tracing::info!("Restora worker v{} starting", env!("CARGO_PKG_VERSION"));

    let config = WorkerConfig::from_env()?;

    let pool = create_pool(config.database.clone()).await?;
    run_migrations(&pool).await?;

    let vendor = Arc::new(DashscopeClient::new(config.vendor.clone())?);
    let queue = GenerationQueue::new(pool.clone(), config.lease_secs);
    let orchestrator = Orchestrator::new(queue, vendor, config.orchestrator.clone());

    let shutdown = orchestrator.shutdown_token();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
        }
        tracing::info!("Shutdown signal received");
        shutdown.cancel();
    });

    orchestrator.run().await?;

    close_pool(pool).await;
    Ok(())
}
