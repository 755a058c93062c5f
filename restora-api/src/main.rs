//! # Restora API Server
//!
//! Serves the HTTP API and, unless `WORKER_EMBEDDED=false`, runs a job runner
//! in the same process. The notification listener feeding SSE subscribers
//! always runs here.
//!
//! ```bash
//! cargo run -p restora-api
//! ```

use restora_api::{
    app::{build_router, AppState},
    config::Config,
};
use restora_shared::db::migrations::run_migrations;
use restora_shared::db::pool::{close_pool, create_pool};
use restora_worker::logging::init_tracing;
use restora_worker::orchestrator::Orchestrator;
use restora_worker::queue::GenerationQueue;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing("restora_api=debug,restora_shared=info,restora_worker=info,tower_http=debug");

    tracing::info!("Restora API server v{} starting", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    let bind_address = config.bind_address();

    let pool = create_pool(config.database.clone()).await?;
    run_migrations(&pool).await?;

    let state = AppState::new(pool.clone(), config)?;
    let shutdown = state.shutdown.clone();

    let listener_token = shutdown.clone();
    let notifications = tokio::spawn(state.hub.clone().run(pool.clone(), async move {
        listener_token.cancelled().await
    }));

    let worker = if state.config.worker.embedded {
        let queue = GenerationQueue::new(pool.clone(), state.config.worker.lease_secs);
        let orchestrator = Orchestrator::new(
            queue,
            state.vendor.clone(),
            state.config.worker.orchestrator.clone(),
        );

        let worker_token = orchestrator.shutdown_token();
        let parent = shutdown.clone();
        tokio::spawn(async move {
            parent.cancelled().await;
            worker_token.cancel();
        });

        tracing::info!("Embedded job runner enabled");
        Some(tokio::spawn(async move { orchestrator.run().await }))
    } else {
        None
    };

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!("Listening on http://{}", bind_address);

    let server_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
            server_token.cancel();
        })
        .await?;

    shutdown.cancel();

    if let Some(worker) = worker {
        match worker.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Job runner stopped with an error"),
            Err(e) => tracing::error!(error = %e, "Job runner task panicked"),
        }
    }
    let _ = notifications.await;

    close_pool(pool).await;
    tracing::info!("Shutdown complete");

    Ok(())
}
