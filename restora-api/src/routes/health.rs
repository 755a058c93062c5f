/// Health check endpoint
///
/// ```text
/// GET /health
/// ```
///
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "database": "connected",
///   "active_generations": 2
/// }
/// ```
///
/// A database failure reports `degraded` with 200 so load balancers can tell
/// a slow dependency from a dead process.

use crate::{app::AppState, error::ApiResult};
use axum::{extract::State, Json};
use restora_shared::db::pool::health_check as database_health;
use restora_shared::models::generation::GenerationRecord;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database: String,

    /// Generations pending or processing; absent when the database is down
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_generations: Option<i64>,
}

pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let connected = match database_health(&state.db).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Health check: database unreachable");
            false
        }
    };

    let active_generations = if connected {
        GenerationRecord::count_active(&state.db).await.ok()
    } else {
        None
    };

    Ok(Json(HealthResponse {
        status: if connected { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: if connected { "connected" } else { "disconnected" }.to_string(),
        active_generations,
    }))
}
