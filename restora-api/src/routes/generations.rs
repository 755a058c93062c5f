/// Generation record endpoints
///
/// - `GET /v1/generations` - Caller's records, newest first
/// - `GET /v1/generations/:id` - One record
/// - `GET /v1/generations/:id/events` - Server-Sent Events with status changes
///
/// Records of other users are reported as not found.

use super::Pagination;
use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::{self, Stream};
use restora_shared::{
    auth::middleware::AuthContext,
    models::generation::{GenerationRecord, GenerationStatus},
    notify::GenerationUpdate,
};
use serde::Serialize;
use sqlx::PgPool;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Without a notification for this long, the stream re-reads the record
const RESYNC_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Serialize)]
pub struct GenerationsResponse {
    pub generations: Vec<GenerationRecord>,
    pub limit: i64,
    pub offset: i64,
}

pub async fn list_generations(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(page): Query<Pagination>,
) -> ApiResult<Json<GenerationsResponse>> {
    let (limit, offset) = (page.limit(), page.offset());
    let generations = GenerationRecord::list_by_user(&state.db, auth.user_id, limit, offset).await?;

    Ok(Json(GenerationsResponse {
        generations,
        limit,
        offset,
    }))
}

/// Get one generation record
///
/// # Errors
///
/// - `404 Not Found`: No such record for this user
pub async fn get_generation(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<GenerationRecord>> {
    let record = GenerationRecord::find_for_user(&state.db, id, auth.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Generation not found".to_string()))?;

    Ok(Json(record))
}

/// Stream status changes of one generation
///
/// ```text
/// GET /v1/generations/:id/events
/// Accept: text/event-stream
/// ```
///
/// # Events
///
/// ```text
/// event: status
/// data: {"id":"...","user_id":"...","status":"processing","result_url":null,"error_message":null}
/// ```
///
/// The current state is sent first. The stream ends after a `completed` or
/// `failed` event, so a finished record yields exactly one event. It also
/// ends when the server shuts down.
///
/// # Errors
///
/// - `404 Not Found`: No such record for this user
pub async fn generation_events(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, axum::Error>>>> {
    // Subscribe before reading so no update between the read and the
    // subscription is missed.
    let receiver = state.hub.subscribe();

    let record = GenerationRecord::find_for_user(&state.db, id, auth.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Generation not found".to_string()))?;

    tracing::debug!(generation_id = %id, status = record.status.as_str(), "SSE subscriber attached");

    let follower = StatusFollower {
        db: state.db.clone(),
        id,
        user_id: auth.user_id,
        receiver,
        initial: Some(GenerationUpdate::from(&record)),
        last_status: None,
        shutdown: state.shutdown.clone(),
    };

    Ok(Sse::new(status_stream(follower)).keep_alive(KeepAlive::default()))
}

fn status_stream(follower: StatusFollower) -> impl Stream<Item = Result<Event, axum::Error>> {
    stream::unfold(Some(follower), |follower| async move {
        let mut follower = follower?;
        let update = follower.next_update().await?;

        let finished = update.status.is_terminal();
        let event = Event::default().event("status").json_data(&update);

        Some((event, (!finished).then_some(follower)))
    })
}

/// Hub subscription filtered to one record
struct StatusFollower {
    db: PgPool,
    id: Uuid,
    user_id: Uuid,
    receiver: broadcast::Receiver<GenerationUpdate>,
    initial: Option<GenerationUpdate>,
    last_status: Option<GenerationStatus>,
    shutdown: CancellationToken,
}

impl StatusFollower {
    /// Next status change, or `None` once the hub is gone or shutdown starts
    async fn next_update(&mut self) -> Option<GenerationUpdate> {
        if let Some(initial) = self.initial.take() {
            self.last_status = Some(initial.status);
            return Some(initial);
        }

        loop {
            let received = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return None,
                received = tokio::time::timeout(RESYNC_INTERVAL, self.receiver.recv()) => received,
            };

            let candidate = match received {
                Ok(Ok(update)) if update.id == self.id => Some(update),
                Ok(Ok(_)) => None,
                Ok(Err(RecvError::Lagged(skipped))) => {
                    tracing::debug!(generation_id = %self.id, skipped, "SSE subscriber lagged, reloading");
                    self.reload().await
                }
                Ok(Err(RecvError::Closed)) => return None,
                Err(_) => self.reload().await,
            };

            if let Some(update) = candidate {
                if self.last_status != Some(update.status) {
                    self.last_status = Some(update.status);
                    return Some(update);
                }
            }
        }
    }

    async fn reload(&self) -> Option<GenerationUpdate> {
        match GenerationRecord::find_for_user(&self.db, self.id, self.user_id).await {
            Ok(record) => record.as_ref().map(GenerationUpdate::from),
            Err(e) => {
                tracing::warn!(generation_id = %self.id, error = %e, "Failed to reload generation");
                None
            }
        }
    }
}
