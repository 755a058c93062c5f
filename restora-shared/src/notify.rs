/// Generation status notifications
///
/// Resolving or claiming a generation publishes a [`GenerationUpdate`] with
/// Postgres `NOTIFY` on [`CHANNEL`], in the same transaction as the status
/// change, so listeners never see an update that was rolled back.
///
/// The API runs one [`NotificationHub`] per process: a single `LISTEN`
/// connection fanned out to SSE subscribers through a broadcast channel.

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgListener;
use sqlx::{PgConnection, PgPool};
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::generation::{GenerationRecord, GenerationStatus};

/// Postgres channel for generation updates
pub const CHANNEL: &str = "generation_updates";

const HUB_CAPACITY: usize = 1024;

/// Postgres rejects `NOTIFY` payloads of 8000 bytes or more
pub const MAX_PAYLOAD_BYTES: usize = 7999;
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Payload sent on [`CHANNEL`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationUpdate {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: GenerationStatus,
    pub result_url: Option<String>,
    pub error_message: Option<String>,
}

impl From<&GenerationRecord> for GenerationUpdate {
    fn from(record: &GenerationRecord) -> Self {
        Self {
            id: record.id,
            user_id: record.user_id,
            status: record.status,
            result_url: record.result_url.clone(),
            error_message: record.error_message.clone(),
        }
    }
}

/// Serializes an update for `NOTIFY`
///
/// Oversized payloads drop their text fields; subscribers still see the
/// status change and can reload the record for the rest.
pub fn encode_payload(update: &GenerationUpdate) -> Result<String, serde_json::Error> {
    let payload = serde_json::to_string(update)?;
    if payload.len() <= MAX_PAYLOAD_BYTES {
        return Ok(payload);
    }

    serde_json::to_string(&GenerationUpdate {
        result_url: None,
        error_message: None,
        ..update.clone()
    })
}

/// Queues a notification; delivered when the surrounding transaction commits
pub async fn publish(conn: &mut PgConnection, update: &GenerationUpdate) -> Result<(), sqlx::Error> {
    let payload = encode_payload(update)
        .map_err(|e| sqlx::Error::Protocol(format!("Failed to encode notification: {}", e)))?;

    sqlx::query("SELECT pg_notify($1, $2)")
        .bind(CHANNEL)
        .bind(payload)
        .execute(conn)
        .await?;

    Ok(())
}

/// Process-wide fan-out of generation updates
#[derive(Debug, Clone)]
pub struct NotificationHub {
    sender: broadcast::Sender<GenerationUpdate>,
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(HUB_CAPACITY);
        Self { sender }
    }

    /// Receives every update published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<GenerationUpdate> {
        self.sender.subscribe()
    }

    /// Hands an update to current subscribers
    pub fn dispatch(&self, update: GenerationUpdate) {
        // No subscribers is fine.
        let _ = self.sender.send(update);
    }

    /// Listens on [`CHANNEL`] and dispatches until `shutdown` resolves
    ///
    /// Connection failures are logged and retried.
    pub async fn run<F>(self, pool: PgPool, shutdown: F)
    where
        F: std::future::Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);

        loop {
            let mut listener = match connect(&pool).await {
                Ok(listener) => listener,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to LISTEN for generation updates, retrying");
                    tokio::select! {
                        _ = &mut shutdown => return,
                        _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                    }
                    continue;
                }
            };

            tracing::info!(channel = CHANNEL, "Listening for generation updates");

            loop {
                tokio::select! {
                    _ = &mut shutdown => {
                        tracing::info!("Notification listener stopped");
                        return;
                    }
                    received = listener.recv() => match received {
                        Ok(notification) => {
                            match serde_json::from_str::<GenerationUpdate>(notification.payload()) {
                                Ok(update) => self.dispatch(update),
                                Err(e) => tracing::warn!(error = %e, "Ignoring malformed notification"),
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Notification listener lost its connection");
                            break;
                        }
                    }
                }
            }
        }
    }
}

async fn connect(pool: &PgPool) -> Result<PgListener, sqlx::Error> {
    let mut listener = PgListener::connect_with(pool).await?;
    listener.listen(CHANNEL).await?;
    Ok(listener)
}
