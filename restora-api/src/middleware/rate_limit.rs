/// Per-user rate limiting for job submission
///
/// Fixed windows kept in process memory: each user may submit
/// `limit` jobs per `window`. The count resets when the window that started
/// with the user's first request ends. Limits are per API process.
///
/// # Headers
///
/// - `X-RateLimit-Limit`: requests allowed per window
/// - `X-RateLimit-Remaining`: requests left in the current window
/// - `X-RateLimit-Reset`: seconds until the window resets
/// - `Retry-After`: seconds to wait (429 responses only)

use crate::app::AppState;
use crate::error::ApiError;
use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use restora_shared::auth::middleware::AuthContext;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Expired windows are swept once the map grows past this
const SWEEP_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Outcome of one check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,

    /// Seconds until the window resets
    pub reset_after: u64,
}

/// In-memory fixed-window counter keyed by user
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    windows: DashMap<Uuid, Window>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: DashMap::new(),
        }
    }

    /// Counts one request for `key`
    pub fn check(&self, key: Uuid) -> RateLimitDecision {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: Uuid, now: Instant) -> RateLimitDecision {
        // Sweep before taking the entry; retain locks every shard.
        if self.windows.len() > SWEEP_THRESHOLD {
            let window = self.window;
            self.windows.retain(|_, w| now.duration_since(w.started) < window);
        }

        let mut entry = self.windows.entry(key).or_insert(Window { started: now, count: 0 });
        if now.duration_since(entry.started) >= self.window {
            *entry = Window { started: now, count: 0 };
        }

        let allowed = entry.count < self.limit;
        if allowed {
            entry.count += 1;
        }

        let elapsed = now.duration_since(entry.started);
        let reset_after = self.window.saturating_sub(elapsed).as_secs_f64().ceil() as u64;

        RateLimitDecision {
            allowed,
            limit: self.limit,
            remaining: self.limit - entry.count,
            reset_after: reset_after.max(1),
        }
    }
}

/// Rejects submissions over the caller's limit with 429
///
/// Must run after authentication.
pub async fn rate_limit_layer(
    State(state): State<AppState>,
    auth: AuthContext,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let decision = state.rate_limiter.check(auth.user_id);

    if !decision.allowed {
        tracing::warn!(user_id = %auth.user_id, retry_after = decision.reset_after, "Submission rate limit exceeded");
        return Err(ApiError::RateLimitExceeded {
            retry_after: decision.reset_after,
            message: format!(
                "At most {} submissions per {} seconds",
                decision.limit,
                state.config.rate_limit.window_secs
            ),
        });
    }

    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(decision.reset_after));

    Ok(response)
}
