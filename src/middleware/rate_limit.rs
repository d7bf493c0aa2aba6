//! Per-client rate limiting.
//!
//! Fixed-window counting in memory. Requests are keyed by the authenticated
//! user id when the auth middleware has already run, falling back to the
//! client IP for anonymous traffic.

use crate::auth::models::Claims;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 120,
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Arc<Mutex<HashMap<String, Window>>>,
}

struct Window {
    count: u32,
    started_at: Instant,
}

enum Decision {
    Allowed,
    Rejected { retry_after: Duration },
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn check(&self, key: &str) -> Decision {
        let mut windows = self.windows.lock();
        let now = Instant::now();

        let window = windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            started_at: now,
        });

        if now.duration_since(window.started_at) >= self.config.window {
            window.count = 0;
            window.started_at = now;
        }

        window.count += 1;

        if window.count > self.config.max_requests {
            let reset_at = window.started_at + self.config.window;
            Decision::Rejected {
                retry_after: reset_at.duration_since(now),
            }
        } else {
            Decision::Allowed
        }
    }

    /// Drop windows that have aged out (call from a background task).
    pub fn cleanup(&self) {
        let window = self.config.window;
        let now = Instant::now();
        self.windows
            .lock()
            .retain(|_, w| now.duration_since(w.started_at) < window * 2);
    }
}

pub async fn rate_limit_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(limiter): State<RateLimiter>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let key = request
        .extensions()
        .get::<Claims>()
        .map(|c| format!("user:{}", c.sub))
        .unwrap_or_else(|| format!("ip:{}", addr.ip()));

    match limiter.check(&key) {
        Decision::Allowed => next.run(request).await,
        Decision::Rejected { retry_after } => {
            warn!(
                key = %key,
                retry_after_secs = retry_after.as_secs(),
                "rate limit exceeded"
            );

            let body = serde_json::json!({
                "error": "rate_limit_exceeded",
                "retry_after_seconds": retry_after.as_secs(),
            });

            (
                StatusCode::TOO_MANY_REQUESTS,
                [("Retry-After", retry_after.as_secs().to_string())],
                axum::Json(body),
            )
                .into_response()
        }
    }
}
