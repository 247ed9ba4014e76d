use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::Request,
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::error::ApiError;

/// Auth endpoints get tighter budgets than general traffic.
pub const REGISTER_POLICY: RateLimitPolicy = RateLimitPolicy {
    scope: "register",
    max_tokens: 5.0,
    window: Duration::from_secs(60),
};
pub const LOGIN_POLICY: RateLimitPolicy = RateLimitPolicy {
    scope: "login",
    max_tokens: 10.0,
    window: Duration::from_secs(60),
};
pub const GLOBAL_POLICY: RateLimitPolicy = RateLimitPolicy {
    scope: "global",
    max_tokens: 100.0,
    window: Duration::from_secs(60),
};

/// Buckets idle longer than this are dropped by the periodic purge.
const IDLE_AFTER: Duration = Duration::from_secs(10 * 60);
pub const PURGE_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy)]
pub struct RateLimitPolicy {
    pub scope: &'static str,
    pub max_tokens: f64,
    pub window: Duration,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// In-memory token-bucket limiter keyed by (scope, client identity).
/// Fine for a single instance; a scaled-out deployment would back the same
/// interface with a shared counter store.
#[derive(Default)]
pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admission check; `Err` carries the Retry-After hint in seconds.
    pub fn check(&self, client: &str, policy: RateLimitPolicy) -> Result<(), u64> {
        self.check_at(client, policy, Instant::now())
    }

    fn check_at(&self, client: &str, policy: RateLimitPolicy, now: Instant) -> Result<(), u64> {
        let key = format!("{}:{}", policy.scope, client);
        let mut bucket = self.buckets.entry(key).or_insert_with(|| Bucket {
            tokens: policy.max_tokens,
            last_refill: now,
        });

        // Refill proportionally to elapsed time, clamped to capacity.
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        let refill = elapsed.as_secs_f64() * policy.max_tokens / policy.window.as_secs_f64();
        bucket.tokens = (bucket.tokens + refill).min(policy.max_tokens);
        bucket.last_refill = now;

        if bucket.tokens < 1.0 {
            return Err(policy.window.as_secs());
        }
        bucket.tokens -= 1.0;
        Ok(())
    }

    pub fn purge_idle(&self) {
        self.purge_idle_at(Instant::now());
    }

    fn purge_idle_at(&self, now: Instant) {
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_refill) <= IDLE_AFTER);
        let purged = before - self.buckets.len();
        if purged > 0 {
            debug!(purged, "purged idle rate-limit buckets");
        }
    }
}

/// Client identity: first forwarded-for hop, else real-ip, else a shared
/// "unknown" bucket.
pub fn client_key(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .unwrap_or("unknown")
        .to_string()
}

/// Middleware body; wire it per call site with
/// `middleware::from_fn(move |req, next| admit(limiter.clone(), POLICY, req, next))`.
pub async fn admit(
    limiter: Arc<RateLimiter>,
    policy: RateLimitPolicy,
    req: Request,
    next: Next,
) -> Response {
    let client = client_key(req.headers());
    match limiter.check(&client, policy) {
        Ok(()) => next.run(req).await,
        Err(retry_after_secs) => {
            warn!(scope = policy.scope, %client, "rate limit exceeded");
            ApiError::RateLimited { retry_after_secs }.into_response()
        }
    }
}
