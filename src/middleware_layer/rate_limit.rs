use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use redis::aio::ConnectionManager;

use crate::{
    error::{AppError, Result},
    middleware_layer::client::extract_real_ip,
    state::AppState,
};

/// A fixed-window, per-client request limiter backed by Redis.
#[derive(Clone)]
pub struct RateLimiter {
    redis: ConnectionManager,
    max_attempts: u32,
    window_secs: u64,
}

/// Builds the Redis key counting `ip`'s requests to `scope`.
pub fn limit_key(scope: &str, ip: &str) -> String {
    format!("rate_limit:{}:{}", scope.trim_matches('/').replace('/', ":"), ip)
}

impl RateLimiter {
    /// Connects a new `RateLimiter`.
    pub async fn connect(redis_url: &str, max_attempts: u32, window_secs: u64) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let redis = ConnectionManager::new(client).await?;
        Ok(Self {
            redis,
            max_attempts,
            window_secs,
        })
    }

    /// Counts one request and returns the seconds to wait if the limit is exceeded.
    pub async fn hit(&self, key: &str) -> Result<Option<i64>> {
        let mut redis = self.redis.clone();

        let (count, mut ttl): (u32, i64) = redis::pipe()
            .atomic()
            .incr(key, 1)
            .ttl(key)
            .query_async(&mut redis)
            .await?;

        // A counter without expiry would never reset, so any hit that finds one arms it.
        if ttl < 0 {
            let _: () = redis::cmd("EXPIRE")
                .arg(key)
                .arg(self.window_secs)
                .query_async(&mut redis)
                .await?;
            ttl = i64::try_from(self.window_secs).unwrap_or(i64::MAX);
        }

        Ok(retry_after(count, self.max_attempts, ttl))
    }
}

/// Seconds to wait once `count` is past `max_attempts`, never less than one.
fn retry_after(count: u32, max_attempts: u32, ttl: i64) -> Option<i64> {
    (count > max_attempts).then(|| ttl.max(1))
}

/// A middleware that rate limits the token endpoints per client IP.
///
/// Redis failures are logged and let the request through.
pub async fn rate_limit_tokens(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(limiter) = state.limiter.as_ref() else {
        return next.run(req).await;
    };

    let (parts, body) = req.into_parts();
    let key = limit_key(parts.uri.path(), &extract_real_ip(&parts));
    let req = Request::from_parts(parts, body);

    match limiter.hit(&key).await {
        Ok(None) => next.run(req).await,
        Ok(Some(retry_after)) => AppError::RateLimitExceeded(format!(
            "Too many requests. Try again in {} seconds",
            retry_after
        ))
        .into_response(),
        Err(e) => {
            tracing::warn!("⚠️ Rate limiter unavailable, allowing request: {}", e);
            next.run(req).await
        }
    }
}
