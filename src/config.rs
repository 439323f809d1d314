use std::env;
use anyhow::{Context, Result};
use zeroize::Zeroizing;

/// The minimum accepted length of the JWT signing secret, in bytes.
const MIN_JWT_SECRET_LEN: usize = 32;
const MINUTES_PER_DAY: i64 = 24 * 60;

/// The application's configuration.
#[derive(Clone)]
pub struct Config {
    /// The address the HTTP listener binds to.
    pub bind_addr: String,
    /// The URL of the PostgreSQL database.
    pub database_url: String,
    /// The URL of the Redis server. Rate limiting is off without it.
    pub redis_url: Option<String>,
    /// The HMAC key access tokens are signed with.
    pub jwt_secret: Zeroizing<Vec<u8>>,
    /// The issuer stamped on access tokens.
    pub jwt_issuer: String,
    /// The lifetime of an access token in minutes. Defaults to the refresh lifetime.
    pub access_token_ttl_minutes: i64,
    /// The lifetime of a refresh token in days.
    pub refresh_token_ttl_days: i64,
    /// Requests allowed per client IP and window on the token endpoints.
    pub rate_limit_max_attempts: u32,
    /// The rate limit window in seconds.
    pub rate_limit_window_secs: u64,
    /// Where new-network-origin alerts are posted.
    pub anomaly_webhook_url: Option<String>,
    /// How many demo users to create when the users table is empty.
    pub user_seed_count: usize,
    /// Origins allowed by CORS.
    pub allowed_origins: Vec<String>,
}

impl Config {
    /// Creates a new `Config` from environment variables.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Config`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Creates a new `Config` from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let jwt_secret = non_empty("JWT_SECRET")
            .context("JWT_SECRET must be set (generate with: openssl rand -hex 32)")?
            .into_bytes();

        if jwt_secret.len() < MIN_JWT_SECRET_LEN {
            anyhow::bail!("JWT_SECRET must be at least {} bytes", MIN_JWT_SECRET_LEN);
        }

        let refresh_token_ttl_days: i64 = non_empty("REFRESH_TOKEN_TTL_DAYS")
            .unwrap_or_else(|| "7".to_string())
            .parse()
            .context("Invalid REFRESH_TOKEN_TTL_DAYS")?;

        // Refresh rejects expired access tokens, so the default matches the refresh lifetime.
        let access_token_ttl_minutes: i64 = match non_empty("ACCESS_TOKEN_TTL_MINUTES") {
            Some(v) => v.parse().context("Invalid ACCESS_TOKEN_TTL_MINUTES")?,
            None => refresh_token_ttl_days.saturating_mul(MINUTES_PER_DAY),
        };

        if access_token_ttl_minutes <= 0 || refresh_token_ttl_days <= 0 {
            anyhow::bail!("Token lifetimes must be positive");
        }

        Ok(Self {
            bind_addr: non_empty("BIND_ADDR").unwrap_or_else(|| "127.0.0.1:8080".to_string()),
            database_url: non_empty("DATABASE_URL").context("DATABASE_URL must be set")?,
            redis_url: non_empty("REDIS_URL"),
            jwt_secret: Zeroizing::new(jwt_secret),
            jwt_issuer: non_empty("JWT_ISSUER").unwrap_or_else(|| "pairguard".to_string()),
            access_token_ttl_minutes,
            refresh_token_ttl_days,
            rate_limit_max_attempts: non_empty("RATE_LIMIT_MAX_ATTEMPTS")
                .unwrap_or_else(|| "30".to_string())
                .parse()
                .context("Invalid RATE_LIMIT_MAX_ATTEMPTS")?,
            rate_limit_window_secs: non_empty("RATE_LIMIT_WINDOW_SECS")
                .unwrap_or_else(|| "60".to_string())
                .parse()
                .context("Invalid RATE_LIMIT_WINDOW_SECS")?,
            anomaly_webhook_url: non_empty("ANOMALY_WEBHOOK_URL"),
            user_seed_count: non_empty("USER_SEED_COUNT")
                .unwrap_or_else(|| "0".to_string())
                .parse()
                .context("Invalid USER_SEED_COUNT")?,
            allowed_origins: non_empty("ALLOWED_ORIGINS")
                .unwrap_or_else(|| "http://localhost:8080,http://127.0.0.1:8080".to_string())
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect(),
        })
    }
}
