use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::middleware_layer::rate_limit::RateLimiter;
use crate::repositories::{
    session::PgSessionStore,
    user::PgUserRepository,
};
use crate::services::{
    notifier::{AnomalyNotifier, LogNotifier, WebhookNotifier},
    rotation::{RotationService, TokenSettings},
};

/// The application's state.
#[derive(Clone)]
pub struct AppState {
    /// The token lifecycle service.
    pub rotation: Arc<RotationService>,
    /// The per-IP limiter for the token endpoints, when Redis is configured.
    pub limiter: Option<RateLimiter>,
}

impl AppState {
    /// Creates a new `AppState` from already built parts.
    pub fn from_parts(rotation: RotationService, limiter: Option<RateLimiter>) -> Self {
        Self {
            rotation: Arc::new(rotation),
            limiter,
        }
    }

    /// Creates a new `AppState`.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `AppState`.
    pub async fn new(config: &Config) -> Result<Self> {
        let db = crate::db::create_pool(&config.database_url)?;
        tracing::info!("✅ PostgreSQL Pool initialized with deadpool-postgres");

        crate::db::ensure_schema(&db).await?;

        let users = PgUserRepository::new(db.clone());
        users.seed(config.user_seed_count).await?;

        let notifier: Arc<dyn AnomalyNotifier> = match config.anomaly_webhook_url.as_deref() {
            Some(url) => {
                tracing::info!("✅ Anomaly webhook configured");
                Arc::new(WebhookNotifier::new(url)?)
            }
            None => {
                tracing::warn!("⚠️ ANOMALY_WEBHOOK_URL not set, anomalies are only logged");
                Arc::new(LogNotifier)
            }
        };

        let limiter = match config.redis_url.as_deref() {
            Some(url) => {
                let limiter = RateLimiter::connect(
                    url,
                    config.rate_limit_max_attempts,
                    config.rate_limit_window_secs,
                )
                .await?;
                tracing::info!("✅ Redis Connection Manager initialized (rate limiting on)");
                Some(limiter)
            }
            None => {
                tracing::warn!("⚠️ REDIS_URL not set, rate limiting disabled");
                None
            }
        };

        let rotation = RotationService::new(
            TokenSettings::from(config),
            Arc::new(PgSessionStore::new(db)),
            Arc::new(users),
            notifier,
        );

        Ok(Self::from_parts(rotation, limiter))
    }
}
