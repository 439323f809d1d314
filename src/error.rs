use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::crypto::access_token::TokenRejection;

/// The application's error type.
///
/// Every caller-visible failure maps onto exactly one variant; the response
/// body only ever carries the variant's public message.
#[derive(Error, Debug)]
pub enum AppError {
    /// The request could not be parsed.
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// The access token failed signature, shape, issuer or expiry checks.
    #[error("Invalid access token: {0}")]
    InvalidToken(TokenRejection),

    /// Tokens were requested for an identity the directory does not know.
    #[error("Unknown identity")]
    UnknownIdentity,

    /// A live session already exists, or a concurrent rotation won the race.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// No session record exists for an otherwise valid identity.
    #[error("Session not found")]
    NotFound,

    /// The refresh token does not belong to the presented access token.
    #[error("Invalid refresh/access token pair")]
    InvalidPair,

    /// The device fingerprint changed; the session has been destroyed.
    #[error("Device fingerprint changed, session terminated")]
    ForcedLogout,

    /// A database error.
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// A connection pool error.
    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// A Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// An outbound webhook error.
    #[error("Webhook error: {0}")]
    Webhook(#[from] reqwest::Error),

    /// A rate limit exceeded error.
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// An internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// The HTTP status a caller sees for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidToken(_) | AppError::InvalidPair => StatusCode::UNAUTHORIZED,
            AppError::UnknownIdentity | AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ForcedLogout => StatusCode::FORBIDDEN,
            AppError::RateLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Database(_)
            | AppError::Pool(_)
            | AppError::Redis(_)
            | AppError::Webhook(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            AppError::MalformedRequest(ref msg) => {
                tracing::debug!("Malformed request: {}", msg);
                msg.clone()
            }

            AppError::InvalidToken(TokenRejection::Expired) => {
                tracing::warn!("Expired access token presented");
                "Access token expired".to_string()
            }

            AppError::InvalidToken(TokenRejection::Invalid) => {
                tracing::warn!("Invalid access token presented");
                "Invalid access token".to_string()
            }

            AppError::UnknownIdentity => {
                tracing::debug!("Unknown identity");
                "User not found".to_string()
            }

            AppError::Conflict(ref msg) => {
                tracing::warn!("Conflict: {}", msg);
                msg.clone()
            }

            AppError::NotFound => {
                tracing::debug!("Session not found");
                "Not Found!".to_string()
            }

            AppError::InvalidPair => {
                tracing::warn!("Invalid refresh/access token pair");
                "Invalid refresh/access token pair".to_string()
            }

            AppError::ForcedLogout => {
                tracing::warn!("Forced logout after device change");
                "Your User-Agent is edited, logout".to_string()
            }

            AppError::RateLimitExceeded(ref msg) => {
                tracing::warn!("Rate limit exceeded: {}", msg);
                msg.clone()
            }

            AppError::Database(ref e) => {
                tracing::error!("Database error: {}", e);
                "Internal Server Error".to_string()
            }

            AppError::Pool(ref e) => {
                tracing::error!("Pool error: {}", e);
                "Internal Server Error".to_string()
            }

            AppError::Redis(ref e) => {
                tracing::error!("Redis error: {}", e);
                "Internal Server Error".to_string()
            }

            AppError::Webhook(ref e) => {
                tracing::error!("Webhook error: {}", e);
                "Internal Server Error".to_string()
            }

            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                "Internal Server Error".to_string()
            }
        };

        let body = sonic_rs::to_string(&sonic_rs::json!({
            "error": message
        }))
        .unwrap_or_else(|_| r#"{"error":"Internal Server Error"}"#.to_string());

        (
            status,
            [(http::header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response()
    }
}
