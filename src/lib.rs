use std::time::Duration;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    middleware::from_fn_with_state,
    routing::{get, post},
};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

pub mod config;
pub mod error;
pub mod state;
pub mod db;
pub mod crypto {
    pub mod secret;
    pub mod access_token;
}

pub mod models {
    pub mod session;
    pub mod user;
    pub mod token;
}

pub mod repositories {
    pub mod session;
    pub mod user;
}

pub mod services {
    pub mod notifier;
    pub mod verifier;
    pub mod rotation;
}

pub mod handlers {
    pub mod auth;
    pub mod users;
}

pub mod middleware_layer {
    pub mod client;
    pub mod rate_limit;
}

pub mod validation {
    pub mod auth;
}

use state::AppState;

/// Builds the CORS layer for the configured origins, skipping any that do not parse.
fn cors(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("⚠️ Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, header::USER_AGENT])
        .max_age(Duration::from_secs(86400))
}

/// Builds the application router.
///
/// # Arguments
///
/// * `state` - The application's state.
/// * `allowed_origins` - Origins allowed by CORS.
pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    let token_routes = Router::new()
        .route("/api/tokens", get(handlers::auth::issue))
        .route("/api/refresh", post(handlers::auth::refresh))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::rate_limit::rate_limit_tokens,
        ))
        .with_state(state.clone());

    let session_routes = Router::new()
        .route("/api/me", post(handlers::auth::me))
        .route("/api/logout", post(handlers::auth::logout))
        .route("/api/users", get(handlers::users::list_users))
        .route("/health", get(handlers::users::health))
        .with_state(state);

    Router::new()
        .merge(token_routes)
        .merge(session_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true))
                .on_request(DefaultOnRequest::default().level(Level::DEBUG))
                .on_response(DefaultOnResponse::default().level(Level::DEBUG))
                .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
        )
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(cors(allowed_origins))
}
