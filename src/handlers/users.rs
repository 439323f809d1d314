use axum::{Json, extract::State};
use serde::Serialize;

use crate::{error::Result, models::token::UserResponse, state::AppState};

/// The response payload for the health check.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Lists the known identities.
pub async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<UserResponse>>> {
    let users = state
        .rotation
        .users()
        .list()
        .await?
        .into_iter()
        .map(|guid| UserResponse { guid })
        .collect();

    Ok(Json(users))
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}
