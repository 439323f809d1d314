use axum::{
    Json,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
};

use crate::{
    error::{AppError, Result},
    middleware_layer::client::ClientContext,
    models::token::{
        AccessRequest, IssueQuery, LogoutResponse, RefreshRequest, TokenPair, UserResponse,
    },
    state::AppState,
    validation::auth::{validate_guid, validate_payload},
};

/// Unwraps a JSON body, reporting a bad body as `MalformedRequest`.
fn json_body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AppError::MalformedRequest(rejection.body_text()))
}

/// Issues the first pair for an identity.
#[axum::debug_handler]
pub async fn issue(
    State(state): State<AppState>,
    client: ClientContext,
    query: std::result::Result<Query<IssueQuery>, QueryRejection>,
) -> Result<Json<TokenPair>> {
    let Query(query) =
        query.map_err(|rejection| AppError::MalformedRequest(rejection.body_text()))?;
    validate_guid(&query.guid)?;

    let pair = state
        .rotation
        .issue(&query.guid, &client.device_fingerprint, &client.network_origin)
        .await?;

    Ok(Json(pair))
}

/// Rotates a pair.
#[axum::debug_handler]
pub async fn refresh(
    State(state): State<AppState>,
    client: ClientContext,
    payload: std::result::Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<TokenPair>> {
    let payload = json_body(payload)?;
    validate_payload(&payload)?;

    let pair = state
        .rotation
        .refresh(
            &payload.access_token,
            &payload.refresh_token,
            &client.device_fingerprint,
            &client.network_origin,
        )
        .await?;

    Ok(Json(pair))
}

/// Returns the identity an access token belongs to.
#[axum::debug_handler]
pub async fn me(
    State(state): State<AppState>,
    payload: std::result::Result<Json<AccessRequest>, JsonRejection>,
) -> Result<Json<UserResponse>> {
    let payload = json_body(payload)?;
    validate_payload(&payload)?;

    let guid = state.rotation.inspect(&payload.access_token).await?;
    Ok(Json(UserResponse { guid }))
}

/// Ends the session behind an access token.
#[axum::debug_handler]
pub async fn logout(
    State(state): State<AppState>,
    payload: std::result::Result<Json<AccessRequest>, JsonRejection>,
) -> Result<Json<LogoutResponse>> {
    let payload = json_body(payload)?;
    validate_payload(&payload)?;

    state.rotation.logout(&payload.access_token).await?;
    Ok(Json(LogoutResponse {
        msg: "Ok.".to_string(),
    }))
}
