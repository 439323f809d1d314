use std::convert::Infallible;
use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{header, request::Parts},
};

/// The peer address used when the connection info is unavailable.
pub const UNKNOWN_ORIGIN: &str = "unknown";

/// Extracts the real IP address from the request extensions.
///
/// # Returns
///
/// The IP address as a string, or "unknown" if not found.
pub fn extract_real_ip(parts: &Parts) -> String {
    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_ORIGIN.to_string())
}

/// The device and network context a request arrives with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientContext {
    /// The raw User-Agent header, empty when absent.
    pub device_fingerprint: String,
    /// The peer IP address.
    pub network_origin: String,
}

impl<S> FromRequestParts<S> for ClientContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let device_fingerprint = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        Ok(ClientContext {
            device_fingerprint,
            network_origin: extract_real_ip(parts),
        })
    }
}
