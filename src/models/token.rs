use garde::Validate;
use serde::{Deserialize, Serialize};

/// A freshly minted access/refresh pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// The request payload for rotating a pair.
#[derive(Debug, Deserialize, Validate)]
pub struct RefreshRequest {
    #[garde(length(min = 1, max = 4096))]
    pub access_token: String,
    #[garde(length(min = 1, max = 4096))]
    pub refresh_token: String,
}

/// The request payload for operations that only need the access token.
#[derive(Debug, Deserialize, Validate)]
pub struct AccessRequest {
    #[garde(length(min = 1, max = 4096))]
    pub access_token: String,
}

/// The query string for issuing a pair.
#[derive(Debug, Deserialize)]
pub struct IssueQuery {
    #[serde(default)]
    pub guid: String,
}

/// The response payload identifying the caller.
#[derive(Debug, Serialize, Deserialize)]
pub struct UserResponse {
    pub guid: String,
}

/// The response payload for a successful logout.
#[derive(Debug, Serialize, Deserialize)]
pub struct LogoutResponse {
    pub msg: String,
}
