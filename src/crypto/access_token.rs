//! Signed, time-bounded access tokens carrying the refresh binding signature.

use std::fmt;

use chrono::{Duration, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode as jwt_decode,
    encode as jwt_encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{AppError, Result};

const ALGORITHM: Algorithm = Algorithm::HS512;
const REQUIRED_CLAIMS: [&str; 4] = ["exp", "iat", "iss", "sub"];

/// JWT claims embedded in access tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Expiry (unix timestamp).
    pub exp: i64,
    /// Issued at (unix timestamp).
    pub iat: i64,
    /// Issuer identifier.
    pub iss: String,
    /// Subject, the identity the pair was issued to.
    pub sub: String,
    /// Digest of the companion refresh token.
    pub refresh_sig: String,
}

/// Why an access token was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRejection {
    /// Authentic, but past its `exp`.
    Expired,
    /// Bad signature, malformed, missing claims or foreign issuer.
    Invalid,
}

impl fmt::Display for TokenRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenRejection::Expired => f.write_str("expired"),
            TokenRejection::Invalid => f.write_str("invalid"),
        }
    }
}

impl From<TokenRejection> for AppError {
    fn from(rejection: TokenRejection) -> Self {
        AppError::InvalidToken(rejection)
    }
}

/// Encodes a signed access token.
///
/// # Arguments
///
/// * `identity` - The subject of the token.
/// * `signature` - The binding signature of the companion refresh token.
/// * `issuer` - The issuer identifier.
/// * `secret` - The symmetric signing key.
/// * `ttl` - Lifetime counted from now.
pub fn encode(
    identity: &str,
    signature: &str,
    issuer: &str,
    secret: &[u8],
    ttl: Duration,
) -> Result<String> {
    let now = Utc::now();
    let claims = AccessClaims {
        exp: (now + ttl).timestamp(),
        iat: now.timestamp(),
        iss: issuer.to_string(),
        sub: identity.to_string(),
        refresh_sig: signature.to_string(),
    };

    jwt_encode(
        &Header::new(ALGORITHM),
        &claims,
        &EncodingKey::from_secret(secret),
    )
    .map_err(|e| AppError::Internal(format!("jwt encode: {}", e)))
}

fn validation() -> Validation {
    let mut validation = Validation::new(ALGORITHM);
    validation.set_required_spec_claims(&REQUIRED_CLAIMS);
    validation.leeway = 0;
    validation
}

/// Verifies and decodes an access token, including its expiry.
pub fn decode(token: &str, secret: &[u8]) -> std::result::Result<AccessClaims, TokenRejection> {
    let key = DecodingKey::from_secret(secret);
    jwt_decode::<AccessClaims>(token, &key, &validation())
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => TokenRejection::Expired,
            _ => {
                tracing::debug!("Access token rejected: {}", e);
                TokenRejection::Invalid
            }
        })
}

/// Encoder/decoder bound to the process-wide issuer, key and lifetime.
#[derive(Clone)]
pub struct AccessTokenCodec {
    issuer: String,
    secret: Zeroizing<Vec<u8>>,
    ttl: Duration,
}

impl AccessTokenCodec {
    /// Creates a new `AccessTokenCodec`.
    pub fn new(issuer: impl Into<String>, secret: &[u8], ttl: Duration) -> Self {
        Self {
            issuer: issuer.into(),
            secret: Zeroizing::new(secret.to_vec()),
            ttl,
        }
    }

    /// Mints a token for `identity` bound to `signature`.
    pub fn encode(&self, identity: &str, signature: &str) -> Result<String> {
        encode(identity, signature, &self.issuer, &self.secret, self.ttl)
    }

    /// Strict decode: signature, shape, issuer and expiry.
    pub fn decode(&self, token: &str) -> std::result::Result<AccessClaims, TokenRejection> {
        self.check_issuer(decode(token, &self.secret)?)
    }

    fn check_issuer(
        &self,
        claims: AccessClaims,
    ) -> std::result::Result<AccessClaims, TokenRejection> {
        if claims.iss != self.issuer {
            tracing::warn!("Access token from foreign issuer: {}", claims.iss);
            return Err(TokenRejection::Invalid);
        }
        Ok(claims)
    }
}
