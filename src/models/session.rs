use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_postgres::Row;

/// Represents the server-side record of one outstanding refresh token.
///
/// Only the Argon2 hash of the refresh token is kept; the plaintext leaves
/// the process exactly once, in the issuance response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// The store-assigned identifier, used for deletion.
    pub id: i64,
    /// The guid of the owning identity.
    pub identity: String,
    /// The User-Agent presented at issuance.
    pub device_fingerprint: String,
    /// The peer address observed at issuance.
    pub network_origin: String,
    /// The salted one-way hash of the refresh token.
    pub refresh_secret_hash: String,
    /// The timestamp when the refresh token stops being accepted.
    pub expires_at: DateTime<Utc>,
    /// The timestamp when the session was created.
    pub created_at: DateTime<Utc>,
    /// Soft-deletion marker, set on logout, forced logout or rotation.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    /// Whether the record is past its expiry at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

impl From<&Row> for SessionRecord {
    fn from(row: &Row) -> Self {
        Self {
            id: row.get("id"),
            identity: row.get("identity"),
            device_fingerprint: row.get("device_fingerprint"),
            network_origin: row.get("network_origin"),
            refresh_secret_hash: row.get("refresh_secret_hash"),
            expires_at: row.get("expires_at"),
            created_at: row.get("created_at"),
            deleted_at: row.get("deleted_at"),
        }
    }
}

/// The fields a caller supplies when persisting a new session.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub identity: String,
    pub device_fingerprint: String,
    pub network_origin: String,
    pub refresh_secret_hash: String,
    pub expires_at: DateTime<Utc>,
}

impl NewSession {
    /// Materialises the record as a store would, with the given id and creation time.
    pub fn into_record(self, id: i64, created_at: DateTime<Utc>) -> SessionRecord {
        SessionRecord {
            id,
            identity: self.identity,
            device_fingerprint: self.device_fingerprint,
            network_origin: self.network_origin,
            refresh_secret_hash: self.refresh_secret_hash,
            expires_at: self.expires_at,
            created_at,
            deleted_at: None,
        }
    }
}
