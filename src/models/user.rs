use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_postgres::Row;

/// Represents a principal that tokens can be issued to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// The immutable, never reused identifier.
    pub guid: String,
    /// The timestamp when the user was created.
    pub created_at: DateTime<Utc>,
    /// The timestamp when the user was last updated.
    pub updated_at: DateTime<Utc>,
    /// Soft-deletion marker.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl From<&Row> for User {
    fn from(row: &Row) -> Self {
        Self {
            guid: row.get("guid"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            deleted_at: row.get("deleted_at"),
        }
    }
}
