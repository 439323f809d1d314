use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use deadpool_postgres::Pool;
use tokio::sync::RwLock;
use tokio_postgres::error::SqlState;

use crate::{
    error::{AppError, Result},
    models::session::{NewSession, SessionRecord},
};

/// Durable storage for session records, keyed by identity.
///
/// Implementations keep at most one live (not soft-deleted) record per identity.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persists a new record and returns its id.
    async fn create(&self, session: NewSession) -> Result<i64>;

    /// Finds the live record for an identity.
    async fn find_by_identity(&self, identity: &str) -> Result<Option<SessionRecord>>;

    /// Soft-deletes a live record. `NotFound` if it is not live.
    async fn delete_by_id(&self, id: i64) -> Result<()>;

    /// Atomically deletes `expected` (or asserts no live record when `None`)
    /// and inserts `session`. Fails with `Conflict` without writing anything
    /// when the identity's live record is not the expected one.
    async fn replace(&self, expected: Option<i64>, session: NewSession) -> Result<i64>;
}

const SESSION_COLUMNS: &str = "id, identity, device_fingerprint, network_origin, \
     refresh_secret_hash, expires_at, created_at, deleted_at";

fn conflict_on_unique_violation(e: tokio_postgres::Error) -> AppError {
    if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
        AppError::Conflict("A live session already exists for this identity".to_string())
    } else {
        AppError::Database(e)
    }
}

/// PostgreSQL-backed session store.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: Pool,
}

impl PgSessionStore {
    /// Creates a new `PgSessionStore`.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(&self, session: NewSession) -> Result<i64> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                r#"
                INSERT INTO sessions
                    (identity, device_fingerprint, network_origin, refresh_secret_hash, expires_at)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id
                "#,
                &[
                    &session.identity,
                    &session.device_fingerprint,
                    &session.network_origin,
                    &session.refresh_secret_hash,
                    &session.expires_at,
                ],
            )
            .await
            .map_err(conflict_on_unique_violation)?;

        let id: i64 = row.get("id");
        tracing::debug!("✅ Session {} created for {}", id, session.identity);
        Ok(id)
    }

    async fn find_by_identity(&self, identity: &str) -> Result<Option<SessionRecord>> {
        let client = self.pool.get().await?;
        let query = format!(
            "SELECT {} FROM sessions WHERE identity = $1 AND deleted_at IS NULL",
            SESSION_COLUMNS
        );
        let row = client.query_opt(query.as_str(), &[&identity]).await?;
        Ok(row.as_ref().map(SessionRecord::from))
    }

    async fn delete_by_id(&self, id: i64) -> Result<()> {
        let client = self.pool.get().await?;
        let affected = client
            .execute(
                "UPDATE sessions SET deleted_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
                &[&id],
            )
            .await?;

        if affected == 0 {
            return Err(AppError::NotFound);
        }

        tracing::debug!("🗑️ Session {} deleted", id);
        Ok(())
    }

    async fn replace(&self, expected: Option<i64>, session: NewSession) -> Result<i64> {
        let mut client = self.pool.get().await?;
        let transaction = client.transaction().await?;

        match expected {
            Some(id) => {
                let affected = transaction
                    .execute(
                        r#"
                        UPDATE sessions SET deleted_at = NOW()
                        WHERE id = $1 AND identity = $2 AND deleted_at IS NULL
                        "#,
                        &[&id, &session.identity],
                    )
                    .await?;

                if affected == 0 {
                    tracing::warn!(
                        "⚠️ Session {} for {} was superseded concurrently",
                        id,
                        session.identity
                    );
                    return Err(AppError::Conflict(
                        "Session was rotated concurrently".to_string(),
                    ));
                }
            }
            None => {
                let live = transaction
                    .query_opt(
                        "SELECT id FROM sessions WHERE identity = $1 AND deleted_at IS NULL FOR UPDATE",
                        &[&session.identity],
                    )
                    .await?;

                if live.is_some() {
                    return Err(AppError::Conflict(
                        "A live session already exists for this identity".to_string(),
                    ));
                }
            }
        }

        let row = transaction
            .query_one(
                r#"
                INSERT INTO sessions
                    (identity, device_fingerprint, network_origin, refresh_secret_hash, expires_at)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id
                "#,
                &[
                    &session.identity,
                    &session.device_fingerprint,
                    &session.network_origin,
                    &session.refresh_secret_hash,
                    &session.expires_at,
                ],
            )
            .await
            .map_err(conflict_on_unique_violation)?;

        transaction.commit().await?;

        let id: i64 = row.get("id");
        tracing::debug!(
            "🔄 Session {:?} replaced by {} for {}",
            expected,
            id,
            session.identity
        );
        Ok(id)
    }
}

/// In-process session store for tests and single-node development.
///
/// Keeps soft-deleted rows alongside live ones, mirroring the PostgreSQL table.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    inner: Arc<RwLock<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    rows: HashMap<i64, SessionRecord>,
}

impl MemoryState {
    fn live_for(&self, identity: &str) -> Option<&SessionRecord> {
        self.rows
            .values()
            .find(|r| r.identity == identity && r.deleted_at.is_none())
    }

    fn insert(&mut self, session: NewSession) -> i64 {
        self.next_id += 1;
        let id = self.next_id;
        self.rows.insert(id, session.into_record(id, Utc::now()));
        id
    }
}

impl MemorySessionStore {
    /// Creates a new, empty `MemorySessionStore`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live records across all identities.
    pub async fn live_count(&self) -> usize {
        let state = self.inner.read().await;
        state.rows.values().filter(|r| r.deleted_at.is_none()).count()
    }

    /// All records for an identity, soft-deleted ones included.
    pub async fn history(&self, identity: &str) -> Vec<SessionRecord> {
        let state = self.inner.read().await;
        let mut rows: Vec<_> = state
            .rows
            .values()
            .filter(|r| r.identity == identity)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.id);
        rows
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, session: NewSession) -> Result<i64> {
        let mut state = self.inner.write().await;
        if state.live_for(&session.identity).is_some() {
            return Err(AppError::Conflict(
                "A live session already exists for this identity".to_string(),
            ));
        }
        Ok(state.insert(session))
    }

    async fn find_by_identity(&self, identity: &str) -> Result<Option<SessionRecord>> {
        let state = self.inner.read().await;
        Ok(state.live_for(identity).cloned())
    }

    async fn delete_by_id(&self, id: i64) -> Result<()> {
        let mut state = self.inner.write().await;
        match state.rows.get_mut(&id) {
            Some(row) if row.deleted_at.is_none() => {
                row.deleted_at = Some(Utc::now());
                Ok(())
            }
            _ => Err(AppError::NotFound),
        }
    }

    async fn replace(&self, expected: Option<i64>, session: NewSession) -> Result<i64> {
        let mut state = self.inner.write().await;
        let live = state.live_for(&session.identity).map(|r| r.id);

        if live != expected {
            return Err(AppError::Conflict(match expected {
                Some(_) => "Session was rotated concurrently".to_string(),
                None => "A live session already exists for this identity".to_string(),
            }));
        }

        if let Some(id) = live {
            if let Some(row) = state.rows.get_mut(&id) {
                row.deleted_at = Some(Utc::now());
            }
        }

        Ok(state.insert(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_session(identity: &str) -> NewSession {
        NewSession {
            identity: identity.to_string(),
            device_fingerprint: "agentA".to_string(),
            network_origin: "1.1.1.1".to_string(),
            refresh_secret_hash: "$argon2id$placeholder".to_string(),
            expires_at: Utc::now() + Duration::days(7),
        }
    }

    #[tokio::test]
    async fn create_then_find() {
        let store = MemorySessionStore::new();
        let id = store.create(new_session("u1")).await.unwrap();

        let found = store.find_by_identity("u1").await.unwrap().unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.device_fingerprint, "agentA");
        assert!(store.find_by_identity("u2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn second_live_record_is_refused() {
        let store = MemorySessionStore::new();
        store.create(new_session("u1")).await.unwrap();

        let err = store.create(new_session("u1")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn delete_is_soft_and_not_repeatable() {
        let store = MemorySessionStore::new();
        let id = store.create(new_session("u1")).await.unwrap();

        store.delete_by_id(id).await.unwrap();
        assert!(store.find_by_identity("u1").await.unwrap().is_none());
        assert!(matches!(
            store.delete_by_id(id).await.unwrap_err(),
            AppError::NotFound
        ));

        let history = store.history("u1").await;
        assert_eq!(history.len(), 1);
        assert!(history[0].deleted_at.is_some());
    }

    #[tokio::test]
    async fn replace_leaves_exactly_one_live_record() {
        let store = MemorySessionStore::new();
        let old = store.create(new_session("u1")).await.unwrap();

        let new = store.replace(Some(old), new_session("u1")).await.unwrap();
        assert_ne!(old, new);
        assert_eq!(store.find_by_identity("u1").await.unwrap().unwrap().id, new);
        assert_eq!(store.live_count().await, 1);
    }

    #[tokio::test]
    async fn stale_expectation_is_a_conflict() {
        let store = MemorySessionStore::new();
        let old = store.create(new_session("u1")).await.unwrap();
        let winner = store.replace(Some(old), new_session("u1")).await.unwrap();

        let err = store.replace(Some(old), new_session("u1")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(
            store.find_by_identity("u1").await.unwrap().unwrap().id,
            winner
        );
        assert_eq!(store.live_count().await, 1);
    }

    #[tokio::test]
    async fn replace_without_expectation_requires_no_live_record() {
        let store = MemorySessionStore::new();
        store.replace(None, new_session("u1")).await.unwrap();

        let err = store.replace(None, new_session("u1")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn concurrent_rotations_have_one_winner() {
        let store = MemorySessionStore::new();
        let old = store.create(new_session("u1")).await.unwrap();

        let (a, b) = tokio::join!(
            store.replace(Some(old), new_session("u1")),
            store.replace(Some(old), new_session("u1")),
        );

        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        assert_eq!(store.live_count().await, 1);
    }
}
