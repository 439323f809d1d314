use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use deadpool_postgres::Pool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{error::Result, models::user::User};

/// Answers whether an identity exists before tokens are issued to it.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    /// Whether a live user with this guid exists.
    async fn exists(&self, guid: &str) -> Result<bool>;

    /// Guids of all live users.
    async fn list(&self) -> Result<Vec<String>>;
}

/// PostgreSQL-backed user repository.
#[derive(Clone)]
pub struct PgUserRepository {
    pool: Pool,
}

impl PgUserRepository {
    /// Creates a new `PgUserRepository`.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Creates a user with a fresh random guid.
    pub async fn create(&self) -> Result<User> {
        let client = self.pool.get().await?;
        let guid = Uuid::new_v4().to_string();
        let row = client
            .query_one(
                r#"
                INSERT INTO users (guid)
                VALUES ($1)
                RETURNING guid, created_at, updated_at, deleted_at
                "#,
                &[&guid],
            )
            .await?;
        Ok(User::from(&row))
    }

    /// Creates `count` users when the table is empty.
    ///
    /// # Returns
    ///
    /// The number of users created.
    pub async fn seed(&self, count: usize) -> Result<usize> {
        if count == 0 || !self.list().await?.is_empty() {
            return Ok(0);
        }

        for _ in 0..count {
            let user = self.create().await?;
            tracing::debug!("👤 Seeded user {}", user.guid);
        }

        tracing::info!("✅ Seeded {} users", count);
        Ok(count)
    }
}

#[async_trait]
impl IdentityDirectory for PgUserRepository {
    async fn exists(&self, guid: &str) -> Result<bool> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT EXISTS(SELECT 1 FROM users WHERE guid = $1 AND deleted_at IS NULL)",
                &[&guid],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn list(&self) -> Result<Vec<String>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT guid FROM users WHERE deleted_at IS NULL ORDER BY created_at",
                &[],
            )
            .await?;
        Ok(rows.iter().map(|r| r.get("guid")).collect())
    }
}

/// Fixed in-process directory.
#[derive(Clone, Default)]
pub struct MemoryIdentityDirectory {
    guids: Arc<RwLock<BTreeSet<String>>>,
}

impl MemoryIdentityDirectory {
    /// Creates a directory containing the given guids.
    pub fn with_users<I, S>(guids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            guids: Arc::new(RwLock::new(guids.into_iter().map(Into::into).collect())),
        }
    }

    /// Adds a guid.
    pub async fn insert(&self, guid: impl Into<String>) {
        self.guids.write().await.insert(guid.into());
    }
}

#[async_trait]
impl IdentityDirectory for MemoryIdentityDirectory {
    async fn exists(&self, guid: &str) -> Result<bool> {
        Ok(self.guids.read().await.contains(guid))
    }

    async fn list(&self) -> Result<Vec<String>> {
        Ok(self.guids.read().await.iter().cloned().collect())
    }
}
