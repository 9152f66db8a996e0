//! src/services/metadata_store.rs
//!
//! Typed access to the key-value store that holds every piece of gateway
//! metadata. The store speaks only scalar get/set/delete and string-set
//! operations; it knows nothing about buckets or accounts. Key naming lives
//! in `catalog::keys`.

use async_trait::async_trait;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{
    collections::{BTreeSet, HashMap},
    str::FromStr,
};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

const INIT_MIGRATION: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("value under `{key}` is corrupt: {reason}")]
    Corrupt { key: String, reason: String },
    #[error("metadata store unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Operations the gateway consumes from its key-value store.
///
/// Every call is expected to be atomic on its own. Nothing spanning several
/// calls is.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Add `member` to the set under `key`. Returns `true` if it was not
    /// already present.
    async fn set_add(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Remove `member` from the set under `key`. Returns `true` if it was present.
    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<bool>;

    async fn set_members(&self, key: &str) -> StoreResult<BTreeSet<String>>;

    async fn set_is_member(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Drop whatever lives under `key`, scalar or set.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Cheap round trip used by the readiness probe.
    async fn ping(&self) -> StoreResult<()>;
}

/// In-process store. Used by tests and by `--store memory`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    scalars: HashMap<String, String>,
    sets: HashMap<String, BTreeSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.state.read().await.scalars.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.state
            .write()
            .await
            .scalars
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        Ok(state
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        let Some(set) = state.sets.get_mut(key) else {
            return Ok(false);
        };
        let removed = set.remove(member);
        if set.is_empty() {
            state.sets.remove(key);
        }
        Ok(removed)
    }

    async fn set_members(&self, key: &str) -> StoreResult<BTreeSet<String>> {
        Ok(self
            .state
            .read()
            .await
            .sets
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_is_member(&self, key: &str, member: &str) -> StoreResult<bool> {
        Ok(self
            .state
            .read()
            .await
            .sets
            .get(key)
            .is_some_and(|set| set.contains(member)))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.scalars.remove(key);
        state.sets.remove(key);
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Store backed by a SQLite database through `sqlx`.
///
/// Scalars and sets live in two tables created by `migrations/0001_init.sql`.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a pool for `database_url`, creating the database file if needed.
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Ok(Self::new(pool))
    }

    /// Apply the schema. Safe to run more than once.
    pub async fn migrate(&self) -> StoreResult<()> {
        let statements = INIT_MIGRATION
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty());
        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM kv_scalars WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO kv_scalars (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<bool> {
        let result = sqlx::query("INSERT OR IGNORE INTO kv_sets (key, member) VALUES (?, ?)")
            .bind(key)
            .bind(member)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM kv_sets WHERE key = ? AND member = ?")
            .bind(key)
            .bind(member)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_members(&self, key: &str) -> StoreResult<BTreeSet<String>> {
        let members = sqlx::query_scalar::<_, String>("SELECT member FROM kv_sets WHERE key = ?")
            .bind(key)
            .fetch_all(&self.pool)
            .await?;
        Ok(members.into_iter().collect())
    }

    async fn set_is_member(&self, key: &str, member: &str) -> StoreResult<bool> {
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT EXISTS(SELECT 1 FROM kv_sets WHERE key = ? AND member = ?)",
        )
        .bind(key)
        .bind(member)
        .fetch_one(&self.pool)
        .await?;
        Ok(found == 1)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM kv_scalars WHERE key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM kv_sets WHERE key = ?")
            .bind(key)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        match sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await?
        {
            1 => Ok(()),
            other => Err(StoreError::Unavailable(format!(
                "unexpected result: {}",
                other
            ))),
        }
    }
}
