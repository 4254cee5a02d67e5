//! Durable installation store backed by a single-file SQLite database.
//!
//! The contract is deliberately narrow: get / put / delete, keyed by the
//! GitHub installation id. Put replaces the whole record in one statement,
//! so readers never observe a partially-written row. A missing row is `None`,
//! not an error.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::models::error::BridgeError;
use crate::models::installation::Installation;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS installations (
    id INTEGER PRIMARY KEY,
    owner TEXT NOT NULL,
    org TEXT,
    created_at TEXT NOT NULL,
    access_token TEXT,
    refresh_token TEXT,
    token_expires_at TEXT
)";

#[derive(Clone)]
pub struct InstallationStore {
    pool: SqlitePool,
}

impl InstallationStore {
    /// Open (creating if needed) the database at `path` and ensure the schema.
    pub async fn open(path: &str) -> Result<Self, BridgeError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, BridgeError> {
        sqlx::query(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn get(&self, id: i64) -> Result<Option<Installation>, BridgeError> {
        let row = sqlx::query(
            "SELECT id, owner, org, created_at, access_token, refresh_token, token_expires_at
             FROM installations WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Installation {
            id: row.get("id"),
            owner: row.get("owner"),
            org: row.get("org"),
            created_at: row.get::<DateTime<Utc>, _>("created_at"),
            access_token: row.get("access_token"),
            refresh_token: row.get("refresh_token"),
            token_expires_at: row.get::<Option<DateTime<Utc>>, _>("token_expires_at"),
        }))
    }

    /// Durably store the record, replacing any previous version atomically.
    pub async fn put(&self, installation: &Installation) -> Result<(), BridgeError> {
        sqlx::query(
            "INSERT OR REPLACE INTO installations
                 (id, owner, org, created_at, access_token, refresh_token, token_expires_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(installation.id)
        .bind(&installation.owner)
        .bind(&installation.org)
        .bind(installation.created_at)
        .bind(&installation.access_token)
        .bind(&installation.refresh_token)
        .bind(installation.token_expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, id: i64) -> Result<(), BridgeError> {
        sqlx::query("DELETE FROM installations WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> InstallationStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        InstallationStore::with_pool(pool).await.unwrap()
    }

    #[tokio::test]
    async fn get_absent_returns_none() {
        let store = memory_store().await;
        assert!(store.get(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = memory_store().await;
        let installation = Installation::new(42, "alice", Some("acme".to_string()));
        store.put(&installation).await.unwrap();

        let loaded = store.get(42).await.unwrap().unwrap();
        assert_eq!(loaded.owner, "alice");
        assert_eq!(loaded.org.as_deref(), Some("acme"));
        assert!(loaded.is_pending());
        assert_eq!(
            loaded.created_at.timestamp(),
            installation.created_at.timestamp()
        );
    }

    #[tokio::test]
    async fn put_replaces_existing_record() {
        let store = memory_store().await;
        let mut installation = Installation::new(42, "alice", None);
        store.put(&installation).await.unwrap();

        installation.access_token = Some("token".to_string());
        installation.refresh_token = Some("refresh".to_string());
        installation.token_expires_at = Some(Utc::now() + chrono::Duration::days(30));
        store.put(&installation).await.unwrap();

        let loaded = store.get(42).await.unwrap().unwrap();
        assert!(!loaded.is_pending());
        assert_eq!(loaded.access_token.as_deref(), Some("token"));
        assert_eq!(
            loaded.token_expires_at.map(|t| t.timestamp()),
            installation.token_expires_at.map(|t| t.timestamp())
        );
    }

    #[tokio::test]
    async fn delete_removes_record() {
        let store = memory_store().await;
        store.put(&Installation::new(7, "bob", None)).await.unwrap();
        store.delete(7).await.unwrap();
        assert!(store.get(7).await.unwrap().is_none());
    }
}
