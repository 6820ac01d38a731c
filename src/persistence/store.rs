//! SQLite-based checkpoint store

use crate::core::handle::HandleValue;
use crate::persistence::{CheckpointError, CheckpointRecord, CheckpointStore};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// SQLite checkpoint store
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
    location: String,
}

impl SqliteCheckpointStore {
    /// Open (creating if needed) a store at `db_path`
    pub async fn new(db_path: &str) -> Result<Self> {
        let in_memory = db_path == ":memory:";
        let options = if in_memory {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::new()
                .filename(db_path)
                .create_if_missing(true)
        };

        // Every in-memory connection is its own database
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .context("Failed to connect to checkpoint database")?;

        let store = Self {
            pool,
            location: db_path.to_string(),
        };
        store.init().await?;

        Ok(store)
    }

    /// Open an existing database read-only; `None` when no file is there yet
    pub async fn open_existing(db_path: &Path) -> Result<Option<Self>> {
        if !db_path.exists() {
            return Ok(None);
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .read_only(true)
            .create_if_missing(false);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open checkpoint database {}", db_path.display()))?;

        Ok(Some(Self {
            pool,
            location: db_path.to_string_lossy().into_owned(),
        }))
    }

    pub async fn in_memory() -> Result<Self> {
        Self::new(":memory:").await
    }

    /// Default database under the platform data directory, one per network
    pub fn default_path(network: &str) -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("provision")
            .join(format!("{}.db", network))
    }

    /// Database file, or `:memory:`
    pub fn location(&self) -> &Path {
        Path::new(&self.location)
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                step TEXT PRIMARY KEY,
                completed_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS handles (
                name TEXT PRIMARY KEY,
                step TEXT NOT NULL,
                value_json TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_handles_step ON handles(step)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, CheckpointError> {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(backend)
    }
}

fn backend(err: impl std::fmt::Display) -> CheckpointError {
    CheckpointError::Backend(err.to_string())
}

#[async_trait::async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn has_completed(&self, step: &str) -> Result<bool, CheckpointError> {
        let row = sqlx::query("SELECT 1 FROM checkpoints WHERE step = ?1")
            .bind(step)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        Ok(row.is_some())
    }

    async fn record_completed(
        &self,
        step: &str,
        handles: &[(String, HandleValue)],
    ) -> Result<(), CheckpointError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        for (name, value) in handles {
            let json = serde_json::to_string(value).map_err(backend)?;
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO handles (name, step, value_json)
                VALUES (?1, ?2, ?3)
                "#,
            )
            .bind(name)
            .bind(step)
            .bind(json)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        sqlx::query("INSERT OR REPLACE INTO checkpoints (step, completed_at) VALUES (?1, ?2)")
            .bind(step)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        tx.commit().await.map_err(backend)
    }

    async fn load_handle(&self, name: &str) -> Result<Option<HandleValue>, CheckpointError> {
        let row = sqlx::query("SELECT value_json FROM handles WHERE name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        match row {
            Some(row) => {
                let json: String = row.get("value_json");
                let value = serde_json::from_str(&json).map_err(|e| {
                    CheckpointError::Backend(format!("handle '{}' is not valid JSON: {}", name, e))
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn list_completed(&self) -> Result<Vec<CheckpointRecord>, CheckpointError> {
        let rows = sqlx::query(
            r#"
            SELECT step, completed_at
            FROM checkpoints
            ORDER BY completed_at ASC, rowid ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let step: String = row.get("step");
            let completed_at = Self::parse_timestamp(&row.get::<String, _>("completed_at"))?;

            let handle_rows =
                sqlx::query("SELECT name, value_json FROM handles WHERE step = ?1 ORDER BY name")
                    .bind(&step)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(backend)?;

            let handles = handle_rows
                .iter()
                .map(|r| {
                    let value: HandleValue =
                        serde_json::from_str(&r.get::<String, _>("value_json")).map_err(backend)?;
                    Ok((r.get::<String, _>("name"), value))
                })
                .collect::<Result<Vec<_>, CheckpointError>>()?;

            records.push(CheckpointRecord {
                step,
                completed_at,
                handles,
            });
        }

        Ok(records)
    }

    async fn clear(&self) -> Result<(), CheckpointError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        sqlx::query("DELETE FROM handles")
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        sqlx::query("DELETE FROM checkpoints")
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        tx.commit().await.map_err(backend)
    }
}
