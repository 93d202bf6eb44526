//! SQLite client and connection management

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use crate::error::PersistenceError;
use crate::schema;

/// SQLite configuration
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    pub path: String,
    pub max_connections: u32,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: "data/wiki-agent.db".to_string(),
            max_connections: 5,
        }
    }
}

/// Pooled SQLite store shared by every repository
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database file and ensure the schema exists
    pub async fn connect(config: SqliteConfig) -> Result<Self, PersistenceError> {
        if let Some(parent) = Path::new(&config.path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| PersistenceError::Database(sqlx::Error::Io(e)))?;
            }
        }

        tracing::info!(path = %config.path, "Connecting to SQLite");

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", config.path))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// In-memory database for tests
    pub async fn connect_in_memory() -> Result<Self, PersistenceError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Create tables and indexes if missing
    pub async fn ensure_schema(&self) -> Result<(), PersistenceError> {
        schema::create_tables(&self.pool).await?;
        tracing::debug!("Schema ensured");
        Ok(())
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
