//! `SQLite` connection pool setup and migration runner.

use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

use crate::error::StorageError;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for the `SQLite` storage adapter.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// `SQLite` connection URL (e.g. `sqlite:crmflow.db` or `sqlite::memory:`).
    pub database_url: String,
    /// Pool size for file databases. In-memory databases always use a single
    /// connection, since every connection would otherwise see its own database.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

impl Config {
    #[must_use]
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    /// A fresh private in-memory database.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new("sqlite::memory:")
    }

    /// Build a [`Database`] from this configuration.
    ///
    /// Creates the connection pool, creates the database file if missing,
    /// and runs all pending migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the connection or migrations fail.
    pub async fn build(self) -> Result<Database, StorageError> {
        Database::initialize(&self).await
    }

    fn is_memory(&self) -> bool {
        self.database_url.contains(":memory:") || self.database_url.contains("mode=memory")
    }
}

/// Holds the `SQLite` connection pool and provides access to it.
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect to the database and run migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the connection or migrations fail.
    async fn initialize(config: &Config) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(&config.database_url)?
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = if config.is_memory() {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(config.max_connections.max(1))
                .connect_with(options.journal_mode(SqliteJournalMode::Wal))
                .await?
        };

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Borrow the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
