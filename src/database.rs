use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::info;

use crate::config::DatabaseConfig;
use crate::error::EscrowError;

const BEGIN_UNIT: &str = "BEGIN IMMEDIATE";

/// One atomic unit of work
pub type Unit = Transaction<'static, Sqlite>;

/// Shared relational store behind every escrow component
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Connect with the configured pool settings and run migrations if enabled
    pub async fn connect(settings: &DatabaseConfig) -> Result<Self, EscrowError> {
        if is_memory_url(&settings.url) {
            return Self::in_memory().await;
        }

        let options = SqliteConnectOptions::from_str(&settings.url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(settings.busy_timeout_ms))
            .foreign_keys(true);

        info!(url = %settings.url, max_connections = settings.max_connections, "Connecting to database");

        let pool = SqlitePoolOptions::new()
            .max_connections(settings.max_connections.max(1))
            .connect_with(options)
            .await?;

        let store = Self { pool };
        if settings.auto_migrate {
            store.migrate().await?;
        }
        Ok(store)
    }

    /// Private in-memory database, migrated.
    ///
    /// A single pinned connection keeps the database alive and serializes units of work.
    pub async fn in_memory() -> Result<Self, EscrowError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), EscrowError> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get database pool for queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Open a unit of work. Dropping it without commit rolls back.
    ///
    /// Units take the write lock up front, so concurrent writers queue on the busy
    /// timeout instead of failing the read-to-write upgrade.
    pub async fn begin(&self) -> Result<Unit, EscrowError> {
        Ok(self.pool.begin_with(BEGIN_UNIT).await?)
    }

    pub async fn close(&self) {
        info!("Closing database connections");
        self.pool.close().await;
    }
}

fn is_memory_url(url: &str) -> bool {
    url == "sqlite::memory:" || url.contains(":memory:") || url.contains("mode=memory")
}

/// True when a concurrent writer held the database lock.
/// Such units are safe to rerun from the start.
pub fn is_write_conflict(err: &EscrowError) -> bool {
    match err {
        EscrowError::Storage(sqlx::Error::Database(db)) => db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            // SQLITE_BUSY and its extended codes
            .map(|code| code & 0xff == 5)
            .unwrap_or(false),
        _ => false,
    }
}
