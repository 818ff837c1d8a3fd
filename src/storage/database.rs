//! Pooled SQLite database shared by the ledger and the job store.
//!
//! Connections run in WAL mode with a busy timeout. Write transactions start
//! `IMMEDIATE` so concurrent writers queue on the lock instead of failing on
//! upgrade.

use crate::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{Connection, TransactionBehavior};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Shared database handle for async contexts.
pub type SharedDatabase = Arc<Database>;

const SCHEMA: &str = include_str!("schema.sql");

const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_size: u32,
    pub connection_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 8,
            connection_timeout: Duration::from_secs(30),
        }
    }
}

pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Open (or create) the database file and apply the schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, PoolConfig::default())
    }

    pub fn open_with_config<P: AsRef<Path>>(path: P, config: PoolConfig) -> Result<Self> {
        let manager =
            SqliteConnectionManager::file(path.as_ref()).with_init(Self::configure_connection);

        let pool = Pool::builder()
            .max_size(config.max_size)
            .connection_timeout(config.connection_timeout)
            .build(manager)
            .map_err(|e| Error::Store(format!("Failed to create connection pool: {}", e)))?;

        let db = Self { pool };
        db.initialize()?;
        Ok(db)
    }

    /// Single-connection in-memory database. The connection is never recycled,
    /// since dropping it would drop the data.
    pub fn open_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory().with_init(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            Ok(())
        });

        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(manager)
            .map_err(|e| Error::Store(format!("Failed to create in-memory pool: {}", e)))?;

        let db = Self { pool };
        db.initialize()?;
        Ok(db)
    }

    fn configure_connection(conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            "#,
        )?;
        Ok(())
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA)?;

        let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if version < SCHEMA_VERSION {
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
            tracing::info!("Initialized database schema v{}", SCHEMA_VERSION);
        }
        Ok(())
    }

    pub fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| Error::Store(format!("Failed to acquire database connection: {}", e)))
    }

    /// Run `f` in an `IMMEDIATE` transaction. Commits on `Ok`, rolls back on `Err`.
    pub fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Run blocking database work off the async runtime.
    pub async fn run<F, T>(self: &Arc<Self>, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(self);
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| Error::Store(format!("Database task failed: {}", e)))?
    }
}

/// Fixed-width UTC timestamps so text ordering matches time ordering.
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn parse_uuid(idx: usize, raw: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;

    #[test]
    fn test_schema_is_applied_once_and_reopenable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("restyle.db");

        {
            let db = Database::open(&path).unwrap();
            db.conn()
                .unwrap()
                .execute(
                    "INSERT INTO profiles (id, credits, created_at) VALUES (?1, ?2, ?3)",
                    params!["alice", 5, timestamp(Utc::now())],
                )
                .unwrap();
        }

        let db = Database::open(&path).unwrap();
        let credits: u32 = db
            .conn()
            .unwrap()
            .query_row("SELECT credits FROM profiles WHERE id = 'alice'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(credits, 5);
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();

        let result: Result<()> = db.transaction(|conn| {
            conn.execute(
                "INSERT INTO profiles (id, credits, created_at) VALUES ('bob', 1, 'x')",
                [],
            )?;
            Err(Error::Store("abort".to_string()))
        });
        assert!(result.is_err());

        let count: i64 = db
            .conn()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM profiles", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_credits_cannot_go_negative() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn().unwrap();
        conn.execute(
            "INSERT INTO profiles (id, credits, created_at) VALUES ('carol', 0, 'x')",
            [],
        )
        .unwrap();

        let err = conn
            .execute("UPDATE profiles SET credits = credits - 1 WHERE id = 'carol'", [])
            .unwrap_err();
        assert!(err.to_string().contains("CHECK"));
    }

    #[test]
    fn test_timestamps_sort_as_text() {
        let now = Utc::now();
        let earlier = timestamp(now);
        let later = timestamp(now + chrono::Duration::milliseconds(5));
        assert!(earlier < later);

        let parsed = parse_timestamp(0, &earlier).unwrap();
        assert_eq!(parsed.timestamp_micros(), now.timestamp_micros());
    }
}
