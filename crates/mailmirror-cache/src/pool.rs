//! Database connection pool management
//!
//! Provides a wrapper around SQLx's SqlitePool with:
//! - Automatic directory creation for database files
//! - WAL journal mode so readers see committed pages while a sync writes
//! - Versioned, forward-only schema migrations on open
//! - In-memory mode for testing

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::CacheError;

/// Ordered schema migrations: (version, description, SQL)
const MIGRATIONS: &[(i64, &str, &str)] = &[
    (1, "initial", include_str!("migrations/0001_initial.sql")),
    (
        2,
        "transformations",
        include_str!("migrations/0002_transformations.sql"),
    ),
];

/// Latest schema version this build can read and write
pub const SCHEMA_VERSION: i64 = 2;

/// Connections to the mailbox state database
///
/// File databases get up to 5 connections in WAL mode with a 5 s busy
/// timeout. An in-memory database is a single connection, since each
/// SQLite memory connection is its own database.
pub struct DatabasePool {
    pool: SqlitePool,
}

impl DatabasePool {
    /// Opens (creating if needed) the state database at `db_path` and
    /// brings its schema up to [`SCHEMA_VERSION`]
    ///
    /// # Errors
    ///
    /// Returns `CacheError::ConnectionFailed` if the connection cannot be established,
    /// `CacheError::MigrationFailed` if a migration fails, or
    /// `CacheError::SchemaTooNew` if the file was written by a newer release.
    pub async fn new(db_path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CacheError::ConnectionFailed(format!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| {
                CacheError::ConnectionFailed(format!(
                    "Failed to connect to database at {}: {}",
                    db_path.display(),
                    e
                ))
            })?;

        Self::run_migrations(&pool).await?;

        tracing::info!(
            path = %db_path.display(),
            "Database pool initialized"
        );

        Ok(Self { pool })
    }

    /// Opens an empty in-memory database, used by tests and dry runs
    ///
    /// Uses a single connection that is never recycled, since SQLite
    /// in-memory databases are per-connection.
    pub async fn in_memory() -> Result<Self, CacheError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| {
                CacheError::ConnectionFailed(format!("Failed to create in-memory database: {}", e))
            })?;

        sqlx::raw_sql("PRAGMA foreign_keys = ON;")
            .execute(&pool)
            .await
            .map_err(|e| {
                CacheError::MigrationFailed(format!("Failed to enable foreign keys: {}", e))
            })?;

        Self::run_migrations(&pool).await?;

        tracing::debug!("In-memory database pool initialized");

        Ok(Self { pool })
    }

    /// Returns a reference to the underlying SQLite connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Returns the schema version recorded in the database
    pub async fn schema_version(&self) -> Result<i64, CacheError> {
        current_version(&self.pool).await
    }

    /// Applies every migration newer than the stored version
    ///
    /// Each migration runs in its own transaction together with the version
    /// bump, so a failed migration leaves the previous version intact.
    async fn run_migrations(pool: &SqlitePool) -> Result<(), CacheError> {
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS schema_version (\
                version INTEGER PRIMARY KEY NOT NULL, \
                description TEXT NOT NULL, \
                applied_at TEXT NOT NULL)",
        )
        .execute(pool)
        .await
        .map_err(|e| {
            CacheError::MigrationFailed(format!("Failed to create schema_version table: {}", e))
        })?;

        let current = current_version(pool).await?;
        if current > SCHEMA_VERSION {
            return Err(CacheError::SchemaTooNew {
                found: current,
                supported: SCHEMA_VERSION,
            });
        }

        for (version, description, sql) in MIGRATIONS.iter().filter(|(v, _, _)| *v > current) {
            let mut tx = pool.begin().await.map_err(|e| {
                CacheError::MigrationFailed(format!("Failed to begin migration {}: {}", version, e))
            })?;

            sqlx::raw_sql(*sql).execute(&mut *tx).await.map_err(|e| {
                CacheError::MigrationFailed(format!(
                    "Migration {} ({}) failed: {}",
                    version, description, e
                ))
            })?;

            sqlx::query(
                "INSERT INTO schema_version (version, description, applied_at) VALUES (?, ?, ?)",
            )
            .bind(*version)
            .bind(*description)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                CacheError::MigrationFailed(format!("Failed to record migration {}: {}", version, e))
            })?;

            tx.commit().await.map_err(|e| {
                CacheError::MigrationFailed(format!("Failed to commit migration {}: {}", version, e))
            })?;

            tracing::info!(version, description, "Applied schema migration");
        }

        tracing::debug!(version = SCHEMA_VERSION, "Database migrations completed");
        Ok(())
    }
}

async fn current_version(pool: &SqlitePool) -> Result<i64, CacheError> {
    let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
        .fetch_one(pool)
        .await?;
    Ok(version.unwrap_or(0))
}
