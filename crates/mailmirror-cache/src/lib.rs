//! mailmirror Cache - State store persistence
//!
//! SQLite-based store for:
//! - Folder identity map and per-folder checkpoints
//! - Message index (live and quarantined rows)
//! - Mailbox sync state
//! - Transformation status, attachment and archive-extraction records
//!
//! ## Architecture
//!
//! This crate implements the `IStateStore` / `IStateTransaction` ports from
//! `mailmirror-core` using SQLite as the storage backend. It is a driven
//! (secondary) adapter in the hexagonal architecture.
//!
//! ## Key Components
//!
//! - [`DatabasePool`] - Connection pool with versioned migrations
//! - [`SqliteStateStore`] - Read queries and the transaction factory
//! - [`SqliteTransaction`] - All writes, committed or rolled back as a unit
//! - [`CacheError`] - Error types for cache operations
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use mailmirror_cache::{DatabasePool, SqliteStateStore};
//! use mailmirror_core::ports::IStateStore;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pool = DatabasePool::new(Path::new("/srv/mail-archive/state.db")).await?;
//! let store = SqliteStateStore::new(pool.pool().clone());
//! let tx = store.begin().await?;
//! tx.commit().await?;
//! # Ok(())
//! # }
//! ```

pub mod pool;
pub mod store;
pub mod transaction;

mod rows;

pub use pool::{DatabasePool, SCHEMA_VERSION};
pub use store::SqliteStateStore;
pub use transaction::SqliteTransaction;

/// Errors that can occur during cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Failed to establish a database connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A database query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// The database was written by a newer release
    #[error("Database schema version {found} is newer than supported version {supported}")]
    SchemaTooNew {
        /// Version recorded in the database
        found: i64,
        /// Latest version this build knows
        supported: i64,
    },

    /// A stored value could not be turned back into a domain type
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<sqlx::Error> for CacheError {
    fn from(e: sqlx::Error) -> Self {
        CacheError::QueryFailed(e.to_string())
    }
}

impl From<mailmirror_core::domain::DomainError> for CacheError {
    fn from(e: mailmirror_core::domain::DomainError) -> Self {
        CacheError::SerializationError(e.to_string())
    }
}
