//! Crate-wide error type.

use thiserror::Error;

use crate::migrations::MigrationError;
use crate::pool::PoolError;

/// Everything that can go wrong talking to a database.
///
/// The variants distinguish the phase that failed: opening the storage
/// file, migrating the schema, checking a handle out of the pool, or
/// executing SQL (including row mapping).
#[derive(Debug, Error)]
pub enum DbError {
    /// The storage file could not be opened or created.
    #[error(transparent)]
    Open(#[from] PoolError),

    /// A schema migration failed.
    #[error(transparent)]
    Migration(#[from] MigrationError),

    /// No handle could be checked out of the pool.
    #[error("failed to acquire a database handle: {0}")]
    Acquire(#[source] r2d2::Error),

    /// A statement or query failed, or a row mapper rejected a row.
    #[error("statement failed: {0}")]
    Sql(#[from] rusqlite::Error),

    /// The process-wide database was initialized a second time.
    #[error("the database is already initialized")]
    AlreadyInitialized,
}
