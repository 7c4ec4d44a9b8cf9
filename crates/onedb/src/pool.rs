//! Connection provider: opening the storage file and pooling connections.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OpenFlags;
use thiserror::Error;

/// The pool of connections to one database file. Cloning is cheap and all
/// clones check handles out of the same pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// One checked-out connection. Dropping it returns it to the pool, so a
/// handle is released on every exit path without explicit cleanup.
pub type DbHandle = r2d2::PooledConnection<SqliteConnectionManager>;

/// Runtime tunables for SQLite connection behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    /// Busy timeout for SQLite connections, in milliseconds.
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled SQLite connections.
    pub pool_max_size: u32,
}

impl Default for DbRuntimeSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            pool_max_size: 8,
        }
    }
}

/// Errors from opening or creating a database file.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The data directory could not be created.
    #[error("failed to create data directory {path}: {source}")]
    CreateDir {
        /// The directory that could not be created.
        path: PathBuf,
        /// The underlying I/O error.
        source: io::Error,
    },

    /// The connection pool could not be built against the file.
    #[error("failed to open database: {0}")]
    PoolInit(#[from] r2d2::Error),
}

/// Opens (or creates) an embedded storage file and yields a connection
/// pool for it.
///
/// `OneDb` consumes this through the trait so tests can count open calls
/// or substitute a failing provider.
pub trait ConnectionProvider: Send + Sync {
    /// Opens the storage file at `path`, creating file and parent
    /// directory if absent.
    fn open_or_create(&self, path: &Path) -> Result<DbPool, PoolError>;
}

/// The default provider: SQLite via `rusqlite`, pooled with `r2d2`.
///
/// Every pooled connection is initialized with WAL journal mode, foreign
/// keys on, and the configured busy timeout.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteProvider {
    settings: DbRuntimeSettings,
}

impl SqliteProvider {
    /// Creates a provider with the given runtime settings.
    pub fn new(settings: DbRuntimeSettings) -> Self {
        Self { settings }
    }
}

impl ConnectionProvider for SqliteProvider {
    fn open_or_create(&self, path: &Path) -> Result<DbPool, PoolError> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir).map_err(|source| PoolError::CreateDir {
                    path: dir.to_path_buf(),
                    source,
                })?;
            }
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let busy_timeout_ms = self.settings.busy_timeout_ms;
        let manager = SqliteConnectionManager::file(path)
            .with_flags(flags)
            .with_init(move |conn| {
                // journal_mode returns the resulting mode as a row, so it
                // cannot go through execute_batch. In-memory databases
                // stay in "memory" mode, which is fine.
                conn.query_row("PRAGMA journal_mode = WAL;", [], |_| Ok(()))?;
                conn.execute_batch(&format!(
                    "PRAGMA foreign_keys = ON;
                     PRAGMA busy_timeout = {busy_timeout_ms};"
                ))
            });

        let pool = Pool::builder()
            .max_size(self.settings.pool_max_size)
            .build(manager)?;

        Ok(pool)
    }
}
