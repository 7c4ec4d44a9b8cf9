//! Versioned SQL migration runner.
//!
//! Applications declare their migrations as embedded SQL (typically via
//! `include_str!`) and hand them to a [`SqlMigrator`]. Applied migrations
//! are tracked in the `_onedb_migrations` table, so re-running an
//! up-to-date database is a no-op and each migration runs exactly once.

use rusqlite::Connection;
use thiserror::Error;

/// A single named migration. Names must be unique and stable; they are the
/// applied-history key. Ordering is the order of the slice handed to
/// [`SqlMigrator`].
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    /// Stable identifier, e.g. `"001_accounts"`.
    pub name: &'static str,
    /// The SQL to execute, as one batch.
    pub sql: &'static str,
}

/// Errors that can occur during migration execution.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A SQL statement within a migration failed.
    #[error("migration '{name}' failed: {source}")]
    ExecutionFailed {
        /// The name of the migration that failed.
        name: String,
        /// The underlying SQLite error.
        source: rusqlite::Error,
    },

    /// Failed to query the applied-migration history.
    #[error("failed to check migration state: {0}")]
    StateQuery(#[source] rusqlite::Error),
}

/// Applies pending schema migrations to a connection.
///
/// Implementations must be idempotent: running against an up-to-date
/// schema applies nothing. `OneDb` consumes this through the trait so
/// tests can count or fail migration runs.
pub trait MigrationRunner: Send + Sync {
    /// Applies all pending migrations, returning how many were applied.
    fn migrate(&self, conn: &Connection) -> Result<usize, MigrationError>;
}

const TRACKING_TABLE: &str = "_onedb_migrations";

/// The default runner: ordered SQL migrations with applied-history
/// tracking.
///
/// Each pending migration runs inside its own transaction together with
/// its history record, so a failing script leaves neither schema changes
/// nor a bogus history row behind.
#[derive(Debug, Default, Clone)]
pub struct SqlMigrator {
    migrations: Vec<Migration>,
}

impl SqlMigrator {
    /// Creates a runner for the given migrations, applied in order.
    pub fn new(migrations: impl Into<Vec<Migration>>) -> Self {
        Self {
            migrations: migrations.into(),
        }
    }

    /// A runner with no managed schema. Useful for databases whose tables
    /// are created ad hoc.
    pub fn empty() -> Self {
        Self::default()
    }
}

impl MigrationRunner for SqlMigrator {
    fn migrate(&self, conn: &Connection) -> Result<usize, MigrationError> {
        // The history table has to exist before we can ask what has been
        // applied.
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {TRACKING_TABLE} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );"
        ))
        .map_err(MigrationError::StateQuery)?;

        let mut applied = 0;

        for migration in &self.migrations {
            let already_applied: bool = conn
                .query_row(
                    &format!("SELECT COUNT(*) > 0 FROM {TRACKING_TABLE} WHERE name = ?1"),
                    [migration.name],
                    |row| row.get(0),
                )
                .map_err(MigrationError::StateQuery)?;

            if already_applied {
                tracing::debug!(
                    migration = migration.name,
                    "migration already applied, skipping"
                );
                continue;
            }

            tracing::info!(migration = migration.name, "applying migration");

            let failed = |source| MigrationError::ExecutionFailed {
                name: migration.name.to_string(),
                source,
            };

            let tx = conn.unchecked_transaction().map_err(failed)?;
            tx.execute_batch(migration.sql).map_err(failed)?;
            tx.execute(
                &format!("INSERT INTO {TRACKING_TABLE} (name) VALUES (?1)"),
                [migration.name],
            )
            .map_err(failed)?;
            tx.commit().map_err(failed)?;

            applied += 1;
        }

        Ok(applied)
    }
}
