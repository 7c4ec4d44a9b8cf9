//! A single lazily-initialized database.

use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::{Connection, Params, Row};

use crate::config::Config;
use crate::error::DbError;
use crate::migrations::{Migration, MigrationRunner, SqlMigrator};
use crate::pool::{ConnectionProvider, DbHandle, DbPool, SqliteProvider};

/// One embedded database: a [`Config`] plus a lazily-created connection
/// pool.
///
/// Constructing a `OneDb` performs no I/O. The storage file is opened (or
/// created) and all pending migrations are applied exactly once, on the
/// first call that needs a connection — or at a time of your choosing via
/// [`initialize`](OneDb::initialize). Initialization is thread-safe:
/// concurrent first calls serialize, one of them does the work, and nobody
/// ever observes a connection whose schema has not been migrated.
///
/// ```no_run
/// use onedb::{Config, OneDb};
///
/// let db = OneDb::new(Config::default().with_name("ledger"));
/// db.execute("CREATE TABLE IF NOT EXISTS t (x INT)", [])?;
/// db.execute("INSERT INTO t VALUES (?1)", [42])?;
/// let xs = db.query(|row| row.get::<_, i64>(0), "SELECT x FROM t", [])?;
/// # Ok::<(), onedb::DbError>(())
/// ```
pub struct OneDb {
    config: Config,
    provider: Box<dyn ConnectionProvider>,
    migrator: Box<dyn MigrationRunner>,
    pool: Mutex<Option<DbPool>>,
}

impl OneDb {
    /// Creates a database with the given name, reading the rest of the
    /// config from the process environment.
    pub fn from_env(name: &str) -> Self {
        Self::new(Config::from_env(name))
    }

    /// Creates a database with the provided config and no managed schema.
    pub fn new(config: Config) -> Self {
        Self::with_migrations(config, Vec::new())
    }

    /// Creates a database whose schema is managed by the given migrations,
    /// applied on first use.
    pub fn with_migrations(config: Config, migrations: Vec<Migration>) -> Self {
        Self::with_parts(
            config,
            SqliteProvider::default(),
            SqlMigrator::new(migrations),
        )
    }

    /// Creates a database from explicit parts. This is the seam for tests
    /// and for callers that need a non-default provider configuration.
    pub fn with_parts(
        config: Config,
        provider: impl ConnectionProvider + 'static,
        migrator: impl MigrationRunner + 'static,
    ) -> Self {
        Self {
            config,
            provider: Box::new(provider),
            migrator: Box::new(migrator),
            pool: Mutex::new(None),
        }
    }

    /// This database's configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Initializes this database: opens or creates the storage file at
    /// `{data_dir}/{name}.db` and applies pending migrations.
    ///
    /// Calling this is optional — the first operation that needs a
    /// connection does it implicitly — but it lets startup code fail at a
    /// known time. Idempotent: once initialized, further calls are no-ops.
    ///
    /// # Errors
    ///
    /// Propagates open and migration failures. A failed attempt leaves the
    /// database uninitialized, so a later call retries the full sequence.
    pub fn initialize(&self) -> Result<(), DbError> {
        let mut slot = self.lock_slot();
        if slot.is_none() {
            *slot = Some(self.open_and_migrate()?);
        }
        Ok(())
    }

    /// Returns the connection pool, initializing the database first if
    /// needed. The pool is the escape hatch when the convenience methods
    /// on `OneDb` do not fit.
    pub fn pool(&self) -> Result<DbPool, DbError> {
        let mut slot = self.lock_slot();
        match slot.as_ref() {
            Some(pool) => Ok(pool.clone()),
            None => {
                let pool = self.open_and_migrate()?;
                *slot = Some(pool.clone());
                Ok(pool)
            }
        }
    }

    /// Checks a handle out of the pool. The caller releases it by dropping
    /// it; prefer [`use_handle`](OneDb::use_handle) or
    /// [`with_handle`](OneDb::with_handle) for scoped use.
    pub fn open(&self) -> Result<DbHandle, DbError> {
        self.pool()?.get().map_err(DbError::Acquire)
    }

    /// Runs `action` with a handle, returning it to the pool on every exit
    /// path. `action` may fail with any error type that can absorb a
    /// [`DbError`]; its failure propagates unchanged after release.
    pub fn use_handle<E, F>(&self, action: F) -> Result<(), E>
    where
        E: From<DbError>,
        F: FnOnce(&mut Connection) -> Result<(), E>,
    {
        self.with_handle(action)
    }

    /// As [`use_handle`](OneDb::use_handle), but `action` returns a value.
    pub fn with_handle<T, E, F>(&self, action: F) -> Result<T, E>
    where
        E: From<DbError>,
        F: FnOnce(&mut Connection) -> Result<T, E>,
    {
        let mut handle = self.open().map_err(E::from)?;
        let result = action(&mut handle);
        drop(handle);
        result
    }

    /// Executes a non-query statement with positional parameters, returning
    /// the number of affected rows.
    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize, DbError> {
        self.with_handle(|conn| conn.execute(sql, params).map_err(DbError::Sql))
    }

    /// Runs a query and maps every row through `mapper`, materializing all
    /// results before the handle is released and returned to the pool. The
    /// cursor is tied to the handle's lifetime, which is why the rows are
    /// collected eagerly rather than streamed.
    ///
    /// A row the mapper rejects fails the whole query.
    pub fn query<T, P, F>(&self, mut mapper: F, sql: &str, params: P) -> Result<Vec<T>, DbError>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.with_handle(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map(params, |row| mapper(row))?;
            Ok(rows.collect::<rusqlite::Result<Vec<T>>>()?)
        })
    }

    fn lock_slot(&self) -> MutexGuard<'_, Option<DbPool>> {
        // The slot is only written after open+migrate fully succeeds, so a
        // poisoned lock cannot be hiding partial state; keep the guard.
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Runs inside the slot lock: racing callers wait here and then find
    // the slot filled, so at most one open+migrate happens per instance.
    fn open_and_migrate(&self) -> Result<DbPool, DbError> {
        tracing::info!(db = self.config.name(), "initializing database");

        let pool = self.provider.open_or_create(&self.config.db_file())?;
        let conn = pool.get().map_err(DbError::Acquire)?;
        self.migrator.migrate(&conn)?;

        Ok(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::MigrationError;
    use crate::pool::{DbRuntimeSettings, PoolError};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    struct CountingProvider {
        inner: SqliteProvider,
        opens: Arc<AtomicUsize>,
    }

    impl ConnectionProvider for CountingProvider {
        fn open_or_create(&self, path: &Path) -> Result<DbPool, PoolError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            self.inner.open_or_create(path)
        }
    }

    struct CountingMigrator {
        runs: Arc<AtomicUsize>,
        /// Number of leading calls that fail before the migrator starts
        /// succeeding.
        failures: AtomicUsize,
    }

    impl MigrationRunner for CountingMigrator {
        fn migrate(&self, _conn: &Connection) -> Result<usize, MigrationError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(MigrationError::ExecutionFailed {
                    name: "001_flaky".to_string(),
                    source: rusqlite::Error::QueryReturnedNoRows,
                });
            }
            Ok(0)
        }
    }

    fn counted_db(
        dir: &Path,
        failures: usize,
    ) -> (OneDb, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let opens = Arc::new(AtomicUsize::new(0));
        let runs = Arc::new(AtomicUsize::new(0));
        let db = OneDb::with_parts(
            Config::default().with_name("counted").with_data_dir(dir),
            CountingProvider {
                inner: SqliteProvider::default(),
                opens: Arc::clone(&opens),
            },
            CountingMigrator {
                runs: Arc::clone(&runs),
                failures: AtomicUsize::new(failures),
            },
        );
        (db, opens, runs)
    }

    #[test]
    fn concurrent_initialize_opens_and_migrates_once() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let (db, opens, runs) = counted_db(dir.path(), 0);

        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| db.initialize().expect("initialize should succeed"));
            }
        });

        assert_eq!(opens.load(Ordering::SeqCst), 1, "exactly one open");
        assert_eq!(runs.load(Ordering::SeqCst), 1, "exactly one migration run");
    }

    #[test]
    fn initialize_after_success_is_a_noop() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let (db, opens, runs) = counted_db(dir.path(), 0);

        db.initialize().expect("first initialize");
        db.initialize().expect("second initialize");
        db.pool().expect("pool access");

        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_initialize_is_retryable_and_redoes_everything() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let (db, opens, runs) = counted_db(dir.path(), 1);

        let err = db.initialize().expect_err("first attempt should fail");
        assert!(matches!(err, DbError::Migration(_)), "got {err:?}");

        db.initialize().expect("retry should succeed");

        // The retry repeats the full open+migrate sequence.
        assert_eq!(opens.load(Ordering::SeqCst), 2);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[derive(Debug, PartialEq)]
    enum ActionError {
        Boom,
        Db(String),
    }

    impl From<DbError> for ActionError {
        fn from(e: DbError) -> Self {
            ActionError::Db(e.to_string())
        }
    }

    fn single_handle_db(dir: &Path) -> OneDb {
        OneDb::with_parts(
            Config::default().with_name("scoped").with_data_dir(dir),
            SqliteProvider::new(DbRuntimeSettings {
                pool_max_size: 1,
                ..DbRuntimeSettings::default()
            }),
            SqlMigrator::empty(),
        )
    }

    #[test]
    fn use_handle_releases_on_failure_and_propagates_the_error() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let db = single_handle_db(dir.path());

        let result = db.use_handle(|_conn| Err::<(), _>(ActionError::Boom));
        assert_eq!(result, Err(ActionError::Boom));

        // With a pool of one, a leaked handle would leave nothing idle.
        let pool = db.pool().expect("pool access");
        assert_eq!(pool.state().idle_connections, 1);
    }

    #[test]
    fn with_handle_returns_the_action_value() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let db = single_handle_db(dir.path());

        let n: i64 = db
            .with_handle(|conn| {
                conn.query_row("SELECT 40 + 2", [], |row| row.get(0))
                    .map_err(DbError::Sql)
            })
            .expect("action should succeed");
        assert_eq!(n, 42);
    }

    #[test]
    fn query_materializes_rows_and_releases_the_handle() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let db = single_handle_db(dir.path());

        db.execute("CREATE TABLE t (x INT)", []).expect("create");
        for x in [1i64, 2, 3] {
            db.execute("INSERT INTO t VALUES (?1)", [x]).expect("insert");
        }

        let xs = db
            .query(|row| row.get::<_, i64>(0), "SELECT x FROM t ORDER BY x", [])
            .expect("query should succeed");
        assert_eq!(xs, vec![1, 2, 3]);

        let pool = db.pool().expect("pool access");
        assert_eq!(pool.state().idle_connections, 1, "handle already released");
    }

    #[test]
    fn mapper_failure_fails_the_query() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let db = single_handle_db(dir.path());

        db.execute("CREATE TABLE t (x TEXT)", []).expect("create");
        db.execute("INSERT INTO t VALUES ('not a number')", [])
            .expect("insert");

        // Asking for an i64 out of a TEXT row makes the mapper fail.
        let err = db
            .query(|row| row.get::<_, i64>(0), "SELECT x FROM t", [])
            .expect_err("mapping should fail");
        assert!(matches!(err, DbError::Sql(_)), "got {err:?}");

        let pool = db.pool().expect("pool access");
        assert_eq!(pool.state().idle_connections, 1);
    }
}
