//! Process-wide access to one database.
//!
//! Most applications have exactly one database and no appetite for passing
//! a handle around. The functions here mirror the [`OneDb`] API against a
//! single process-wide instance: configure it once at startup with one of
//! the `initialize*` functions, or just start querying and get the
//! zero-configuration default.
//!
//! The slot is set at most once and never reset. Explicit initialization
//! after any use (or after another explicit initialization) fails with
//! [`DbError::AlreadyInitialized`] — two parts of a process must not
//! disagree about which database is "the" database. Code that needs an
//! isolated instance (tests, tools) should construct its own [`OneDb`]
//! instead of going through this module.

use std::sync::OnceLock;

use rusqlite::{Connection, Params, Row};

use crate::config::Config;
use crate::db::OneDb;
use crate::error::DbError;
use crate::pool::DbHandle;

static THE_DB: OnceLock<OneDb> = OnceLock::new();

/// Initializes the process-wide database with the given name, reading the
/// rest of the config from the environment.
///
/// # Errors
///
/// Fails with [`DbError::AlreadyInitialized`] if the process-wide database
/// is already set.
pub fn initialize(name: &str) -> Result<(), DbError> {
    initialize_db(OneDb::from_env(name))
}

/// Initializes the process-wide database with the provided config.
///
/// # Errors
///
/// Fails with [`DbError::AlreadyInitialized`] if the process-wide database
/// is already set.
pub fn initialize_with(config: Config) -> Result<(), DbError> {
    initialize_db(OneDb::new(config))
}

/// Installs a fully-built [`OneDb`] as the process-wide database. This is
/// how an application registers migrations (or a custom provider) on the
/// shared instance.
///
/// # Errors
///
/// Fails with [`DbError::AlreadyInitialized`] if the process-wide database
/// is already set.
pub fn initialize_db(db: OneDb) -> Result<(), DbError> {
    THE_DB.set(db).map_err(|_| DbError::AlreadyInitialized)
}

/// The process-wide instance, defaulted on first touch. Only the first
/// caller performs the set; the database itself still initializes lazily.
fn the_db() -> &'static OneDb {
    THE_DB.get_or_init(|| OneDb::new(Config::default()))
}

/// Checks a handle out of the process-wide database.
pub fn open() -> Result<DbHandle, DbError> {
    the_db().open()
}

/// Runs `action` with a handle from the process-wide database. See
/// [`OneDb::use_handle`].
pub fn use_handle<E, F>(action: F) -> Result<(), E>
where
    E: From<DbError>,
    F: FnOnce(&mut Connection) -> Result<(), E>,
{
    the_db().use_handle(action)
}

/// Runs `action` with a handle from the process-wide database, returning
/// its value. See [`OneDb::with_handle`].
pub fn with_handle<T, E, F>(action: F) -> Result<T, E>
where
    E: From<DbError>,
    F: FnOnce(&mut Connection) -> Result<T, E>,
{
    the_db().with_handle(action)
}

/// Executes a statement against the process-wide database. See
/// [`OneDb::execute`].
pub fn execute<P: Params>(sql: &str, params: P) -> Result<usize, DbError> {
    the_db().execute(sql, params)
}

/// Runs a query against the process-wide database. See [`OneDb::query`].
pub fn query<T, P, F>(mapper: F, sql: &str, params: P) -> Result<Vec<T>, DbError>
where
    P: Params,
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    the_db().query(mapper, sql, params)
}
