//! Zero-configuration embedded SQLite with lazy initialization and
//! versioned migrations.
//!
//! `onedb` gives an application one database that is ready the moment it is
//! first touched: the storage file is opened (or created) under
//! `{data_dir}/{name}.db` and all pending schema migrations are applied,
//! exactly once, no matter how many threads race to get there first.
//!
//! Use [`OneDb`] directly when you want to own the instance, or the
//! [`registry`] module for a process-wide singleton with a one-time
//! initialization contract.
//!
//! # Design decisions
//!
//! - **SQLite via `rusqlite`**: an in-process engine against a local file,
//!   no server to run.
//! - **`r2d2` connection pool as the handle source**: every `open`,
//!   `use_handle`, `with_handle`, `execute`, and `query` call checks out
//!   one pooled handle and returns it on every exit path, so handles
//!   cannot leak across calls.
//! - **Embedded migrations**: applications declare SQL migrations in code
//!   (typically via `include_str!`); applied history is tracked in the
//!   database, so re-running is a no-op.
//! - **Lazy, retryable initialization**: the whole open+migrate sequence
//!   runs under one lock. Failure leaves the instance uninitialized, and a
//!   later call simply tries again.

mod config;
mod db;
mod error;
mod migrations;
mod pool;
pub mod registry;

pub use config::Config;
pub use db::OneDb;
pub use error::DbError;
pub use migrations::{Migration, MigrationError, MigrationRunner, SqlMigrator};
pub use pool::{ConnectionProvider, DbHandle, DbPool, DbRuntimeSettings, PoolError, SqliteProvider};
