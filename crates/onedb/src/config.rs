//! Database configuration.

use std::env;
use std::path::{Path, PathBuf};

/// Configuration for a single database: a logical name and the directory
/// its data file lives in.
///
/// `Config` is an immutable value. The `with_*` methods derive a new value
/// and never mutate the receiver, so a `Config` can be shared or stored
/// without defensive copies. The name must be non-empty; every constructor
/// here starts from the non-empty default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    name: String,
    data_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "the".to_string(),
            data_dir: PathBuf::from("data"),
        }
    }
}

impl Config {
    /// The database name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The directory where the data file will be stored. It does not have
    /// to exist yet; it is created when the database is first opened.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Derives a copy of this config with the given database name.
    pub fn with_name(self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self
        }
    }

    /// Derives a copy of this config with the given data directory.
    pub fn with_data_dir(self, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..self
        }
    }

    /// Builds a config for `name`, reading overrides from the process
    /// environment.
    ///
    /// `{NAME}_DB_PATH` (name uppercased) overrides the data directory when
    /// set and non-empty. An absent or empty variable is treated as unset,
    /// never as an error.
    pub fn from_env(name: &str) -> Self {
        let cfg = Self::default().with_name(name);

        let var = format!("{}_DB_PATH", name.to_uppercase());
        match env::var(&var).ok().filter(|v| !v.is_empty()) {
            Some(path) => cfg.with_data_dir(path),
            None => cfg,
        }
    }

    /// Path of the on-disk storage file: `{data_dir}/{name}.db`.
    pub fn db_file(&self) -> PathBuf {
        self.data_dir.join(format!("{}.db", self.name))
    }
}
