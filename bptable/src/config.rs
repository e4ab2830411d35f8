//! Engine configuration module.
//!
//! This module provides configuration loading for the `bptable` binary from
//! environment variables.
//!
//! # Environment Variables
//!
//! - `BPTABLE_DATA_DIRECTORY`: Directory holding all databases (default: `./data`)
//! - `BPTABLE_DATABASE`: Name of the database to open (default: `default`)
//! - `BPTABLE_TREE_ORDER`: B+Tree order for newly created tables (default: `4`)
//!
//! # Invariants
//!
//! - `tree_order` is always at least [`MIN_ORDER`]
//! - `database` is never empty

use std::path::{Path, PathBuf};

use crate::storage::btree::{DEFAULT_ORDER, MIN_ORDER};

const DATA_DIRECTORY_VAR: &str = "BPTABLE_DATA_DIRECTORY";
const DATABASE_VAR: &str = "BPTABLE_DATABASE";
const TREE_ORDER_VAR: &str = "BPTABLE_TREE_ORDER";

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Parent directory of every database.
    pub data_directory: PathBuf,
    /// Database name. Its tables live under `{data_directory}/{database}`.
    pub database: String,
    /// Order of the primary-key index for tables created from now on.
    pub tree_order: usize,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_directory: PathBuf::from(Self::DEFAULT_DATA_DIRECTORY),
            database: Self::DEFAULT_DATABASE.to_owned(),
            tree_order: DEFAULT_ORDER,
        }
    }
}

impl EngineConfig {
    /// Default data directory.
    pub const DEFAULT_DATA_DIRECTORY: &'static str = "./data";
    /// Default database name.
    pub const DEFAULT_DATABASE: &'static str = "default";

    /// Load configuration from environment variables.
    ///
    /// Unset variables fall back to their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its
    /// value if set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let data_directory = lookup(DATA_DIRECTORY_VAR)
            .map_or_else(|| PathBuf::from(Self::DEFAULT_DATA_DIRECTORY), PathBuf::from);
        let database = Self::load_database(lookup(DATABASE_VAR))?;
        let tree_order = Self::load_tree_order(lookup(TREE_ORDER_VAR))?;

        Ok(Self {
            data_directory,
            database,
            tree_order,
        })
    }

    fn load_database(value: Option<String>) -> Result<String, ConfigError> {
        match value {
            None => Ok(Self::DEFAULT_DATABASE.to_owned()),
            Some(name) if name.is_empty() => Err(ConfigError::InvalidValue {
                name: DATABASE_VAR.to_owned(),
                message: "must not be empty".to_owned(),
            }),
            Some(name) => Ok(name),
        }
    }

    fn load_tree_order(value: Option<String>) -> Result<usize, ConfigError> {
        let Some(value) = value else {
            return Ok(DEFAULT_ORDER);
        };
        match value.parse::<usize>() {
            Ok(order) if order >= MIN_ORDER => Ok(order),
            _ => Err(ConfigError::InvalidValue {
                name: TREE_ORDER_VAR.to_owned(),
                message: format!("'{value}' is not an integer of at least {MIN_ORDER}"),
            }),
        }
    }

    /// Directory of the configured database.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_directory.join(&self.database)
    }

    #[must_use]
    pub fn data_directory(&self) -> &Path {
        &self.data_directory
    }
}
