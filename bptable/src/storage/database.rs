//! High-level database interface.
//!
//! A database is a directory holding one subdirectory per table:
//! ```text
//! {data_dir}/{database}/
//!     {table}/schema.json
//!     {table}/records.bin
//!     {table}/index.bin
//! ```
//! The schema descriptor is written when the table is created. The other two
//! artifacts are written by [`Database::save`].

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::storage::btree::{BTreeError, DEFAULT_ORDER, Order};
use crate::storage::codec::read_if_exists;
use crate::storage::table::{Column, Schema, Table, TableError};

/// File name of the schema descriptor inside a table directory.
pub const SCHEMA_FILE: &str = "schema.json";

/// A named collection of tables persisted under one directory.
#[derive(Debug)]
pub struct Database {
    name: String,
    path: PathBuf,
    /// Index order for tables created from now on.
    order: usize,
    tables: BTreeMap<String, Table>,
}

impl Database {
    /// Open the database `name` under `data_dir`, creating its directory if
    /// needed and loading every table found there.
    pub fn open(data_dir: &Path, name: &str) -> Result<Self, DatabaseError> {
        Self::open_with_order(data_dir, name, DEFAULT_ORDER)
    }

    /// Like [`Database::open`], creating new tables with the given index order.
    ///
    /// Tables loaded from disk keep the order they were saved with.
    pub fn open_with_order(data_dir: &Path, name: &str, order: usize) -> Result<Self, DatabaseError> {
        if Order::new(order).is_none() {
            return Err(TableError::from(BTreeError::InvalidOrder(order)).into());
        }

        let path = data_dir.join(name);
        std::fs::create_dir_all(&path)?;

        let mut database = Self {
            name: name.to_owned(),
            path,
            order,
            tables: BTreeMap::new(),
        };
        database.load_tables()?;

        info!(
            database = %database.name,
            path = %database.path.display(),
            tables = database.tables.len(),
            "database opened"
        );
        Ok(database)
    }

    fn load_tables(&mut self) -> Result<(), DatabaseError> {
        for entry in std::fs::read_dir(&self.path)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                warn!(path = %entry.path().display(), "skipping directory with non-UTF-8 name");
                continue;
            };

            let Some(bytes) = read_if_exists(&entry.path().join(SCHEMA_FILE))? else {
                warn!(table = %name, "no schema descriptor, skipping directory");
                continue;
            };
            let schema: Schema = serde_json::from_slice(&bytes)?;
            schema.validate()?;

            let table = Table::load(name.as_str(), schema, &self.path)?;
            self.tables.insert(name, table);
        }
        Ok(())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory holding this database's tables.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn order(&self) -> usize {
        self.order
    }

    /// Create and register an empty table, writing its schema descriptor.
    pub fn create_table(
        &mut self,
        name: &str,
        columns: impl IntoIterator<Item = Column>,
        primary_key: &str,
    ) -> Result<&mut Table, DatabaseError> {
        validate_table_name(name)?;
        if self.tables.contains_key(name) {
            return Err(DatabaseError::TableExists(name.to_owned()));
        }

        let schema = Schema::new(columns, primary_key)?;
        let table = Table::with_order(name, schema, self.order)?;
        self.write_schema(name, table.schema())?;

        info!(database = %self.name, table = %name, "table created");
        Ok(self.tables.entry(name.to_owned()).or_insert(table))
    }

    fn write_schema(&self, name: &str, schema: &Schema) -> Result<(), DatabaseError> {
        let table_dir = self.path.join(name);
        std::fs::create_dir_all(&table_dir)?;
        std::fs::write(table_dir.join(SCHEMA_FILE), serde_json::to_vec_pretty(schema)?)?;
        Ok(())
    }

    /// Unregister a table and delete its directory. Returns whether it existed.
    pub fn drop_table(&mut self, name: &str) -> Result<bool, DatabaseError> {
        if self.tables.remove(name).is_none() {
            return Ok(false);
        }

        match std::fs::remove_dir_all(self.path.join(name)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        info!(database = %self.name, table = %name, "table dropped");
        Ok(true)
    }

    #[must_use]
    pub fn get_table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn get_table_mut(&mut self, name: &str) -> Option<&mut Table> {
        self.tables.get_mut(name)
    }

    /// Table names in ascending order.
    #[must_use]
    pub fn list_tables(&self) -> Vec<&str> {
        self.tables.keys().map(String::as_str).collect()
    }

    /// Persist every table.
    pub fn save(&self) -> Result<(), DatabaseError> {
        for table in self.tables.values() {
            table.save(&self.path)?;
        }
        Ok(())
    }

    /// Persist a single table. Returns `false` if there is no such table.
    pub fn save_table(&self, name: &str) -> Result<bool, DatabaseError> {
        let Some(table) = self.tables.get(name) else {
            return Ok(false);
        };
        table.save(&self.path)?;
        Ok(true)
    }
}

/// Check that a table name can be used as a single directory name.
fn validate_table_name(name: &str) -> Result<(), DatabaseError> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0']);
    if valid {
        Ok(())
    } else {
        Err(DatabaseError::InvalidTableName(name.to_owned()))
    }
}

/// Errors that can occur during database operations.
#[derive(Debug)]
pub enum DatabaseError {
    /// A table with this name is already registered.
    TableExists(String),
    /// The name cannot be used as a table directory.
    InvalidTableName(String),
    /// Table error.
    Table(TableError),
    /// File I/O error.
    Io(std::io::Error),
    /// Malformed schema descriptor.
    Json(serde_json::Error),
}

impl std::fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TableExists(name) => write!(f, "table '{name}' already exists"),
            Self::InvalidTableName(name) => write!(f, "invalid table name '{name}'"),
            Self::Table(e) => write!(f, "table error: {e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Json(e) => write!(f, "schema descriptor error: {e}"),
        }
    }
}

impl std::error::Error for DatabaseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::TableExists(_) | Self::InvalidTableName(_) => None,
            Self::Table(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
        }
    }
}

impl From<TableError> for DatabaseError {
    fn from(e: TableError) -> Self {
        Self::Table(e)
    }
}

impl From<std::io::Error> for DatabaseError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for DatabaseError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}
