//! Table storage engine.
//!
//! A small embedded engine that keeps each table in memory behind a B+Tree
//! primary-key index and persists it to a directory per table.
//!
//! # Layers
//!
//! - [`btree`]: the generic B+Tree index
//! - [`table`]: schema checks, CRUD, scans and aggregates over one table
//! - [`database`]: a directory of tables and their schema descriptors
//! - [`codec`] and [`value`]: the byte format and the scalar value model
//!
//! # Usage
//!
//! ```no_run
//! use std::path::Path;
//!
//! use bptable::storage::{Column, ColumnType, Database, Record, Value};
//!
//! let mut db = Database::open(Path::new("./data"), "shop")?;
//! let users = db.create_table(
//!     "users",
//!     [
//!         Column::new("id", ColumnType::Int),
//!         Column::new("name", ColumnType::String),
//!     ],
//!     "id",
//! )?;
//! users.insert(Record::new().with("id", 1).with("name", "a"))?;
//! assert!(users.select(&Value::Int(1)).is_some());
//!
//! db.save()?;
//! # Ok::<(), bptable::storage::DatabaseError>(())
//! ```

pub mod btree;
pub mod codec;
mod database;
mod table;
mod value;

pub use database::{Database, DatabaseError, SCHEMA_FILE};
pub use table::{
    Aggregate, AggregateValue, Column, INDEX_FILE, RECORDS_FILE, RECORDS_MAGIC, Schema, Table,
    TableError,
};
pub use value::{ColumnType, Record, Value, ValueError};
