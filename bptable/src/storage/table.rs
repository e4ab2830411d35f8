//! Tables: a schema, a primary-key index and a record map.
//!
//! Every record is stored once behind an [`Arc`] and shared by two views:
//! - the B+Tree index, keyed by primary-key value, for point and range lookups
//! - an unordered map from primary-key value to record, for full scans
//!
//! Both views are updated together on every mutation.
//!
//! # On-disk layout
//!
//! `save` writes two artifacts into `{data_dir}/{table}/`:
//! - `records.bin`: the record map
//! - `index.bin`: the B+Tree node graph
//!
//! The schema descriptor next to them is owned by the database.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::storage::btree::{BPlusTree, BTreeError, DEFAULT_ORDER};
use crate::storage::codec::{
    Codec, CodecError, Reader, frame, read_if_exists, unframe, write_len,
};
use crate::storage::value::{ColumnType, Record, Value, ValueError};

/// Magic number identifying a records artifact.
pub const RECORDS_MAGIC: [u8; 8] = *b"BPTRECRD";

/// File name of the records artifact inside a table directory.
pub const RECORDS_FILE: &str = "records.bin";

/// File name of the index artifact inside a table directory.
pub const INDEX_FILE: &str = "index.bin";

/// A declared column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
}

impl Column {
    #[must_use]
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// Ordered column declarations plus the primary-key column.
///
/// # Invariants
///
/// - Column names are unique
/// - `primary_key` names one of the columns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<Column>,
    primary_key: String,
}

impl Schema {
    pub fn new(
        columns: impl IntoIterator<Item = Column>,
        primary_key: impl Into<String>,
    ) -> Result<Self, TableError> {
        let schema = Self {
            columns: columns.into_iter().collect(),
            primary_key: primary_key.into(),
        };
        schema.validate()?;
        Ok(schema)
    }

    /// Check the invariants, e.g. after deserializing.
    pub fn validate(&self) -> Result<(), TableError> {
        for (i, column) in self.columns.iter().enumerate() {
            if self.columns[..i].iter().any(|c| c.name == column.name) {
                return Err(TableError::DuplicateColumn(column.name.clone()));
            }
        }
        if !self.contains(&self.primary_key) {
            return Err(TableError::PrimaryKeyNotInSchema(self.primary_key.clone()));
        }
        Ok(())
    }

    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    #[must_use]
    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    #[must_use]
    pub fn contains(&self, column: &str) -> bool {
        self.column_type(column).is_some()
    }

    #[must_use]
    pub fn column_type(&self, column: &str) -> Option<ColumnType> {
        self.columns
            .iter()
            .find(|c| c.name == column)
            .map(|c| c.column_type)
    }

    /// First declared column absent from `record`.
    #[must_use]
    pub fn missing_column(&self, record: &Record) -> Option<&str> {
        self.columns
            .iter()
            .map(|c| c.name.as_str())
            .find(|name| !record.contains(name))
    }

    /// Convert user text into a value for `column`.
    pub fn coerce(&self, column: &str, raw: &str) -> Result<Value, TableError> {
        let column_type = self
            .column_type(column)
            .ok_or_else(|| TableError::UnknownColumn(column.to_owned()))?;
        Ok(column_type.coerce(raw)?)
    }
}

/// Aggregate operations over one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

impl FromStr for Aggregate {
    type Err = TableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sum" => Ok(Self::Sum),
            "avg" => Ok(Self::Avg),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "count" => Ok(Self::Count),
            _ => Err(TableError::UnknownAggregate(s.to_owned())),
        }
    }
}

/// Result of [`Table::aggregate`].
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateValue {
    /// `min` or `max` over an empty table.
    Null,
    Int(i64),
    Float(f64),
    Value(Value),
}

impl std::fmt::Display for AggregateValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Value(v) => write!(f, "{v}"),
        }
    }
}

/// A named table.
#[derive(Debug)]
pub struct Table {
    name: String,
    schema: Schema,
    index: BPlusTree<Value, Arc<Record>>,
    records: HashMap<Value, Arc<Record>>,
}

impl Table {
    /// Create an empty table with the default index order.
    #[must_use]
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
            index: BPlusTree::new(),
            records: HashMap::new(),
        }
    }

    /// Create an empty table whose index has the given order.
    pub fn with_order(
        name: impl Into<String>,
        schema: Schema,
        order: usize,
    ) -> Result<Self, TableError> {
        Ok(Self {
            name: name.into(),
            schema,
            index: BPlusTree::with_order(order)?,
            records: HashMap::new(),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn schema(&self) -> &Schema {
        &self.schema
    }

    #[must_use]
    pub fn primary_key(&self) -> &str {
        self.schema.primary_key()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Read-only access to the primary-key index.
    #[must_use]
    pub const fn index(&self) -> &BPlusTree<Value, Arc<Record>> {
        &self.index
    }

    /// Primary-key value of a record that passed [`Self::check_columns`].
    fn key_of(&self, record: &Record) -> Result<Value, TableError> {
        record
            .get(self.primary_key())
            .cloned()
            .ok_or_else(|| TableError::MissingColumn(self.primary_key().to_owned()))
    }

    fn check_columns(&self, record: &Record) -> Result<(), TableError> {
        match self.schema.missing_column(record) {
            Some(column) => Err(TableError::MissingColumn(column.to_owned())),
            None => Ok(()),
        }
    }

    /// Insert a new record.
    ///
    /// Returns `Ok(false)` without touching anything if a record with the same
    /// primary key exists.
    pub fn insert(&mut self, record: Record) -> Result<bool, TableError> {
        self.check_columns(&record)?;
        let key = self.key_of(&record)?;
        if self.index.contains_key(&key) {
            return Ok(false);
        }

        let record = Arc::new(record);
        self.index.insert(key.clone(), Arc::clone(&record));
        self.records.insert(key, record);
        Ok(true)
    }

    /// Replace the record stored under `key`.
    ///
    /// Returns `Ok(false)` if there is no such record. The record stays under
    /// `key` even if its own primary-key column holds something else.
    pub fn update(&mut self, key: &Value, record: Record) -> Result<bool, TableError> {
        if !self.index.contains_key(key) {
            return Ok(false);
        }
        self.check_columns(&record)?;

        let record = Arc::new(record);
        self.index.update(key, Arc::clone(&record));
        self.records.insert(key.clone(), record);
        Ok(true)
    }

    /// Remove the record stored under `key`. Returns whether it existed.
    pub fn delete(&mut self, key: &Value) -> bool {
        if !self.index.delete(key) {
            return false;
        }
        self.records.remove(key);
        true
    }

    #[must_use]
    pub fn select(&self, key: &Value) -> Option<&Record> {
        self.index.find(key).map(Arc::as_ref)
    }

    /// Records with `start <= key <= end`, in key order.
    #[must_use]
    pub fn select_range(&self, start: &Value, end: &Value) -> Vec<&Record> {
        self.index
            .range(start, end)
            .map(|(_, record)| record.as_ref())
            .collect()
    }

    /// Records matching `predicate`, in no particular order.
    pub fn select_where(&self, predicate: impl Fn(&Record) -> bool) -> Vec<&Record> {
        self.records()
            .filter(|record| predicate(record))
            .collect()
    }

    /// Every record, in no particular order.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.records.values().map(Arc::as_ref)
    }

    /// Every record in primary-key order.
    pub fn scan(&self) -> impl Iterator<Item = &Record> {
        self.index.iter().map(|(_, record)| record.as_ref())
    }

    /// Aggregate one schema column across all records.
    ///
    /// `sum` and `avg` need integer values. `avg` of an empty table is 0.0;
    /// `min` and `max` of an empty table are [`AggregateValue::Null`].
    pub fn aggregate(&self, column: &str, op: Aggregate) -> Result<AggregateValue, TableError> {
        if !self.schema.contains(column) {
            return Err(TableError::UnknownColumn(column.to_owned()));
        }
        let values = self.records().filter_map(|record| record.get(column));

        match op {
            Aggregate::Count => Ok(AggregateValue::Int(
                i64::try_from(self.len()).unwrap_or(i64::MAX),
            )),
            Aggregate::Min => Ok(values
                .min()
                .cloned()
                .map_or(AggregateValue::Null, AggregateValue::Value)),
            Aggregate::Max => Ok(values
                .max()
                .cloned()
                .map_or(AggregateValue::Null, AggregateValue::Value)),
            Aggregate::Sum => self.sum(column).map(AggregateValue::Int),
            Aggregate::Avg => {
                if self.is_empty() {
                    return Ok(AggregateValue::Float(0.0));
                }
                let sum = self.sum(column)?;
                #[allow(clippy::cast_precision_loss)]
                let avg = sum as f64 / self.len() as f64;
                Ok(AggregateValue::Float(avg))
            }
        }
    }

    fn sum(&self, column: &str) -> Result<i64, TableError> {
        self.records()
            .filter_map(|record| record.get(column))
            .try_fold(0i64, |acc, value| {
                let n = value
                    .as_int()
                    .ok_or_else(|| TableError::NotNumeric(column.to_owned()))?;
                acc.checked_add(n)
                    .ok_or_else(|| TableError::NumericOverflow(column.to_owned()))
            })
    }

    /// Write the record map and the index into `{data_dir}/{name}/`.
    pub fn save(&self, data_dir: &Path) -> Result<(), TableError> {
        let table_dir = data_dir.join(&self.name);
        std::fs::create_dir_all(&table_dir)?;

        let mut payload = Vec::new();
        write_len(&mut payload, self.len());
        for (key, record) in &self.index {
            key.encode(&mut payload);
            record.encode(&mut payload);
        }
        std::fs::write(table_dir.join(RECORDS_FILE), frame(&RECORDS_MAGIC, &payload))?;
        self.index.save(&table_dir.join(INDEX_FILE))?;

        info!(table = %self.name, records = self.len(), "table saved");
        Ok(())
    }

    /// Load a table saved with [`Table::save`].
    ///
    /// Missing artifacts are treated as an empty table. If the index and the
    /// record map disagree on the key set, the index is rebuilt from the
    /// records.
    pub fn load(name: impl Into<String>, schema: Schema, data_dir: &Path) -> Result<Self, TableError> {
        let name = name.into();
        let table_dir = data_dir.join(&name);

        let records = match read_if_exists(&table_dir.join(RECORDS_FILE))? {
            Some(bytes) => decode_records(&bytes)?,
            None => {
                debug!(table = %name, "no records file, starting empty");
                HashMap::new()
            }
        };

        let index = match BPlusTree::load(&table_dir.join(INDEX_FILE))? {
            Some(mut index) if same_keys(&index, &records) => {
                // Point the index back at the shared records
                for (key, value) in index.values_mut() {
                    if let Some(record) = records.get(key) {
                        *value = Arc::clone(record);
                    }
                }
                index
            }
            Some(index) => {
                warn!(
                    table = %name,
                    index_len = index.len(),
                    records = records.len(),
                    "index disagrees with records, rebuilding"
                );
                build_index(&records, index.order())?
            }
            None => build_index(&records, DEFAULT_ORDER)?,
        };

        info!(table = %name, records = records.len(), "table loaded");
        Ok(Self {
            name,
            schema,
            index,
            records,
        })
    }
}

fn decode_records(bytes: &[u8]) -> Result<HashMap<Value, Arc<Record>>, CodecError> {
    let payload = unframe(&RECORDS_MAGIC, bytes)?;
    let mut reader = Reader::new(payload);
    let count = reader.read_len()?;
    let mut records = HashMap::with_capacity(count);
    for _ in 0..count {
        let key = Value::decode(&mut reader)?;
        let record = Arc::<Record>::decode(&mut reader)?;
        records.insert(key, record);
    }
    reader.finish()?;
    Ok(records)
}

fn same_keys(index: &BPlusTree<Value, Arc<Record>>, records: &HashMap<Value, Arc<Record>>) -> bool {
    index.len() == records.len() && index.iter().all(|(key, _)| records.contains_key(key))
}

fn build_index(
    records: &HashMap<Value, Arc<Record>>,
    order: usize,
) -> Result<BPlusTree<Value, Arc<Record>>, BTreeError> {
    let mut index = BPlusTree::with_order(order)?;
    let mut keys: Vec<&Value> = records.keys().collect();
    keys.sort();
    for key in keys {
        index.insert(key.clone(), Arc::clone(&records[key]));
    }
    Ok(index)
}

/// Errors that can occur during table operations.
#[derive(Debug)]
pub enum TableError {
    /// A record lacks a column declared in the schema.
    MissingColumn(String),
    /// A column that is not in the schema.
    UnknownColumn(String),
    /// A column declared twice.
    DuplicateColumn(String),
    /// The primary key does not name a schema column.
    PrimaryKeyNotInSchema(String),
    /// `sum` or `avg` over a column holding non-integer values.
    NotNumeric(String),
    /// `sum` overflowed a 64-bit integer.
    NumericOverflow(String),
    /// Aggregate name other than sum, avg, min, max or count.
    UnknownAggregate(String),
    /// User input could not be converted to the column type.
    Value(ValueError),
    /// Index error.
    BTree(BTreeError),
    /// File I/O error.
    Io(std::io::Error),
    /// Malformed records artifact.
    Codec(CodecError),
}

impl std::fmt::Display for TableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingColumn(column) => write!(f, "record is missing column '{column}'"),
            Self::UnknownColumn(column) => write!(f, "column '{column}' does not exist"),
            Self::DuplicateColumn(column) => write!(f, "column '{column}' is declared twice"),
            Self::PrimaryKeyNotInSchema(column) => {
                write!(f, "primary key '{column}' is not in the schema")
            }
            Self::NotNumeric(column) => write!(f, "column '{column}' is not numeric"),
            Self::NumericOverflow(column) => write!(f, "sum of column '{column}' overflows"),
            Self::UnknownAggregate(op) => write!(f, "unknown operation '{op}'"),
            Self::Value(e) => write!(f, "value error: {e}"),
            Self::BTree(e) => write!(f, "index error: {e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Codec(e) => write!(f, "codec error: {e}"),
        }
    }
}

impl std::error::Error for TableError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Value(e) => Some(e),
            Self::BTree(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::Codec(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ValueError> for TableError {
    fn from(e: ValueError) -> Self {
        Self::Value(e)
    }
}

impl From<BTreeError> for TableError {
    fn from(e: BTreeError) -> Self {
        Self::BTree(e)
    }
}

impl From<std::io::Error> for TableError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<CodecError> for TableError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users_schema() -> Schema {
        Schema::new(
            [
                Column::new("id", ColumnType::Int),
                Column::new("name", ColumnType::String),
            ],
            "id",
        )
        .expect("valid schema")
    }

    fn user(id: i64, name: &str) -> Record {
        Record::new().with("id", id).with("name", name)
    }

    fn users_table(count: i64) -> Table {
        let mut table = Table::new("users", users_schema());
        for id in 0..count {
            assert!(table.insert(user(id, &format!("user-{id}"))).expect("insert"));
        }
        table
    }

    fn ids(records: &[&Record]) -> Vec<i64> {
        records
            .iter()
            .map(|r| r.get("id").and_then(Value::as_int).expect("int id"))
            .collect()
    }

    #[test]
    fn test_schema_validation() {
        assert!(matches!(
            Schema::new([Column::new("id", ColumnType::Int)], "name"),
            Err(TableError::PrimaryKeyNotInSchema(pk)) if pk == "name"
        ));
        assert!(matches!(
            Schema::new(
                [
                    Column::new("id", ColumnType::Int),
                    Column::new("id", ColumnType::String)
                ],
                "id"
            ),
            Err(TableError::DuplicateColumn(_))
        ));
    }

    #[test]
    fn test_schema_json_format() {
        let json = serde_json::to_value(users_schema()).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({
                "columns": [
                    {"name": "id", "type": "int"},
                    {"name": "name", "type": "string"}
                ],
                "primary_key": "id"
            })
        );
    }

    #[test]
    fn test_insert_duplicate_and_missing_column() {
        let mut table = Table::new("users", users_schema());

        assert!(table.insert(user(1, "a")).expect("insert"));
        assert!(!table.insert(user(1, "b")).expect("duplicate is not an error"));
        assert_eq!(table.select(&Value::Int(1)), Some(&user(1, "a")));

        let result = table.insert(Record::new().with("id", 2));
        assert!(matches!(result, Err(TableError::MissingColumn(column)) if column == "name"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_extra_columns_are_kept() {
        let mut table = Table::new("users", users_schema());
        let record = user(1, "a").with("email", "a@example.com");
        assert!(table.insert(record.clone()).expect("insert"));
        assert_eq!(table.select(&Value::Int(1)), Some(&record));
    }

    #[test]
    fn test_update() {
        let mut table = users_table(5);

        assert!(table.update(&Value::Int(2), user(2, "renamed")).expect("update"));
        assert_eq!(
            table.select(&Value::Int(2)).and_then(|r| r.get("name")),
            Some(&Value::from("renamed"))
        );
        assert!(!table.update(&Value::Int(99), user(99, "x")).expect("absent key"));

        let result = table.update(&Value::Int(3), Record::new().with("id", 3));
        assert!(matches!(result, Err(TableError::MissingColumn(_))));

        // Both views see the new record
        let scanned: Vec<&Record> = table.select_where(|r| r.get("name") == Some(&Value::from("renamed")));
        assert_eq!(ids(&scanned), vec![2]);
    }

    #[test]
    fn test_delete() {
        let mut table = users_table(10);
        assert!(table.delete(&Value::Int(4)));
        assert!(!table.delete(&Value::Int(4)));
        assert_eq!(table.select(&Value::Int(4)), None);
        assert_eq!(table.len(), 9);
        assert_eq!(table.records().count(), 9);
        table.index().check_invariants().expect("invariants hold");
    }

    #[test]
    fn test_select_range_and_scan() {
        let table = users_table(50);
        assert_eq!(
            ids(&table.select_range(&Value::Int(10), &Value::Int(14))),
            vec![10, 11, 12, 13, 14]
        );
        assert!(table.select_range(&Value::Int(60), &Value::Int(70)).is_empty());

        let scanned: Vec<&Record> = table.scan().collect();
        assert_eq!(ids(&scanned), (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_select_range_string_keys() {
        let schema = Schema::new(
            [
                Column::new("code", ColumnType::String),
                Column::new("population", ColumnType::Int),
            ],
            "code",
        )
        .expect("valid schema");
        let mut table = Table::with_order("countries", schema, 3).expect("valid order");
        let codes = ["us", "de", "fr", "br", "jp", "ca", "au", "in", "cn", "es", "gb", "it"];
        for (population, code) in (1_i64..).zip(codes) {
            let record = Record::new().with("code", code).with("population", population);
            assert!(table.insert(record).expect("insert"));
        }
        assert!(table.index().height() > 2);

        let codes_of = |records: Vec<&Record>| -> Vec<String> {
            records
                .iter()
                .filter_map(|r| r.get("code").and_then(Value::as_str).map(str::to_owned))
                .collect()
        };

        // Bounds need not be stored keys
        let range = table.select_range(&Value::from("c"), &Value::from("f"));
        assert_eq!(codes_of(range), vec!["ca", "cn", "de", "es"]);

        let range = table.select_range(&Value::from("de"), &Value::from("fr"));
        assert_eq!(codes_of(range), vec!["de", "es", "fr"]);

        assert!(table.select_range(&Value::from("v"), &Value::from("z")).is_empty());

        let key = table.schema().coerce("code", "jp").expect("string passes through");
        assert_eq!(
            table.select(&key).and_then(|r| r.get("population")),
            Some(&Value::Int(5))
        );
        table.index().check_invariants().expect("invariants hold");
    }

    #[test]
    fn test_select_where() {
        let table = users_table(20);
        let mut even = ids(&table.select_where(|r| r.get("id").and_then(Value::as_int).is_some_and(|id| id % 2 == 0)));
        even.sort_unstable();
        assert_eq!(even, (0..20).step_by(2).collect::<Vec<_>>());
    }

    #[test]
    fn test_aggregate() {
        let table = users_table(5);

        assert_eq!(table.aggregate("id", Aggregate::Sum).expect("sum"), AggregateValue::Int(10));
        assert_eq!(table.aggregate("id", Aggregate::Avg).expect("avg"), AggregateValue::Float(2.0));
        assert_eq!(
            table.aggregate("id", Aggregate::Min).expect("min"),
            AggregateValue::Value(Value::Int(0))
        );
        assert_eq!(
            table.aggregate("name", Aggregate::Max).expect("max"),
            AggregateValue::Value(Value::from("user-4"))
        );
        assert_eq!(table.aggregate("name", Aggregate::Count).expect("count"), AggregateValue::Int(5));

        assert!(matches!(table.aggregate("name", Aggregate::Sum), Err(TableError::NotNumeric(_))));
        assert!(matches!(table.aggregate("age", Aggregate::Count), Err(TableError::UnknownColumn(_))));
    }

    #[test]
    fn test_aggregate_empty_table() {
        let table = Table::new("users", users_schema());
        assert_eq!(table.aggregate("id", Aggregate::Sum).expect("sum"), AggregateValue::Int(0));
        assert_eq!(table.aggregate("id", Aggregate::Avg).expect("avg"), AggregateValue::Float(0.0));
        assert_eq!(table.aggregate("id", Aggregate::Min).expect("min"), AggregateValue::Null);
        assert_eq!(table.aggregate("id", Aggregate::Max).expect("max"), AggregateValue::Null);
        assert_eq!(table.aggregate("id", Aggregate::Count).expect("count"), AggregateValue::Int(0));
    }

    #[test]
    fn test_aggregate_overflow() {
        let mut table = Table::new("users", users_schema());
        table.insert(user(i64::MAX, "a")).expect("insert");
        table.insert(user(1, "b")).expect("insert");
        assert!(matches!(table.aggregate("id", Aggregate::Sum), Err(TableError::NumericOverflow(_))));
    }

    #[test]
    fn test_parse_aggregate() {
        assert_eq!("avg".parse::<Aggregate>().expect("parse"), Aggregate::Avg);
        assert!(matches!("median".parse::<Aggregate>(), Err(TableError::UnknownAggregate(op)) if op == "median"));
    }

    #[test]
    fn test_coerce_with_schema() {
        let schema = users_schema();
        assert_eq!(schema.coerce("id", "7").expect("int"), Value::Int(7));
        assert_eq!(schema.coerce("name", "7").expect("string"), Value::from("7"));
        assert!(matches!(schema.coerce("id", "seven"), Err(TableError::Value(_))));
        assert!(matches!(schema.coerce("age", "7"), Err(TableError::UnknownColumn(_))));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let mut table = Table::with_order("users", users_schema(), 5).expect("valid order");
        for id in (0..200).rev() {
            table.insert(user(id, &format!("user-{id}"))).expect("insert");
        }
        for id in (0..200).step_by(3) {
            table.delete(&Value::Int(id));
        }
        table.save(dir.path()).expect("save");

        let loaded = Table::load("users", users_schema(), dir.path()).expect("load");
        assert_eq!(loaded.len(), table.len());
        assert_eq!(loaded.index().order(), 5);
        assert_eq!(
            ids(&loaded.select_range(&Value::Int(20), &Value::Int(40))),
            ids(&table.select_range(&Value::Int(20), &Value::Int(40)))
        );
        assert_eq!(
            loaded.aggregate("id", Aggregate::Sum).expect("sum"),
            table.aggregate("id", Aggregate::Sum).expect("sum")
        );

        // Index and record map share one allocation per record again
        let key = Value::Int(1);
        let from_index = loaded.index().find(&key).expect("indexed");
        let from_map = loaded.records.get(&key).expect("stored");
        assert!(Arc::ptr_eq(from_index, from_map));
    }

    #[test]
    fn test_load_without_artifacts_is_empty() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let table = Table::load("users", users_schema(), dir.path()).expect("load");
        assert!(table.is_empty());
        assert_eq!(table.index().order(), DEFAULT_ORDER);
    }

    #[test]
    fn test_load_rebuilds_index_without_index_file() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let table = users_table(30);
        table.save(dir.path()).expect("save");
        std::fs::remove_file(dir.path().join("users").join(INDEX_FILE)).expect("remove index");

        let loaded = Table::load("users", users_schema(), dir.path()).expect("load");
        assert_eq!(loaded.index().len(), 30);
        assert_eq!(loaded.select(&Value::Int(29)), Some(&user(29, "user-29")));
        loaded.index().check_invariants().expect("invariants hold");
    }

    #[test]
    fn test_load_corrupt_records_is_an_error() {
        let dir = tempfile::tempdir().expect("create temp dir");
        users_table(3).save(dir.path()).expect("save");

        let path = dir.path().join("users").join(RECORDS_FILE);
        let mut bytes = std::fs::read(&path).expect("read");
        bytes.truncate(bytes.len() - 1);
        std::fs::write(&path, bytes).expect("write");

        let result = Table::load("users", users_schema(), dir.path());
        assert!(matches!(result, Err(TableError::Codec(_))));
    }
}
