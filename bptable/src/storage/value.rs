//! Scalar values, column types and records.
//!
//! Tables only distinguish two scalar kinds: integers and strings. Anything
//! declared with a type other than `int` is stored as a string.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::storage::codec::{Codec, CodecError, Reader, write_i64, write_len, write_str, write_u8};

/// Value type discriminants used in the byte format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum ValueTag {
    Int = 0x01,
    Str = 0x02,
}

impl TryFrom<u8> for ValueTag {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Int),
            0x02 => Ok(Self::Str),
            _ => Err(value),
        }
    }
}

/// A single column value.
///
/// Values are totally ordered so they can key the primary index. Integers
/// sort before strings; a well-formed table never mixes the two in one
/// column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Value {
    Int(i64),
    Str(String),
}

impl Value {
    /// The column type this value satisfies.
    #[must_use]
    pub const fn column_type(&self) -> ColumnType {
        match self {
            Self::Int(_) => ColumnType::Int,
            Self::Str(_) => ColumnType::String,
        }
    }

    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Str(_) => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Int(_) => None,
            Self::Str(s) => Some(s),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s}"),
        }
    }
}

impl Codec for Value {
    fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            Self::Int(n) => {
                write_u8(buf, ValueTag::Int as u8);
                write_i64(buf, *n);
            }
            Self::Str(s) => {
                write_u8(buf, ValueTag::Str as u8);
                write_str(buf, s);
            }
        }
    }

    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        let tag = reader.read_u8()?;
        match ValueTag::try_from(tag).map_err(|tag| CodecError::InvalidTag { what: "value", tag })? {
            ValueTag::Int => Ok(Self::Int(reader.read_i64()?)),
            ValueTag::Str => Ok(Self::Str(reader.read_string()?)),
        }
    }
}

/// Declared type of a column.
///
/// Persisted by name: `"int"` or `"string"`. Unknown names read back as
/// `String`, matching the pass-through rule for non-integer columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ColumnType {
    Int,
    String,
}

impl ColumnType {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::String => "string",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Self {
        if name == "int" { Self::Int } else { Self::String }
    }

    /// Convert user-supplied text into a value of this type.
    ///
    /// `int` columns parse the text as a signed integer; every other column
    /// keeps it verbatim.
    pub fn coerce(self, raw: &str) -> Result<Value, ValueError> {
        match self {
            Self::Int => raw
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| ValueError::NotAnInteger(raw.to_owned())),
            Self::String => Ok(Value::Str(raw.to_owned())),
        }
    }
}

impl From<String> for ColumnType {
    fn from(name: String) -> Self {
        Self::from_name(&name)
    }
}

impl From<ColumnType> for String {
    fn from(column_type: ColumnType) -> Self {
        column_type.name().to_owned()
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A table row: column name to value.
///
/// Columns outside the table schema are allowed and kept as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            fields: BTreeMap::new(),
        }
    }

    /// Set a column, returning the previous value if there was one.
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(column.into(), value.into())
    }

    /// Builder-style [`Record::insert`].
    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(column, value);
        self
    }

    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields.get(column)
    }

    #[must_use]
    pub fn contains(&self, column: &str) -> bool {
        self.fields.contains_key(column)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl<K: Into<String>, const N: usize> From<[(K, Value); N]> for Record {
    fn from(pairs: [(K, Value); N]) -> Self {
        pairs.into_iter().collect()
    }
}

impl std::fmt::Display for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("{")?;
        for (i, (column, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match value {
                Value::Int(n) => write!(f, "{column}: {n}")?,
                Value::Str(s) => write!(f, "{column}: {s:?}")?,
            }
        }
        f.write_str("}")
    }
}

impl Codec for Record {
    fn encode(&self, buf: &mut Vec<u8>) {
        write_len(buf, self.fields.len());
        for (column, value) in &self.fields {
            write_str(buf, column);
            value.encode(buf);
        }
    }

    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        let count = reader.read_len()?;
        let mut fields = BTreeMap::new();
        for _ in 0..count {
            let column = reader.read_string()?;
            let value = Value::decode(reader)?;
            fields.insert(column, value);
        }
        Ok(Self { fields })
    }
}

/// Errors converting raw input into values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// Text for an `int` column did not parse as an integer.
    NotAnInteger(String),
}

impl std::fmt::Display for ValueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAnInteger(raw) => write!(f, "'{raw}' is not a valid integer"),
        }
    }
}

impl std::error::Error for ValueError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_ordering() {
        assert!(Value::Int(-5) < Value::Int(3));
        assert!(Value::from("apple") < Value::from("banana"));
        assert!(Value::Int(i64::MAX) < Value::from(""));
    }

    #[test]
    fn test_value_codec() {
        for value in [Value::Int(-7), Value::from("héllo"), Value::from("")] {
            let mut buf = Vec::new();
            value.encode(&mut buf);
            let mut reader = Reader::new(&buf);
            assert_eq!(Value::decode(&mut reader).expect("decode"), value);
            reader.finish().expect("fully consumed");
        }
    }

    #[test]
    fn test_value_invalid_tag() {
        let mut reader = Reader::new(&[0x09]);
        assert_eq!(
            Value::decode(&mut reader),
            Err(CodecError::InvalidTag {
                what: "value",
                tag: 0x09
            })
        );
    }

    #[test]
    fn test_column_type_names() {
        assert_eq!(ColumnType::from_name("int"), ColumnType::Int);
        assert_eq!(ColumnType::from_name("string"), ColumnType::String);
        assert_eq!(ColumnType::from_name("str"), ColumnType::String);
        assert_eq!(ColumnType::Int.to_string(), "int");
    }

    #[test]
    fn test_column_type_serde() {
        let json = serde_json::to_string(&ColumnType::Int).expect("serialize");
        assert_eq!(json, "\"int\"");
        let parsed: ColumnType = serde_json::from_str("\"varchar\"").expect("deserialize");
        assert_eq!(parsed, ColumnType::String);
    }

    #[test]
    fn test_coerce() {
        assert_eq!(ColumnType::Int.coerce(" 42 "), Ok(Value::Int(42)));
        assert_eq!(
            ColumnType::Int.coerce("forty"),
            Err(ValueError::NotAnInteger("forty".to_string()))
        );
        assert_eq!(ColumnType::String.coerce(" 42 "), Ok(Value::from(" 42 ")));
    }

    #[test]
    fn test_record_codec() {
        let record = Record::from([("id", Value::Int(1)), ("name", Value::from("a"))]);
        let mut buf = Vec::new();
        record.encode(&mut buf);

        let mut reader = Reader::new(&buf);
        let decoded = Record::decode(&mut reader).expect("decode");
        assert_eq!(decoded, record);
        assert_eq!(decoded.get("name"), Some(&Value::from("a")));
    }

    #[test]
    fn test_record_display() {
        let record = Record::new().with("id", 1).with("name", "a");
        assert_eq!(record.to_string(), "{id: 1, name: \"a\"}");
    }
}
