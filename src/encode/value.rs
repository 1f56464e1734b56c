//! Row values.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// One row: column name to value.
pub type Row = BTreeMap<String, RowValue>;

/// A dynamically-typed column value, resolved against a descriptor at encode time.
#[derive(Debug, Clone, PartialEq)]
pub enum RowValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Timestamp(DateTime<Utc>),
    List(Vec<RowValue>),
    Struct(Row),
}

impl RowValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            RowValue::Null => "null",
            RowValue::Bool(_) => "bool",
            RowValue::Int(_) => "int",
            RowValue::Float(_) => "float",
            RowValue::String(_) => "string",
            RowValue::Bytes(_) => "bytes",
            RowValue::Date(_) => "date",
            RowValue::DateTime(_) => "datetime",
            RowValue::Timestamp(_) => "timestamp",
            RowValue::List(_) => "list",
            RowValue::Struct(_) => "struct",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RowValue::Null)
    }
}

impl From<serde_json::Value> for RowValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => RowValue::Null,
            Value::Bool(b) => RowValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => RowValue::Int(i),
                None => RowValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => RowValue::String(s),
            Value::Array(items) => RowValue::List(items.into_iter().map(RowValue::from).collect()),
            Value::Object(map) => RowValue::Struct(
                map.into_iter()
                    .map(|(k, v)| (k, RowValue::from(v)))
                    .collect(),
            ),
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for RowValue {
                fn from(v: $ty) -> Self {
                    RowValue::$variant(v.into())
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    i32 => Int,
    i64 => Int,
    f64 => Float,
    String => String,
    &str => String,
    Vec<u8> => Bytes,
    NaiveDate => Date,
    NaiveDateTime => DateTime,
    DateTime<Utc> => Timestamp,
    Row => Struct,
}

impl<T: Into<RowValue>> From<Option<T>> for RowValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(RowValue::Null, Into::into)
    }
}

/// Build a row from a JSON object. Returns `None` for any other JSON value.
pub fn row_from_json(value: serde_json::Value) -> Option<Row> {
    match RowValue::from(value) {
        RowValue::Struct(row) => Some(row),
        _ => None,
    }
}
