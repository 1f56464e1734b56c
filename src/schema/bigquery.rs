//! Table schemas in the REST/JSON format.
//!
//! This is the format `bq show --schema` prints and the tables API returns:
//! either `{"fields": [...]}` or a bare array of fields, with legacy type
//! names (`INTEGER`, `FLOAT`, `BOOLEAN`, `RECORD`) and int64 values encoded as
//! strings.

use serde::{Deserialize, Deserializer};

use crate::proto::table_field_schema::{Mode, Type};
use crate::proto::{TableFieldSchema, TableSchema};
use crate::schema::adapt::AdaptError;

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum JsonSchemaDocument {
    Table { fields: Vec<JsonField> },
    Fields(Vec<JsonField>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub fields: Vec<JsonField>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "int64_value")]
    pub max_length: Option<i64>,
    #[serde(default, deserialize_with = "int64_value")]
    pub precision: Option<i64>,
    #[serde(default, deserialize_with = "int64_value")]
    pub scale: Option<i64>,
    #[serde(default)]
    pub default_value_expression: Option<String>,
    #[serde(default, deserialize_with = "int64_value")]
    pub timestamp_precision: Option<i64>,
}

/// Parse a JSON table schema into the storage representation.
pub fn parse_table_schema(json: &str) -> Result<TableSchema, AdaptError> {
    let fields = match serde_json::from_str::<JsonSchemaDocument>(json)? {
        JsonSchemaDocument::Table { fields } => fields,
        JsonSchemaDocument::Fields(fields) => fields,
    };
    Ok(TableSchema {
        fields: fields.iter().map(convert_field).collect::<Result<_, _>>()?,
    })
}

fn convert_field(field: &JsonField) -> Result<TableFieldSchema, AdaptError> {
    let ty = parse_type(&field.field_type).ok_or_else(|| AdaptError::UnsupportedType {
        field: field.name.clone(),
        type_name: field.field_type.clone(),
    })?;
    let mode = match field.mode.as_deref() {
        None => Mode::Nullable,
        Some(mode) => parse_mode(mode).ok_or_else(|| AdaptError::UnsupportedMode {
            field: field.name.clone(),
            mode: mode.to_string(),
        })?,
    };

    Ok(TableFieldSchema {
        name: field.name.clone(),
        r#type: ty as i32,
        mode: mode as i32,
        fields: field.fields.iter().map(convert_field).collect::<Result<_, _>>()?,
        description: field.description.clone().unwrap_or_default(),
        max_length: field.max_length.unwrap_or_default(),
        precision: field.precision.unwrap_or_default(),
        scale: field.scale.unwrap_or_default(),
        default_value_expression: field.default_value_expression.clone().unwrap_or_default(),
        timestamp_precision: field.timestamp_precision,
    })
}

fn parse_type(name: &str) -> Option<Type> {
    let ty = match name.to_ascii_uppercase().as_str() {
        "STRING" => Type::String,
        "BYTES" => Type::Bytes,
        "INTEGER" | "INT64" => Type::Int64,
        "FLOAT" | "FLOAT64" | "DOUBLE" => Type::Double,
        "NUMERIC" | "DECIMAL" => Type::Numeric,
        "BIGNUMERIC" | "BIGDECIMAL" => Type::Bignumeric,
        "BOOLEAN" | "BOOL" => Type::Bool,
        "TIMESTAMP" => Type::Timestamp,
        "DATE" => Type::Date,
        "TIME" => Type::Time,
        "DATETIME" => Type::Datetime,
        "GEOGRAPHY" => Type::Geography,
        "RECORD" | "STRUCT" => Type::Struct,
        "JSON" => Type::Json,
        "INTERVAL" => Type::Interval,
        "RANGE" => Type::Range,
        _ => return None,
    };
    Some(ty)
}

fn parse_mode(name: &str) -> Option<Mode> {
    match name.to_ascii_uppercase().as_str() {
        "NULLABLE" => Some(Mode::Nullable),
        "REQUIRED" => Some(Mode::Required),
        "REPEATED" => Some(Mode::Repeated),
        _ => None,
    }
}

/// Accept int64 values either as JSON numbers or as decimal strings.
fn int64_value<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Int64Repr {
        Number(i64),
        Text(String),
    }

    match Option::<Int64Repr>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Int64Repr::Number(n)) => Ok(Some(n)),
        Some(Int64Repr::Text(s)) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}
