//! Row serialization through a message descriptor.
//!
//! Rows are assembled into a `DynamicMessage` field by field, then encoded with
//! prost. Values are coerced to the field's wire type where the conversion is
//! lossless (or range-checked); anything else is a type mismatch.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use prost::bytes::Bytes;
use prost::Message;
use prost_reflect::{Cardinality, DynamicMessage, FieldDescriptor, Kind, MessageDescriptor, Value};
use thiserror::Error;

use super::value::{Row, RowValue};

/// `num_days_from_ce` of 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Format used for date/time values written to string columns.
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Errors that can occur while encoding rows.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EncodeError {
    #[error("row {row}: unknown field {field}")]
    UnknownField { row: usize, field: String },

    #[error("row {row}: missing required field {field}")]
    MissingRequiredField { row: usize, field: String },

    #[error("row {row}: field {field} expects {expected}, got {found}")]
    TypeMismatch {
        row: usize,
        field: String,
        expected: String,
        found: &'static str,
    },

    #[error("row {row}: value for field {field} is out of range for {expected}")]
    OutOfRange {
        row: usize,
        field: String,
        expected: String,
    },
}

/// Serializes rows against a message descriptor.
#[derive(Debug, Clone)]
pub struct RowEncoder {
    descriptor: MessageDescriptor,
    convert_dates: bool,
}

impl RowEncoder {
    /// Create an encoder with date conversion disabled.
    pub fn new(descriptor: MessageDescriptor) -> Self {
        Self {
            descriptor,
            convert_dates: false,
        }
    }

    /// Enable or disable conversion of native date/time values to their wire form.
    ///
    /// Dates go to days since the epoch in int32 columns and to formatted text in
    /// string columns. Only [`RowValue::Timestamp`] converts into an int64 column,
    /// as microseconds since the epoch; DATETIME and TIME columns share that wire
    /// type with a different packing, so civil dates and datetimes are rejected there.
    pub fn with_date_conversion(mut self, enabled: bool) -> Self {
        self.convert_dates = enabled;
        self
    }

    pub fn set_descriptor(&mut self, descriptor: MessageDescriptor) {
        self.descriptor = descriptor;
    }

    pub fn descriptor(&self) -> &MessageDescriptor {
        &self.descriptor
    }

    /// Encode every row, failing on the first row that violates the descriptor.
    pub fn encode(&self, rows: &[Row]) -> Result<Vec<Vec<u8>>, EncodeError> {
        rows.iter()
            .enumerate()
            .map(|(index, row)| {
                let ctx = Context {
                    row: index,
                    convert_dates: self.convert_dates,
                };
                let message = ctx.build_message(&self.descriptor, row, "")?;
                Ok(message.encode_to_vec())
            })
            .collect()
    }
}

struct Context {
    row: usize,
    convert_dates: bool,
}

impl Context {
    fn build_message(
        &self,
        descriptor: &MessageDescriptor,
        row: &Row,
        prefix: &str,
    ) -> Result<DynamicMessage, EncodeError> {
        let mut message = DynamicMessage::new(descriptor.clone());

        for (name, value) in row {
            let path = join_path(prefix, name);
            let field = descriptor
                .get_field_by_name(name)
                .ok_or_else(|| EncodeError::UnknownField {
                    row: self.row,
                    field: path.clone(),
                })?;
            if let Some(converted) = self.field_value(&field, value, &path)? {
                message
                    .try_set_field(&field, converted)
                    .map_err(|_| self.mismatch(&path, &kind_name(&field.kind()), value))?;
            }
        }

        for field in descriptor.fields() {
            if field.cardinality() == Cardinality::Required && !message.has_field(&field) {
                return Err(EncodeError::MissingRequiredField {
                    row: self.row,
                    field: join_path(prefix, field.name()),
                });
            }
        }

        Ok(message)
    }

    /// The value to store for `field`, or `None` to leave it unset.
    fn field_value(
        &self,
        field: &FieldDescriptor,
        value: &RowValue,
        path: &str,
    ) -> Result<Option<Value>, EncodeError> {
        if value.is_null() {
            return Ok(None);
        }

        if field.is_list() {
            let RowValue::List(items) = value else {
                return Err(self.mismatch(path, "list", value));
            };
            let kind = field.kind();
            let items = items
                .iter()
                .map(|item| self.scalar_value(&kind, item, path))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Some(Value::List(items)));
        }

        self.scalar_value(&field.kind(), value, path).map(Some)
    }

    fn scalar_value(&self, kind: &Kind, value: &RowValue, path: &str) -> Result<Value, EncodeError> {
        let converted = match (kind, value) {
            (Kind::Bool, RowValue::Bool(b)) => Some(Value::Bool(*b)),

            (Kind::Int32 | Kind::Sint32 | Kind::Sfixed32, _) => {
                self.int_value(value, path, "int32", Value::I32, |v| Some(v.days()))?
            }
            (Kind::Int64 | Kind::Sint64 | Kind::Sfixed64, _) => {
                self.int_value(value, path, "int64", Value::I64, NativeDate::timestamp_micros)?
            }
            (Kind::Uint32 | Kind::Fixed32, RowValue::Int(i)) => {
                Some(Value::U32(self.in_range(*i, path, "uint32")?))
            }
            (Kind::Uint64 | Kind::Fixed64, RowValue::Int(i)) => {
                Some(Value::U64(self.in_range(*i, path, "uint64")?))
            }

            (Kind::Double, RowValue::Float(f)) => Some(Value::F64(*f)),
            (Kind::Double, RowValue::Int(i)) => Some(Value::F64(*i as f64)),
            (Kind::Double, RowValue::String(s)) => s.trim().parse().ok().map(Value::F64),
            (Kind::Float, RowValue::Float(f)) => Some(Value::F32(*f as f32)),
            (Kind::Float, RowValue::Int(i)) => Some(Value::F32(*i as f32)),

            (Kind::String, RowValue::String(s)) => Some(Value::String(s.clone())),
            (Kind::String, RowValue::Int(i)) => Some(Value::String(i.to_string())),
            (Kind::String, RowValue::Float(f)) => Some(Value::String(f.to_string())),
            (Kind::String, RowValue::Date(d)) if self.convert_dates => {
                Some(Value::String(d.and_time(NaiveTime::MIN).format(DATETIME_FORMAT).to_string()))
            }
            (Kind::String, RowValue::DateTime(dt)) if self.convert_dates => {
                Some(Value::String(dt.format(DATETIME_FORMAT).to_string()))
            }

            (Kind::Bytes, RowValue::Bytes(b)) => Some(Value::Bytes(Bytes::from(b.clone()))),
            (Kind::Bytes, RowValue::String(s)) => Some(Value::Bytes(Bytes::from(s.clone().into_bytes()))),

            (Kind::Enum(e), RowValue::Int(i)) => {
                Some(Value::EnumNumber(self.in_range(*i, path, e.full_name())?))
            }
            (Kind::Enum(e), RowValue::String(s)) => e.get_value_by_name(s).map(|v| Value::EnumNumber(v.number())),

            (Kind::Message(nested), RowValue::Struct(row)) => {
                Some(Value::Message(self.build_message(nested, row, path)?))
            }

            _ => None,
        };

        converted.ok_or_else(|| self.mismatch(path, &kind_name(kind), value))
    }

    /// Integer columns accept ints, numeric strings and, with date conversion on,
    /// native dates via `from_date`.
    fn int_value<T>(
        &self,
        value: &RowValue,
        path: &str,
        expected: &str,
        wrap: fn(T) -> Value,
        from_date: fn(&NativeDate) -> Option<i64>,
    ) -> Result<Option<Value>, EncodeError>
    where
        T: TryFrom<i64>,
    {
        let int = match value {
            RowValue::Int(i) => *i,
            RowValue::String(s) => match s.trim().parse::<i64>() {
                Ok(i) => i,
                Err(_) => return Ok(None),
            },
            other => match NativeDate::from_value(other).filter(|_| self.convert_dates) {
                Some(date) => match from_date(&date) {
                    Some(i) => i,
                    None => return Ok(None),
                },
                None => return Ok(None),
            },
        };
        self.in_range(int, path, expected).map(|v| Some(wrap(v)))
    }

    fn in_range<T: TryFrom<i64>>(&self, value: i64, path: &str, expected: &str) -> Result<T, EncodeError> {
        T::try_from(value).map_err(|_| EncodeError::OutOfRange {
            row: self.row,
            field: path.to_string(),
            expected: expected.to_string(),
        })
    }

    fn mismatch(&self, path: &str, expected: &str, value: &RowValue) -> EncodeError {
        EncodeError::TypeMismatch {
            row: self.row,
            field: path.to_string(),
            expected: expected.to_string(),
            found: value.kind_name(),
        }
    }
}

/// A native date/time value eligible for integer conversion.
enum NativeDate {
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Timestamp(DateTime<Utc>),
}

impl NativeDate {
    fn from_value(value: &RowValue) -> Option<Self> {
        match value {
            RowValue::Date(d) => Some(NativeDate::Date(*d)),
            RowValue::DateTime(dt) => Some(NativeDate::DateTime(*dt)),
            RowValue::Timestamp(ts) => Some(NativeDate::Timestamp(*ts)),
            _ => None,
        }
    }

    /// Days since the unix epoch.
    fn days(&self) -> i64 {
        let date = match self {
            NativeDate::Date(d) => *d,
            NativeDate::DateTime(dt) => dt.date(),
            NativeDate::Timestamp(ts) => ts.date_naive(),
        };
        i64::from(date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE)
    }

    /// Microseconds since the unix epoch, for instants only.
    fn timestamp_micros(&self) -> Option<i64> {
        match self {
            NativeDate::Timestamp(ts) => Some(ts.timestamp_micros()),
            NativeDate::Date(_) | NativeDate::DateTime(_) => None,
        }
    }
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn kind_name(kind: &Kind) -> String {
    match kind {
        Kind::Message(m) => m.full_name().to_string(),
        Kind::Enum(e) => e.full_name().to_string(),
        other => format!("{other:?}").to_ascii_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::table_field_schema::{Mode, Type};
    use crate::proto::{TableFieldSchema, TableSchema};
    use crate::schema::{compile_message, message_descriptor, to_proto2_descriptor, Syntax};
    use chrono::TimeZone;

    fn field(name: &str, ty: Type, mode: Mode) -> TableFieldSchema {
        TableFieldSchema {
            name: name.to_string(),
            r#type: ty as i32,
            mode: mode as i32,
            ..Default::default()
        }
    }

    fn descriptor(fields: Vec<TableFieldSchema>) -> MessageDescriptor {
        compile_message(&TableSchema { fields }, "root", Syntax::Proto2).unwrap()
    }

    fn row(values: Vec<(&str, RowValue)>) -> Row {
        values.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    fn decode(descriptor: &MessageDescriptor, bytes: &[u8]) -> DynamicMessage {
        DynamicMessage::decode(descriptor.clone(), bytes).unwrap()
    }

    mod basic_tests {
        use super::*;

        #[test]
        fn test_encode_scalars() {
            let desc = descriptor(vec![
                field("id", Type::Int64, Mode::Required),
                field("name", Type::String, Mode::Nullable),
                field("score", Type::Double, Mode::Nullable),
                field("ok", Type::Bool, Mode::Nullable),
                field("raw", Type::Bytes, Mode::Nullable),
            ]);
            let encoder = RowEncoder::new(desc.clone());
            let rows = encoder
                .encode(&[row(vec![
                    ("id", RowValue::Int(42)),
                    ("name", RowValue::from("alice")),
                    ("score", RowValue::Float(0.5)),
                    ("ok", RowValue::Bool(true)),
                    ("raw", RowValue::Bytes(vec![1, 2, 3])),
                ])])
                .unwrap();

            assert_eq!(rows.len(), 1);
            let msg = decode(&desc, &rows[0]);
            assert_eq!(msg.get_field_by_name("id").unwrap().as_i64(), Some(42));
            assert_eq!(msg.get_field_by_name("name").unwrap().as_str(), Some("alice"));
            assert_eq!(msg.get_field_by_name("score").unwrap().as_f64(), Some(0.5));
            assert_eq!(msg.get_field_by_name("ok").unwrap().as_bool(), Some(true));
            assert_eq!(
                msg.get_field_by_name("raw").unwrap().as_bytes().map(|b| b.to_vec()),
                Some(vec![1, 2, 3])
            );
        }

        #[test]
        fn test_nulls_leave_field_unset() {
            let desc = descriptor(vec![field("name", Type::String, Mode::Nullable)]);
            let rows = RowEncoder::new(desc.clone())
                .encode(&[row(vec![("name", RowValue::Null)])])
                .unwrap();
            assert!(rows[0].is_empty());
            let name = desc.get_field_by_name("name").unwrap();
            assert!(!decode(&desc, &rows[0]).has_field(&name));
        }

        #[test]
        fn test_repeated_and_nested() {
            let desc = descriptor(vec![
                field("tags", Type::String, Mode::Repeated),
                TableFieldSchema {
                    fields: vec![field("city", Type::String, Mode::Required)],
                    ..field("address", Type::Struct, Mode::Nullable)
                },
            ]);
            let rows = RowEncoder::new(desc.clone())
                .encode(&[row(vec![
                    ("tags", RowValue::List(vec!["a".into(), "b".into()])),
                    (
                        "address",
                        RowValue::Struct(row(vec![("city", RowValue::from("paris"))])),
                    ),
                ])])
                .unwrap();

            let msg = decode(&desc, &rows[0]);
            let tags = msg.get_field_by_name("tags").unwrap();
            assert_eq!(tags.as_list().map(|l| l.len()), Some(2));
            let address = msg.get_field_by_name("address").unwrap();
            let address = address.as_message().unwrap();
            assert_eq!(address.get_field_by_name("city").unwrap().as_str(), Some("paris"));
        }

        #[test]
        fn test_encodes_against_normalized_descriptor() {
            let schema = TableSchema {
                fields: vec![TableFieldSchema {
                    fields: vec![field("v", Type::Int64, Mode::Nullable)],
                    ..field("inner", Type::Struct, Mode::Nullable)
                }],
            };
            let desc = message_descriptor(&to_proto2_descriptor(&schema, "root").unwrap()).unwrap();
            let rows = RowEncoder::new(desc.clone())
                .encode(&[row(vec![("inner", RowValue::Struct(row(vec![("v", RowValue::Int(3))])))])])
                .unwrap();
            let msg = decode(&desc, &rows[0]);
            let inner = msg.get_field_by_name("inner").unwrap();
            assert_eq!(
                inner.as_message().unwrap().get_field_by_name("v").unwrap().as_i64(),
                Some(3)
            );
        }
    }

    mod coercion_tests {
        use super::*;

        #[test]
        fn test_numeric_strings() {
            let desc = descriptor(vec![
                field("n", Type::Int64, Mode::Nullable),
                field("x", Type::Double, Mode::Nullable),
            ]);
            let rows = RowEncoder::new(desc.clone())
                .encode(&[row(vec![("n", "123".into()), ("x", "2.5".into())])])
                .unwrap();
            let msg = decode(&desc, &rows[0]);
            assert_eq!(msg.get_field_by_name("n").unwrap().as_i64(), Some(123));
            assert_eq!(msg.get_field_by_name("x").unwrap().as_f64(), Some(2.5));
        }

        #[test]
        fn test_int_to_double_and_string() {
            let desc = descriptor(vec![
                field("x", Type::Double, Mode::Nullable),
                field("s", Type::String, Mode::Nullable),
            ]);
            let rows = RowEncoder::new(desc.clone())
                .encode(&[row(vec![("x", RowValue::Int(2)), ("s", RowValue::Int(9))])])
                .unwrap();
            let msg = decode(&desc, &rows[0]);
            assert_eq!(msg.get_field_by_name("x").unwrap().as_f64(), Some(2.0));
            assert_eq!(msg.get_field_by_name("s").unwrap().as_str(), Some("9"));
        }

        #[test]
        fn test_int32_range_check() {
            let desc = descriptor(vec![field("d", Type::Date, Mode::Nullable)]);
            let err = RowEncoder::new(desc)
                .encode(&[row(vec![("d", RowValue::Int(i64::MAX))])])
                .unwrap_err();
            assert!(matches!(err, EncodeError::OutOfRange { .. }));
        }

        #[test]
        fn test_string_to_bytes() {
            let desc = descriptor(vec![field("num", Type::Numeric, Mode::Nullable)]);
            let rows = RowEncoder::new(desc.clone())
                .encode(&[row(vec![("num", "1.25".into())])])
                .unwrap();
            let msg = decode(&desc, &rows[0]);
            assert_eq!(
                msg.get_field_by_name("num").unwrap().as_bytes().map(|b| b.to_vec()),
                Some(b"1.25".to_vec())
            );
        }
    }

    mod date_tests {
        use super::*;

        fn date_descriptor() -> MessageDescriptor {
            descriptor(vec![
                field("d", Type::Date, Mode::Nullable),
                field("ts", Type::Timestamp, Mode::Nullable),
                field("dt_str", Type::String, Mode::Nullable),
            ])
        }

        #[test]
        fn test_dates_converted_when_enabled() {
            let desc = date_descriptor();
            let date = NaiveDate::from_ymd_opt(1970, 1, 11).unwrap();
            let ts = Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 1).unwrap();
            let dt = NaiveDate::from_ymd_opt(2024, 3, 5)
                .unwrap()
                .and_hms_milli_opt(7, 8, 9, 120)
                .unwrap();

            let rows = RowEncoder::new(desc.clone())
                .with_date_conversion(true)
                .encode(&[row(vec![
                    ("d", RowValue::Date(date)),
                    ("ts", RowValue::Timestamp(ts)),
                    ("dt_str", RowValue::DateTime(dt)),
                ])])
                .unwrap();

            let msg = decode(&desc, &rows[0]);
            assert_eq!(msg.get_field_by_name("d").unwrap().as_i32(), Some(10));
            assert_eq!(msg.get_field_by_name("ts").unwrap().as_i64(), Some(1_000_000));
            assert_eq!(
                msg.get_field_by_name("dt_str").unwrap().as_str(),
                Some("2024-03-05 07:08:09.120")
            );
        }

        #[test]
        fn test_dates_rejected_when_disabled() {
            let desc = date_descriptor();
            let date = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
            let err = RowEncoder::new(desc)
                .encode(&[row(vec![("d", RowValue::Date(date))])])
                .unwrap_err();
            assert!(matches!(err, EncodeError::TypeMismatch { found: "date", .. }));
        }

        #[test]
        fn test_date_before_epoch() {
            let desc = date_descriptor();
            let date = NaiveDate::from_ymd_opt(1969, 12, 31).unwrap();
            let rows = RowEncoder::new(desc.clone())
                .with_date_conversion(true)
                .encode(&[row(vec![("d", RowValue::Date(date))])])
                .unwrap();
            assert_eq!(decode(&desc, &rows[0]).get_field_by_name("d").unwrap().as_i32(), Some(-1));
        }

        #[test]
        fn test_civil_values_rejected_for_int64_columns() {
            let desc = descriptor(vec![
                field("dt", Type::Datetime, Mode::Nullable),
                field("t", Type::Time, Mode::Nullable),
                field("ts", Type::Timestamp, Mode::Nullable),
            ]);
            let encoder = RowEncoder::new(desc).with_date_conversion(true);
            let dt = NaiveDate::from_ymd_opt(2024, 3, 5)
                .unwrap()
                .and_hms_opt(7, 8, 9)
                .unwrap();

            for name in ["dt", "t", "ts"] {
                let err = encoder
                    .encode(&[row(vec![(name, RowValue::DateTime(dt))])])
                    .unwrap_err();
                assert!(
                    matches!(err, EncodeError::TypeMismatch { found: "datetime", .. }),
                    "{name}: {err:?}"
                );
            }
            let err = encoder
                .encode(&[row(vec![("ts", RowValue::Date(dt.date()))])])
                .unwrap_err();
            assert!(matches!(err, EncodeError::TypeMismatch { found: "date", .. }));
        }

        #[test]
        fn test_picosecond_timestamp_passes_through() {
            let mut pico = field("ts_pico", Type::Timestamp, Mode::Nullable);
            pico.timestamp_precision = Some(12);
            let desc = descriptor(vec![pico]);
            let value = "2025-05-07T20:17:05.123456789012Z";

            let rows = RowEncoder::new(desc.clone())
                .with_date_conversion(true)
                .encode(&[row(vec![("ts_pico", value.into())])])
                .unwrap();
            let msg = decode(&desc, &rows[0]);
            assert_eq!(msg.get_field_by_name("ts_pico").unwrap().as_str(), Some(value));
        }

        #[test]
        fn test_native_timestamp_never_converted_to_string() {
            let mut pico = field("ts_pico", Type::Timestamp, Mode::Nullable);
            pico.timestamp_precision = Some(12);
            let desc = descriptor(vec![pico]);
            let ts = Utc.with_ymd_and_hms(2025, 5, 7, 20, 17, 5).unwrap();

            let err = RowEncoder::new(desc)
                .with_date_conversion(true)
                .encode(&[row(vec![("ts_pico", RowValue::Timestamp(ts))])])
                .unwrap_err();
            assert!(matches!(err, EncodeError::TypeMismatch { found: "timestamp", .. }));
        }
    }

    mod error_tests {
        use super::*;

        #[test]
        fn test_unknown_field() {
            let desc = descriptor(vec![field("a", Type::String, Mode::Nullable)]);
            let err = RowEncoder::new(desc)
                .encode(&[row(vec![("a", "x".into())]), row(vec![("b", "y".into())])])
                .unwrap_err();
            assert_eq!(
                err,
                EncodeError::UnknownField {
                    row: 1,
                    field: "b".to_string()
                }
            );
        }

        #[test]
        fn test_missing_required_nested_field() {
            let desc = descriptor(vec![TableFieldSchema {
                fields: vec![field("city", Type::String, Mode::Required)],
                ..field("address", Type::Struct, Mode::Nullable)
            }]);
            let err = RowEncoder::new(desc)
                .encode(&[row(vec![("address", RowValue::Struct(Row::new()))])])
                .unwrap_err();
            assert_eq!(
                err,
                EncodeError::MissingRequiredField {
                    row: 0,
                    field: "address.city".to_string()
                }
            );
        }

        #[test]
        fn test_scalar_for_repeated_field() {
            let desc = descriptor(vec![field("tags", Type::String, Mode::Repeated)]);
            let err = RowEncoder::new(desc)
                .encode(&[row(vec![("tags", "a".into())])])
                .unwrap_err();
            assert!(matches!(err, EncodeError::TypeMismatch { ref expected, .. } if expected == "list"));
        }

        #[test]
        fn test_wrong_type() {
            let desc = descriptor(vec![field("ok", Type::Bool, Mode::Nullable)]);
            let err = RowEncoder::new(desc)
                .encode(&[row(vec![("ok", "yes".into())])])
                .unwrap_err();
            assert!(matches!(err, EncodeError::TypeMismatch { found: "string", .. }));
        }
    }
}
