/// Schema of a table, as reported by the write API and consumed by the schema adapter.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TableSchema {
    /// Describes the fields in a table.
    #[prost(message, repeated, tag = "1")]
    pub fields: ::prost::alloc::vec::Vec<TableFieldSchema>,
}
/// A field in a `TableSchema`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TableFieldSchema {
    /// The field name. Letters, numbers and underscores only.
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    /// The field data type.
    #[prost(enumeration = "table_field_schema::Type", tag = "2")]
    pub r#type: i32,
    /// The field mode. The default value is NULLABLE.
    #[prost(enumeration = "table_field_schema::Mode", tag = "3")]
    pub mode: i32,
    /// Describes the nested schema fields if the type property is set to STRUCT.
    #[prost(message, repeated, tag = "4")]
    pub fields: ::prost::alloc::vec::Vec<TableFieldSchema>,
    /// The field description.
    #[prost(string, tag = "6")]
    pub description: ::prost::alloc::string::String,
    /// Maximum length of values of this field for STRING or BYTES.
    #[prost(int64, tag = "7")]
    pub max_length: i64,
    /// Precision (maximum number of total digits in base 10) for NUMERIC or BIGNUMERIC.
    #[prost(int64, tag = "8")]
    pub precision: i64,
    /// Scale for NUMERIC or BIGNUMERIC.
    #[prost(int64, tag = "9")]
    pub scale: i64,
    /// A SQL expression specifying the default value for this field.
    #[prost(string, tag = "10")]
    pub default_value_expression: ::prost::alloc::string::String,
    /// Fractional-second digits stored for TIMESTAMP values.
    ///
    /// Unset means microsecond precision (6). 12 means picosecond precision.
    #[prost(int64, optional, tag = "27")]
    pub timestamp_precision: ::core::option::Option<i64>,
}
/// Nested message and enum types in `TableFieldSchema`.
pub mod table_field_schema {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Type {
        /// Illegal value.
        Unspecified = 0,
        /// 64K, UTF8.
        String = 1,
        /// 64-bit signed.
        Int64 = 2,
        /// 64-bit IEEE floating point.
        Double = 3,
        /// Aggregate type.
        Struct = 4,
        /// 64K, Binary.
        Bytes = 5,
        /// 2-valued.
        Bool = 6,
        /// 64-bit signed usec since UTC epoch.
        Timestamp = 7,
        /// Civil date - Year, Month, Day.
        Date = 8,
        /// Civil time - Hour, Minute, Second, Microseconds.
        Time = 9,
        /// Combination of civil date and civil time.
        Datetime = 10,
        /// Geography object.
        Geography = 11,
        /// Numeric value.
        Numeric = 12,
        /// BigNumeric value.
        Bignumeric = 13,
        /// Interval.
        Interval = 14,
        /// JSON, String.
        Json = 15,
        /// Range.
        Range = 16,
    }
    impl Type {
        /// String value of the enum field names used in the ProtoBuf definition.
        pub fn as_str_name(&self) -> &'static str {
            match self {
                Type::Unspecified => "TYPE_UNSPECIFIED",
                Type::String => "STRING",
                Type::Int64 => "INT64",
                Type::Double => "DOUBLE",
                Type::Struct => "STRUCT",
                Type::Bytes => "BYTES",
                Type::Bool => "BOOL",
                Type::Timestamp => "TIMESTAMP",
                Type::Date => "DATE",
                Type::Time => "TIME",
                Type::Datetime => "DATETIME",
                Type::Geography => "GEOGRAPHY",
                Type::Numeric => "NUMERIC",
                Type::Bignumeric => "BIGNUMERIC",
                Type::Interval => "INTERVAL",
                Type::Json => "JSON",
                Type::Range => "RANGE",
            }
        }
    }
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Mode {
        /// Illegal value.
        Unspecified = 0,
        Nullable = 1,
        Required = 2,
        Repeated = 3,
    }
    impl Mode {
        /// String value of the enum field names used in the ProtoBuf definition.
        pub fn as_str_name(&self) -> &'static str {
            match self {
                Mode::Unspecified => "MODE_UNSPECIFIED",
                Mode::Nullable => "NULLABLE",
                Mode::Required => "REQUIRED",
                Mode::Repeated => "REPEATED",
            }
        }
    }
}
