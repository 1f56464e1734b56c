use super::rpc;
use super::table::TableSchema;

///////////////////////////////////////////////////////////////////////////////
// Write streams //////////////////////////////////////////////////////////////

/// Information about a single stream that gets data inside the storage system.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WriteStream {
    /// Name of the stream, in the form
    /// `projects/{project}/datasets/{dataset}/tables/{table}/streams/{stream}`.
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    /// Immutable. Type of the stream.
    #[prost(enumeration = "write_stream::Type", tag = "2")]
    pub r#type: i32,
    /// Create time of the stream.
    #[prost(message, optional, tag = "3")]
    pub create_time: ::core::option::Option<::prost_types::Timestamp>,
    /// Commit time of the stream, set once a PENDING stream has been committed.
    #[prost(message, optional, tag = "4")]
    pub commit_time: ::core::option::Option<::prost_types::Timestamp>,
    /// The schema of the destination table, populated only for FULL views.
    #[prost(message, optional, tag = "5")]
    pub table_schema: ::core::option::Option<TableSchema>,
    /// The geographic location where the stream's dataset resides.
    #[prost(string, tag = "8")]
    pub location: ::prost::alloc::string::String,
}
/// Nested message and enum types in `WriteStream`.
pub mod write_stream {
    /// Type enum of the stream.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Type {
        /// Unknown type. Also used for the implicit default stream.
        Unspecified = 0,
        /// Data will commit automatically and appear as soon as the write is acknowledged.
        Committed = 1,
        /// Data is invisible until the stream is committed.
        Pending = 2,
        /// Data is only visible up to the offset to which it was flushed.
        Buffered = 3,
    }
    /// Which fields of a stream a `GetWriteStream` call populates.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum View {
        Unspecified = 0,
        Basic = 1,
        Full = 2,
    }
}

/// Request message for `CreateWriteStream`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateWriteStreamRequest {
    /// Reference to the table to which the stream belongs.
    #[prost(string, tag = "1")]
    pub parent: ::prost::alloc::string::String,
    /// Stream to be created.
    #[prost(message, optional, tag = "2")]
    pub write_stream: ::core::option::Option<WriteStream>,
}
/// Request message for `GetWriteStream`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetWriteStreamRequest {
    /// Name of the stream to get.
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(enumeration = "write_stream::View", tag = "3")]
    pub view: i32,
}
/// Request message for `FinalizeWriteStream`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FinalizeWriteStreamRequest {
    /// Name of the stream to finalize.
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
}
/// Response message for `FinalizeWriteStream`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FinalizeWriteStreamResponse {
    /// Number of rows in the finalized stream.
    #[prost(int64, tag = "1")]
    pub row_count: i64,
}
/// Request message for `FlushRows`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FlushRowsRequest {
    /// The stream that is the target of the flush operation.
    #[prost(string, tag = "1")]
    pub write_stream: ::prost::alloc::string::String,
    /// Ending offset of the flush operation. Rows before this offset (including
    /// this offset) will be flushed.
    #[prost(message, optional, tag = "2")]
    pub offset: ::core::option::Option<crate::proto::Int64Value>,
}
/// Response message for `FlushRows`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FlushRowsResponse {
    /// The rows before this offset (including this offset) are flushed.
    #[prost(int64, tag = "1")]
    pub offset: i64,
}
/// Request message for `BatchCommitWriteStreams`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BatchCommitWriteStreamsRequest {
    /// Parent table that all the streams should belong to.
    #[prost(string, tag = "1")]
    pub parent: ::prost::alloc::string::String,
    /// The group of streams that will be committed atomically.
    #[prost(string, repeated, tag = "2")]
    pub write_streams: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}
/// Response message for `BatchCommitWriteStreams`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BatchCommitWriteStreamsResponse {
    /// The time at which streams were committed. Unset if any stream failed.
    #[prost(message, optional, tag = "1")]
    pub commit_time: ::core::option::Option<::prost_types::Timestamp>,
    /// Stream level errors if the commit failed.
    #[prost(message, repeated, tag = "2")]
    pub stream_errors: ::prost::alloc::vec::Vec<StorageError>,
}

///////////////////////////////////////////////////////////////////////////////
// AppendRows /////////////////////////////////////////////////////////////////

/// Protobuf schema is an API presentation of the proto buffer schema.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoSchema {
    /// Descriptor for input message. The provided descriptor must be self
    /// contained, such that data rows sent can be fully decoded using only the
    /// single descriptor.
    #[prost(message, optional, tag = "1")]
    pub proto_descriptor: ::core::option::Option<::prost_types::DescriptorProto>,
}
/// A batch of serialized rows.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoRows {
    /// A sequence of rows serialized as a Protocol Buffer.
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub serialized_rows: ::prost::alloc::vec::Vec<::prost::alloc::vec::Vec<u8>>,
}

/// Request message for `AppendRows`.
///
/// The first request on a connection must carry the writer schema; later
/// requests may repeat it.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AppendRowsRequest {
    /// The write stream to which rows are appended.
    #[prost(string, tag = "1")]
    pub write_stream: ::prost::alloc::string::String,
    /// If present, the write is only performed if the next append offset is
    /// the same as the provided value.
    #[prost(message, optional, tag = "2")]
    pub offset: ::core::option::Option<crate::proto::Int64Value>,
    /// Rows in proto format.
    #[prost(message, optional, tag = "4")]
    pub proto_rows: ::core::option::Option<append_rows_request::ProtoData>,
    /// Id set by client to annotate its identity.
    #[prost(string, tag = "6")]
    pub trace_id: ::prost::alloc::string::String,
    /// How missing values are interpreted, keyed by field name.
    #[prost(
        map = "string, enumeration(append_rows_request::MissingValueInterpretation)",
        tag = "7"
    )]
    pub missing_value_interpretations:
        ::std::collections::HashMap<::prost::alloc::string::String, i32>,
    /// Default interpretation for missing values of fields not present in
    /// `missing_value_interpretations`.
    #[prost(enumeration = "append_rows_request::MissingValueInterpretation", tag = "8")]
    pub default_missing_value_interpretation: i32,
}
/// Nested message and enum types in `AppendRowsRequest`.
pub mod append_rows_request {
    /// Proto schema and data.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ProtoData {
        /// Proto schema used to serialize the data.
        #[prost(message, optional, tag = "1")]
        pub writer_schema: ::core::option::Option<super::ProtoSchema>,
        /// Serialized row data in protobuf message format.
        #[prost(message, optional, tag = "2")]
        pub rows: ::core::option::Option<super::ProtoRows>,
    }
    /// How a missing value in a row is interpreted.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum MissingValueInterpretation {
        /// Invalid missing value interpretation. Requests with this value are rejected.
        Unspecified = 0,
        /// Missing value is interpreted as NULL.
        NullValue = 1,
        /// Missing value is interpreted as the column default value if declared.
        DefaultValue = 2,
    }
}

/// Response message for `AppendRows`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AppendRowsResponse {
    #[prost(oneof = "append_rows_response::Response", tags = "1, 2")]
    pub response: ::core::option::Option<append_rows_response::Response>,
    /// If the backend detects a schema update, it is passed to the user so
    /// that the user can use it to input new type of message.
    #[prost(message, optional, tag = "3")]
    pub updated_schema: ::core::option::Option<TableSchema>,
    /// Rows that were rejected, with the reason for each.
    #[prost(message, repeated, tag = "4")]
    pub row_errors: ::prost::alloc::vec::Vec<RowError>,
    /// The target of the append operation.
    #[prost(string, tag = "5")]
    pub write_stream: ::prost::alloc::string::String,
}
/// Nested message and enum types in `AppendRowsResponse`.
pub mod append_rows_response {
    /// AppendResult is returned for successful append requests.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct AppendResult {
        /// The row offset at which the last append occurred. Not set for the
        /// default stream.
        #[prost(message, optional, tag = "1")]
        pub offset: ::core::option::Option<crate::proto::Int64Value>,
    }
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Response {
        /// Result if the append is successful.
        #[prost(message, tag = "1")]
        AppendResult(AppendResult),
        /// Error returned when problems were encountered.
        #[prost(message, tag = "2")]
        Error(super::rpc::Status),
    }
}

impl AppendRowsResponse {
    /// The acknowledged offset, if the append succeeded on an offset-tracked stream.
    pub fn acknowledged_offset(&self) -> Option<i64> {
        match &self.response {
            Some(append_rows_response::Response::AppendResult(result)) => {
                result.offset.as_ref().map(|o| o.value)
            }
            _ => None,
        }
    }

    /// The in-band error of this response, if any.
    pub fn error(&self) -> Option<&rpc::Status> {
        match &self.response {
            Some(append_rows_response::Response::Error(status)) => Some(status),
            _ => None,
        }
    }
}

///////////////////////////////////////////////////////////////////////////////
// Errors /////////////////////////////////////////////////////////////////////

/// Structured custom error message for storage service.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StorageError {
    /// BigQuery Storage specific error code.
    #[prost(enumeration = "storage_error::StorageErrorCode", tag = "1")]
    pub code: i32,
    /// Name of the failed entity.
    #[prost(string, tag = "2")]
    pub entity: ::prost::alloc::string::String,
    /// Message that describes the error.
    #[prost(string, tag = "3")]
    pub error_message: ::prost::alloc::string::String,
}
/// Nested message and enum types in `StorageError`.
pub mod storage_error {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum StorageErrorCode {
        Unspecified = 0,
        /// Table is not found in the system.
        TableNotFound = 1,
        /// Stream is already committed.
        StreamAlreadyCommitted = 2,
        /// Stream is not found.
        StreamNotFound = 3,
        /// Invalid stream type.
        InvalidStreamType = 4,
        /// Invalid stream state.
        InvalidStreamState = 5,
        /// Stream is finalized.
        StreamFinalized = 6,
        /// There is a schema mismatch caused by the user schema having extra
        /// fields compared to the table schema.
        SchemaMismatchExtraFields = 7,
        /// Offset already exists.
        OffsetAlreadyExists = 8,
        /// Offset out of range.
        OffsetOutOfRange = 9,
    }
}

/// The message returned when a row is rejected.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RowError {
    /// Index of the malformed row in the request.
    #[prost(int64, tag = "1")]
    pub index: i64,
    /// Structured error reason for a row error.
    #[prost(enumeration = "row_error::RowErrorCode", tag = "2")]
    pub code: i32,
    /// Description of the issue encountered when processing the row.
    #[prost(string, tag = "3")]
    pub message: ::prost::alloc::string::String,
}
/// Nested message and enum types in `RowError`.
pub mod row_error {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum RowErrorCode {
        Unspecified = 0,
        /// One or more fields in the row has errors.
        FieldsError = 1,
    }
}
