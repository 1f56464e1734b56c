//! Wire messages for the storage write API.
//!
//! These mirror the subset of `google.cloud.bigquery.storage.v1` this crate
//! exchanges with the transport, plus `google.rpc.Status` for structured
//! error details. They are plain prost messages; field tags match the
//! upstream definitions so they interoperate with a generated client.

mod storage;
mod table;

pub use storage::*;
pub use table::*;

/// `google.protobuf.Int64Value`: wrapper message for `int64`.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Int64Value {
    /// The int64 value.
    #[prost(int64, tag = "1")]
    pub value: i64,
}

/// `google.rpc` types.
pub mod rpc {
    /// The `Status` type defines a logical error model.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Status {
        /// The status code, which should be an enum value of `google.rpc.Code`.
        #[prost(int32, tag = "1")]
        pub code: i32,
        /// A developer-facing error message.
        #[prost(string, tag = "2")]
        pub message: ::prost::alloc::string::String,
        /// A list of messages that carry the error details.
        #[prost(message, repeated, tag = "3")]
        pub details: ::prost::alloc::vec::Vec<::prost_types::Any>,
    }
}

/// Type URL under which a `StorageError` is packed into a status detail.
pub const STORAGE_ERROR_TYPE_URL: &str =
    "type.googleapis.com/google.cloud.bigquery.storage.v1.StorageError";
