//! Table schema handling: compilation to protobuf descriptors, descriptor
//! normalization, and the JSON schema format.

pub mod adapt;
pub mod bigquery;
pub mod namespace;
pub mod normalize;

pub use adapt::{
    compile, compile_message, to_proto2_descriptor, to_proto3_descriptor, AdaptError, Syntax,
};
pub use bigquery::parse_table_schema;
pub use namespace::{namespace, FieldLayout, FieldRule, MessageLayout, Namespace};
pub use normalize::{message_descriptor, normalize_descriptor};
