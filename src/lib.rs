//! Managed streaming writes for an append-only table service.
//!
//! Table schemas are compiled into protobuf descriptors ([`schema`]), rows are
//! serialized against them ([`encode`]), and [`managed`] sends the result over
//! a duplex append channel, matching acknowledgements to writes in send order.
//! The RPC layer itself is supplied by the caller through
//! [`transport::WriteTransport`].

pub mod config;
pub mod encode;
pub mod managed;
pub mod observability;
pub mod proto;
pub mod schema;
pub mod transport;

pub use config::{ConnectionOptions, InFlightPolicy, MissingValue, WriterConfig};
pub use encode::{Row, RowEncoder, RowValue};
pub use managed::{
    ConnectionEvent, JsonWriter, PendingWrite, StreamConnection, StreamConnectionOptions,
    StreamType, WriteError, Writer, WriterClient,
};
pub use schema::{compile, AdaptError, Syntax};
