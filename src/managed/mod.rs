//! Managed writes: connections that keep acknowledgements in order, and the
//! writers and client built on them.

mod client;
mod connection;
mod error;
mod json_writer;
mod pending_write;
mod writer;

pub use client::{default_stream_path, StreamConnectionOptions, StreamType, WriterClient};
pub use connection::{is_default_stream, ConnectionEvent, StreamConnection, DEFAULT_STREAM};
pub use error::{ClientError, JsonWriterError, RpcError, WriteError};
pub use json_writer::{JsonWriter, ROOT_SCOPE};
pub use pending_write::PendingWrite;
pub use writer::Writer;
