//! The RPC collaborator used by connections and the client.
//!
//! This crate does not own the wire: a [`WriteTransport`] is whatever can issue
//! the unary stream-management calls and open the duplex `AppendRows` call.
//! A tonic-generated `BigQueryWriteClient` satisfies it with one forwarding
//! line per method. [`memory::InMemoryTransport`] is the test double.

pub mod memory;

use async_trait::async_trait;
use futures::stream::BoxStream;
use prost::Message;
use tonic::metadata::MetadataMap;
use tonic::{Code, Status};

use crate::proto::storage_error::StorageErrorCode;
use crate::proto::{
    rpc, AppendRowsRequest, AppendRowsResponse, BatchCommitWriteStreamsRequest,
    BatchCommitWriteStreamsResponse, CreateWriteStreamRequest, FinalizeWriteStreamRequest,
    FinalizeWriteStreamResponse, FlushRowsRequest, FlushRowsResponse, GetWriteStreamRequest,
    StorageError, WriteStream, STORAGE_ERROR_TYPE_URL,
};

/// Header used by the service to route a request to its stream.
pub const REQUEST_PARAMS_HEADER: &str = "x-goog-request-params";

/// Inbound half of an `AppendRows` call.
pub type AppendRowsStream = BoxStream<'static, Result<AppendRowsResponse, Status>>;

/// Outbound half of an `AppendRows` call.
pub type AppendRequestStream = BoxStream<'static, AppendRowsRequest>;

/// Stream-management and append calls of the write service.
#[async_trait]
pub trait WriteTransport: Send + Sync + 'static {
    async fn create_write_stream(
        &self,
        request: CreateWriteStreamRequest,
    ) -> Result<WriteStream, Status>;

    async fn get_write_stream(&self, request: GetWriteStreamRequest) -> Result<WriteStream, Status>;

    async fn finalize_write_stream(
        &self,
        request: FinalizeWriteStreamRequest,
    ) -> Result<FinalizeWriteStreamResponse, Status>;

    async fn flush_rows(&self, request: FlushRowsRequest) -> Result<FlushRowsResponse, Status>;

    async fn batch_commit_write_streams(
        &self,
        request: BatchCommitWriteStreamsRequest,
    ) -> Result<BatchCommitWriteStreamsResponse, Status>;

    /// Open the duplex call. `metadata` carries the routing header; the call
    /// ends when `requests` ends or the server closes it.
    async fn append_rows(
        &self,
        metadata: MetadataMap,
        requests: AppendRequestStream,
    ) -> Result<AppendRowsStream, Status>;
}

/// Build a status whose details carry a typed `StorageError`, the way the
/// service reports structured failures.
pub fn status_with_storage_error(
    code: Code,
    message: impl Into<String>,
    storage_code: StorageErrorCode,
) -> Status {
    let message = message.into();
    let detail = StorageError {
        code: storage_code as i32,
        entity: String::new(),
        error_message: message.clone(),
    };
    let status = rpc::Status {
        code: code as i32,
        message: message.clone(),
        details: vec![prost_types::Any {
            type_url: STORAGE_ERROR_TYPE_URL.to_string(),
            value: detail.encode_to_vec(),
        }],
    };
    Status::with_details(code, message, status.encode_to_vec().into())
}
