//! Error types for managed writes.

use std::fmt;

use prost::Message;
use thiserror::Error;
use tonic::{Code, Status};

use crate::encode::EncodeError;
use crate::proto::storage_error::StorageErrorCode;
use crate::proto::{rpc, RowError, StorageError};
use crate::schema::AdaptError;

/// Message the service uses when the writer schema has columns the table lacks.
const EXTRA_FIELDS_MESSAGE: &str = "Schema mismatch due to extra fields in user schema";

/// Suffix of the type URL a `StorageError` detail is packed under.
const STORAGE_ERROR_TYPE: &str = "google.cloud.bigquery.storage.v1.StorageError";

/// A failed RPC, in a form that can be cloned to every affected waiter.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcError {
    pub code: Code,
    pub message: String,
    /// Structured service error, when the status carried one.
    pub storage_error: Option<StorageError>,
    /// Per-row failures reported alongside an in-band error.
    pub row_errors: Vec<RowError>,
}

impl RpcError {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            storage_error: None,
            row_errors: Vec::new(),
        }
    }

    /// Convert an in-band `google.rpc.Status` from an append response.
    pub fn from_rpc_status(status: &rpc::Status, row_errors: &[RowError]) -> Self {
        Self {
            code: Code::from_i32(status.code),
            message: status.message.clone(),
            storage_error: find_storage_error(&status.details),
            row_errors: row_errors.to_vec(),
        }
    }

    /// Codes after which the channel is reopened.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.code,
            Code::Unavailable
                | Code::ResourceExhausted
                | Code::Aborted
                | Code::Cancelled
                | Code::DeadlineExceeded
        )
    }

    /// The writer schema has fields the table does not. Fatal for a connection.
    pub fn is_schema_mismatch(&self) -> bool {
        if self.code != Code::InvalidArgument {
            return false;
        }
        match &self.storage_error {
            Some(detail) => {
                detail.code() == StorageErrorCode::SchemaMismatchExtraFields
                    || detail.error_message.contains(EXTRA_FIELDS_MESSAGE)
            }
            None => self.message.contains(EXTRA_FIELDS_MESSAGE),
        }
    }
}

impl From<&Status> for RpcError {
    fn from(status: &Status) -> Self {
        let storage_error = if status.details().is_empty() {
            None
        } else {
            rpc::Status::decode(status.details())
                .ok()
                .and_then(|s| find_storage_error(&s.details))
        };
        Self {
            code: status.code(),
            message: status.message().to_string(),
            storage_error,
            row_errors: Vec::new(),
        }
    }
}

impl From<Status> for RpcError {
    fn from(status: Status) -> Self {
        Self::from(&status)
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)?;
        if let Some(detail) = &self.storage_error {
            write!(f, " ({:?}", detail.code())?;
            if !detail.entity.is_empty() {
                write!(f, " on {}", detail.entity)?;
            }
            f.write_str(")")?;
        }
        if !self.row_errors.is_empty() {
            write!(f, " [{} row errors]", self.row_errors.len())?;
        }
        Ok(())
    }
}

fn find_storage_error(details: &[prost_types::Any]) -> Option<StorageError> {
    details
        .iter()
        .filter(|any| any.type_url.ends_with(STORAGE_ERROR_TYPE))
        .find_map(|any| StorageError::decode(any.value.as_slice()).ok())
}

/// Errors delivered to pending writes and connection subscribers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WriteError {
    #[error("connection closed")]
    ConnectionClosed,

    #[error("permanent schema mismatch: {0}")]
    PermanentSchemaMismatch(RpcError),

    #[error("request failed: {0}")]
    Request(RpcError),

    #[error("transient channel error: {0}")]
    TransientChannel(RpcError),

    #[error("connection error: {0}")]
    Connection(RpcError),

    #[error("write aborted")]
    Aborted,

    #[error("rpc failed: {0}")]
    Rpc(RpcError),

    #[error("invalid stream id {0:?} for request metadata")]
    InvalidStreamId(String),

    #[error("no tokio runtime available to drive the connection")]
    NoRuntime,
}

impl WriteError {
    /// The RPC failure behind this error, if any.
    pub fn rpc_error(&self) -> Option<&RpcError> {
        match self {
            WriteError::PermanentSchemaMismatch(e)
            | WriteError::Request(e)
            | WriteError::TransientChannel(e)
            | WriteError::Connection(e)
            | WriteError::Rpc(e) => Some(e),
            WriteError::ConnectionClosed
            | WriteError::Aborted
            | WriteError::InvalidStreamId(_)
            | WriteError::NoRuntime => None,
        }
    }
}

/// Errors from [`JsonWriter`](super::JsonWriter).
#[derive(Debug, Error)]
pub enum JsonWriterError {
    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Schema(#[from] AdaptError),

    #[error("row {0} is not a JSON object")]
    NotAnObject(usize),
}

/// Errors from [`WriterClient`](super::WriterClient).
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("a destination table is required for the default stream")]
    MissingDestinationTable,

    #[error("either a stream id or a stream type and destination table is required")]
    MissingStreamId,

    #[error("rpc failed: {0}")]
    Rpc(RpcError),

    #[error(transparent)]
    Connection(#[from] WriteError),

    #[error(transparent)]
    Schema(#[from] AdaptError),
}

impl From<Status> for ClientError {
    fn from(status: Status) -> Self {
        ClientError::Rpc(status.into())
    }
}
