//! Entry point: stream management and connection construction.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use prost_types::DescriptorProto;
use tracing::{debug, info};

use super::connection::{StreamConnection, WeakStreamConnection, DEFAULT_STREAM};
use super::error::ClientError;
use super::json_writer::JsonWriter;
use super::writer::Writer;
use crate::config::{ConnectionOptions, WriterConfig};
use crate::proto::{
    write_stream, BatchCommitWriteStreamsRequest, BatchCommitWriteStreamsResponse,
    CreateWriteStreamRequest, GetWriteStreamRequest, WriteStream,
};
use crate::transport::WriteTransport;

/// Write stream types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamType {
    /// The table's implicit stream. Rows are visible once acknowledged.
    #[default]
    Default,
    /// Rows are visible once acknowledged.
    Committed,
    /// Rows become visible when the stream is committed.
    Pending,
    /// Rows become visible when flushed.
    Buffered,
}

impl StreamType {
    fn as_proto(self) -> write_stream::Type {
        match self {
            StreamType::Default => write_stream::Type::Unspecified,
            StreamType::Committed => write_stream::Type::Committed,
            StreamType::Pending => write_stream::Type::Pending,
            StreamType::Buffered => write_stream::Type::Buffered,
        }
    }
}

/// Path of a table's default stream.
pub fn default_stream_path(destination_table: &str) -> String {
    format!("{destination_table}/streams/{DEFAULT_STREAM}")
}

/// Which stream a new connection writes to.
///
/// Either an explicit `stream_id` (the [`DEFAULT_STREAM`] sentinel also needs
/// `destination_table`), or a `stream_type` and `destination_table` for a
/// stream created on the spot.
#[derive(Debug, Clone, Default)]
pub struct StreamConnectionOptions {
    pub stream_id: Option<String>,
    pub stream_type: Option<StreamType>,
    pub destination_table: Option<String>,
    /// Overrides the client's connection defaults.
    pub connection: Option<ConnectionOptions>,
}

impl StreamConnectionOptions {
    pub fn for_stream(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: Some(stream_id.into()),
            ..Default::default()
        }
    }

    pub fn for_default_stream(destination_table: impl Into<String>) -> Self {
        Self {
            stream_id: Some(DEFAULT_STREAM.to_string()),
            destination_table: Some(destination_table.into()),
            ..Default::default()
        }
    }

    pub fn for_new_stream(stream_type: StreamType, destination_table: impl Into<String>) -> Self {
        Self {
            stream_type: Some(stream_type),
            destination_table: Some(destination_table.into()),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_connection_options(mut self, options: ConnectionOptions) -> Self {
        self.connection = Some(options);
        self
    }
}

/// Creates streams and the connections that write to them.
///
/// Connections created here are tracked so [`close`](Self::close) can shut
/// them all down. Tracking does not keep a connection alive: once every
/// handle to it is dropped it is forgotten.
pub struct WriterClient {
    transport: Arc<dyn WriteTransport>,
    config: WriterConfig,
    connections: Mutex<Vec<WeakStreamConnection>>,
}

impl WriterClient {
    pub fn new(transport: Arc<dyn WriteTransport>) -> Self {
        Self::with_config(transport, WriterConfig::default())
    }

    pub fn with_config(transport: Arc<dyn WriteTransport>, config: WriterConfig) -> Self {
        Self {
            transport,
            config,
            connections: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    fn tracked(&self) -> MutexGuard<'_, Vec<WeakStreamConnection>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a stream and return its id. The default stream always exists, so
    /// asking for one only derives its path.
    pub async fn create_write_stream(
        &self,
        stream_type: StreamType,
        destination_table: &str,
    ) -> Result<String, ClientError> {
        if stream_type == StreamType::Default {
            return Ok(default_stream_path(destination_table));
        }
        Ok(self
            .create_write_stream_full_response(stream_type, destination_table)
            .await?
            .name)
    }

    /// Create a stream and return everything the service reports about it.
    /// For the default stream this looks the stream up instead.
    pub async fn create_write_stream_full_response(
        &self,
        stream_type: StreamType,
        destination_table: &str,
    ) -> Result<WriteStream, ClientError> {
        if stream_type == StreamType::Default {
            return self
                .get_write_stream(&default_stream_path(destination_table), write_stream::View::Basic)
                .await;
        }
        let request = CreateWriteStreamRequest {
            parent: destination_table.to_string(),
            write_stream: Some(WriteStream {
                r#type: stream_type.as_proto() as i32,
                ..Default::default()
            }),
        };
        let stream = self.transport.create_write_stream(request).await?;
        info!(stream_id = %stream.name, ?stream_type, "created write stream");
        Ok(stream)
    }

    pub async fn get_write_stream(
        &self,
        stream_id: &str,
        view: write_stream::View,
    ) -> Result<WriteStream, ClientError> {
        let request = GetWriteStreamRequest {
            name: stream_id.to_string(),
            view: view as i32,
        };
        Ok(self.transport.get_write_stream(request).await?)
    }

    /// Open a connection, creating its stream first if `options` asks for a
    /// new one.
    pub async fn create_stream_connection(
        &self,
        options: StreamConnectionOptions,
    ) -> Result<StreamConnection, ClientError> {
        let stream_id = self.resolve_stream_id(&options).await?;
        let connection_options = options
            .connection
            .unwrap_or_else(|| self.config.connection.clone());
        let connection =
            StreamConnection::new(stream_id, Arc::clone(&self.transport), connection_options)?;
        debug!(stream_id = connection.stream_id(), "created stream connection");
        let mut tracked = self.tracked();
        tracked.retain(|weak| weak.upgrade().is_some());
        tracked.push(connection.downgrade());
        Ok(connection)
    }

    /// Open a connection and wrap it in a [`Writer`] for `proto_descriptor`.
    pub async fn create_writer(
        &self,
        options: StreamConnectionOptions,
        proto_descriptor: DescriptorProto,
    ) -> Result<Writer, ClientError> {
        let connection = self.create_stream_connection(options).await?;
        let mut writer = Writer::new(connection, proto_descriptor);
        if let Some(mvi) = self.config.default_missing_value {
            writer.set_default_missing_value_interpretation(mvi.into());
        }
        Ok(writer)
    }

    /// Open a connection and wrap it in a [`JsonWriter`] for `proto_descriptor`.
    pub async fn create_json_writer(
        &self,
        options: StreamConnectionOptions,
        proto_descriptor: DescriptorProto,
    ) -> Result<JsonWriter, ClientError> {
        let connection = self.create_stream_connection(options).await?;
        let mut writer = JsonWriter::new(connection, proto_descriptor)?;
        if let Some(mvi) = self.config.default_missing_value {
            writer.set_default_missing_value_interpretation(mvi.into());
        }
        Ok(writer)
    }

    /// Commit finalized PENDING streams of `destination_table` atomically.
    pub async fn batch_commit_write_streams(
        &self,
        destination_table: &str,
        write_streams: Vec<String>,
    ) -> Result<BatchCommitWriteStreamsResponse, ClientError> {
        let count = write_streams.len();
        let request = BatchCommitWriteStreamsRequest {
            parent: destination_table.to_string(),
            write_streams,
        };
        let response = self.transport.batch_commit_write_streams(request).await?;
        info!(
            table = destination_table,
            streams = count,
            errors = response.stream_errors.len(),
            "committed write streams"
        );
        Ok(response)
    }

    /// Live connections created by this client that have not been closed
    /// through it.
    pub fn connections(&self) -> Vec<StreamConnection> {
        self.tracked()
            .iter()
            .filter_map(WeakStreamConnection::upgrade)
            .collect()
    }

    /// Close every tracked connection.
    pub fn close(&self) {
        let connections: Vec<StreamConnection> = std::mem::take(&mut *self.tracked())
            .iter()
            .filter_map(WeakStreamConnection::upgrade)
            .collect();
        debug!(count = connections.len(), "closing stream connections");
        for connection in connections {
            connection.close();
        }
    }

    async fn resolve_stream_id(
        &self,
        options: &StreamConnectionOptions,
    ) -> Result<String, ClientError> {
        match (&options.stream_id, options.stream_type, &options.destination_table) {
            (Some(id), _, table) if id == DEFAULT_STREAM => table
                .as_deref()
                .map(default_stream_path)
                .ok_or(ClientError::MissingDestinationTable),
            (Some(id), _, _) => Ok(id.clone()),
            (None, Some(stream_type), Some(table)) => {
                self.create_write_stream(stream_type, table).await
            }
            (None, Some(StreamType::Default), None) => Err(ClientError::MissingDestinationTable),
            (None, _, _) => Err(ClientError::MissingStreamId),
        }
    }
}

impl std::fmt::Debug for WriterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterClient")
            .field("config", &self.config)
            .field("connections", &self.tracked().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::time::timeout;
    use tonic::Code;

    use crate::config::MissingValue;
    use crate::proto::append_rows_request::MissingValueInterpretation;
    use crate::transport::memory::{InMemoryTransport, UnaryCall};

    const TABLE: &str = "projects/p/datasets/d/tables/t";

    fn client() -> (Arc<InMemoryTransport>, WriterClient) {
        let transport = Arc::new(InMemoryTransport::new());
        (transport.clone(), WriterClient::new(transport))
    }

    mod stream_tests {
        use super::*;

        #[tokio::test]
        async fn test_create_pending_stream() {
            let (transport, client) = client();
            let id = client
                .create_write_stream(StreamType::Pending, TABLE)
                .await
                .unwrap();
            assert_eq!(id, format!("{TABLE}/streams/1"));

            match transport.calls().as_slice() {
                [UnaryCall::CreateWriteStream(request)] => {
                    assert_eq!(request.parent, TABLE);
                    assert_eq!(
                        request.write_stream.as_ref().map(|s| s.r#type()),
                        Some(write_stream::Type::Pending)
                    );
                }
                other => panic!("unexpected calls: {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_default_stream_needs_no_rpc() {
            let (transport, client) = client();
            let id = client
                .create_write_stream(StreamType::Default, TABLE)
                .await
                .unwrap();
            assert_eq!(id, format!("{TABLE}/streams/_default"));
            assert!(transport.calls().is_empty());
        }

        #[tokio::test]
        async fn test_get_unknown_stream() {
            let (_transport, client) = client();
            let err = client
                .get_write_stream(&format!("{TABLE}/streams/9"), write_stream::View::Full)
                .await
                .unwrap_err();
            assert!(matches!(err, ClientError::Rpc(e) if e.code == Code::NotFound));
        }

        #[tokio::test]
        async fn test_batch_commit() {
            let (transport, client) = client();
            let a = client.create_write_stream(StreamType::Pending, TABLE).await.unwrap();
            let b = client.create_write_stream(StreamType::Pending, TABLE).await.unwrap();

            let response = client
                .batch_commit_write_streams(TABLE, vec![a.clone(), b.clone()])
                .await
                .unwrap();
            assert!(response.commit_time.is_some());
            assert!(response.stream_errors.is_empty());

            let committed = client
                .get_write_stream(&a, write_stream::View::Basic)
                .await
                .unwrap();
            assert!(committed.commit_time.is_some());
            assert!(transport.calls().contains(&UnaryCall::BatchCommitWriteStreams(
                BatchCommitWriteStreamsRequest {
                    parent: TABLE.to_string(),
                    write_streams: vec![a, b],
                }
            )));
        }
    }

    mod connection_tests {
        use super::*;

        #[tokio::test]
        async fn test_default_sentinel_requires_table() {
            let (_transport, client) = client();
            let err = client
                .create_stream_connection(StreamConnectionOptions::for_stream(DEFAULT_STREAM))
                .await
                .unwrap_err();
            assert!(matches!(err, ClientError::MissingDestinationTable));
        }

        #[tokio::test]
        async fn test_default_sentinel_derives_path() {
            let (transport, client) = client();
            let connection = client
                .create_stream_connection(StreamConnectionOptions::for_default_stream(TABLE))
                .await
                .unwrap();
            assert_eq!(connection.stream_id(), format!("{TABLE}/streams/_default"));
            assert!(connection.is_default_stream());
            assert!(transport.calls().is_empty());

            let session = timeout(Duration::from_secs(5), transport.next_session())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(
                session.request_params(),
                Some("write_stream=projects/p/datasets/d/tables/t/streams/_default")
            );
        }

        #[tokio::test]
        async fn test_explicit_stream_id() {
            let (transport, client) = client();
            let id = format!("{TABLE}/streams/abc");
            let connection = client
                .create_stream_connection(StreamConnectionOptions::for_stream(id.clone()))
                .await
                .unwrap();
            assert_eq!(connection.stream_id(), id);
            assert!(transport.calls().is_empty());
        }

        #[tokio::test]
        async fn test_new_stream_created_first() {
            let (transport, client) = client();
            let connection = client
                .create_stream_connection(StreamConnectionOptions::for_new_stream(
                    StreamType::Buffered,
                    TABLE,
                ))
                .await
                .unwrap();
            assert_eq!(connection.stream_id(), format!("{TABLE}/streams/1"));
            assert!(matches!(
                transport.calls().as_slice(),
                [UnaryCall::CreateWriteStream(_)]
            ));
        }

        #[tokio::test]
        async fn test_missing_stream_id() {
            let (_transport, client) = client();
            let err = client
                .create_stream_connection(StreamConnectionOptions::default())
                .await
                .unwrap_err();
            assert!(matches!(err, ClientError::MissingStreamId));

            let err = client
                .create_stream_connection(StreamConnectionOptions {
                    stream_type: Some(StreamType::Pending),
                    ..Default::default()
                })
                .await
                .unwrap_err();
            assert!(matches!(err, ClientError::MissingStreamId));
        }

        #[tokio::test]
        async fn test_create_stream_failure() {
            let (transport, client) = client();
            transport.fail_next_unary(tonic::Status::permission_denied("no access"));
            let err = client
                .create_stream_connection(StreamConnectionOptions::for_new_stream(
                    StreamType::Committed,
                    TABLE,
                ))
                .await
                .unwrap_err();
            assert!(matches!(err, ClientError::Rpc(e) if e.code == Code::PermissionDenied));
            assert!(client.connections().is_empty());
        }

        #[tokio::test]
        async fn test_close_closes_tracked_connections() {
            let (_transport, client) = client();
            let a = client
                .create_stream_connection(StreamConnectionOptions::for_default_stream(TABLE))
                .await
                .unwrap();
            let b = client
                .create_stream_connection(StreamConnectionOptions::for_stream(format!(
                    "{TABLE}/streams/x"
                )))
                .await
                .unwrap();
            assert_eq!(client.connections().len(), 2);

            client.close();
            assert!(!a.is_open());
            assert!(!b.is_open());
            assert!(client.connections().is_empty());
        }

        #[tokio::test]
        async fn test_dropped_connections_are_forgotten() {
            let (_transport, client) = client();
            let dropped = client
                .create_stream_connection(StreamConnectionOptions::for_default_stream(TABLE))
                .await
                .unwrap();
            drop(dropped);
            assert!(client.connections().is_empty());

            let kept = client
                .create_stream_connection(StreamConnectionOptions::for_stream(format!(
                    "{TABLE}/streams/x"
                )))
                .await
                .unwrap();
            assert_eq!(client.tracked().len(), 1);
            let live = client.connections();
            assert_eq!(live.len(), 1);
            assert_eq!(live[0].stream_id(), kept.stream_id());
        }
    }

    mod writer_tests {
        use super::*;

        #[tokio::test]
        async fn test_writer_gets_config_missing_value() {
            let transport = Arc::new(InMemoryTransport::new());
            let client = WriterClient::with_config(
                transport.clone(),
                WriterConfig::default().with_default_missing_value(MissingValue::Default),
            );
            let writer = client
                .create_writer(
                    StreamConnectionOptions::for_default_stream(TABLE),
                    DescriptorProto {
                        name: Some("root".to_string()),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
            let mut session = timeout(Duration::from_secs(5), transport.next_session())
                .await
                .unwrap()
                .unwrap();

            writer.append_rows(vec![], None);
            let request = timeout(Duration::from_secs(5), session.next_request())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(
                request.default_missing_value_interpretation,
                MissingValueInterpretation::DefaultValue as i32
            );
        }

        #[tokio::test]
        async fn test_json_writer_rejects_bad_descriptor() {
            let (_transport, client) = client();
            let bad = DescriptorProto {
                name: Some("root".to_string()),
                field: vec![prost_types::FieldDescriptorProto {
                    name: Some("child".to_string()),
                    number: Some(1),
                    type_name: Some(".missing".to_string()),
                    ..Default::default()
                }],
                ..Default::default()
            };
            let err = client
                .create_json_writer(StreamConnectionOptions::for_default_stream(TABLE), bad)
                .await
                .unwrap_err();
            assert!(matches!(err, ClientError::Schema(_)));
        }
    }
}
