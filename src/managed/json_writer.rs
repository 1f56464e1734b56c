//! Appends plain rows, encoding them against the current writer schema.

use std::collections::HashMap;

use prost_types::DescriptorProto;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, warn};

use super::connection::{ConnectionEvent, StreamConnection};
use super::error::{JsonWriterError, WriteError};
use super::pending_write::PendingWrite;
use super::writer::Writer;
use crate::encode::{row_from_json, Row, RowEncoder};
use crate::proto::append_rows_request::MissingValueInterpretation;
use crate::proto::{FinalizeWriteStreamResponse, FlushRowsResponse, TableSchema};
use crate::schema::{message_descriptor, to_proto2_descriptor, AdaptError};

/// Scope name for descriptors rebuilt from server-reported schemas.
pub const ROOT_SCOPE: &str = "root";

/// A [`Writer`] that accepts rows instead of serialized bytes.
///
/// Subscribes to its connection's events on construction. When the service
/// reports a new table schema, the next append rebuilds the descriptor from it
/// and switches both the encoder and the writer over before encoding. If the
/// subscription fell behind and dropped events, the connection's latest
/// reported schema is applied instead.
#[derive(Debug)]
pub struct JsonWriter {
    writer: Writer,
    encoder: RowEncoder,
    events: broadcast::Receiver<ConnectionEvent>,
}

impl JsonWriter {
    /// # Errors
    ///
    /// Returns an error if `proto_descriptor` does not build a valid message.
    pub fn new(
        connection: StreamConnection,
        proto_descriptor: DescriptorProto,
    ) -> Result<Self, AdaptError> {
        let encoder = RowEncoder::new(message_descriptor(&proto_descriptor)?);
        let events = connection.subscribe();
        Ok(Self {
            writer: Writer::new(connection, proto_descriptor),
            encoder,
            events,
        })
    }

    /// Convert native date and time values into the column's wire encoding.
    #[must_use]
    pub fn with_date_conversion(self, enabled: bool) -> Self {
        Self {
            encoder: self.encoder.with_date_conversion(enabled),
            ..self
        }
    }

    /// Encode `rows` and send them, optionally at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if a row does not fit the writer schema, or if a
    /// reported schema update cannot be compiled. Nothing is sent in either case.
    pub fn append_rows(
        &mut self,
        rows: &[Row],
        offset: Option<i64>,
    ) -> Result<PendingWrite, JsonWriterError> {
        self.apply_connection_events()?;
        let encoded = self.encoder.encode(rows)?;
        Ok(self.writer.append_rows(encoded, offset))
    }

    /// Like [`append_rows`](Self::append_rows), for JSON objects.
    pub fn append_json_rows(
        &mut self,
        rows: Vec<serde_json::Value>,
        offset: Option<i64>,
    ) -> Result<PendingWrite, JsonWriterError> {
        let rows = rows
            .into_iter()
            .enumerate()
            .map(|(i, value)| row_from_json(value).ok_or(JsonWriterError::NotAnObject(i)))
            .collect::<Result<Vec<_>, _>>()?;
        self.append_rows(&rows, offset)
    }

    /// Switch to the descriptor compiled from `schema`.
    pub fn set_table_schema(&mut self, schema: &TableSchema) -> Result<(), JsonWriterError> {
        let proto_descriptor = to_proto2_descriptor(schema, ROOT_SCOPE)?;
        self.set_proto_descriptor(proto_descriptor)
    }

    /// Switch both the encoder and the writer to `proto_descriptor`.
    pub fn set_proto_descriptor(
        &mut self,
        proto_descriptor: DescriptorProto,
    ) -> Result<(), JsonWriterError> {
        self.encoder.set_descriptor(message_descriptor(&proto_descriptor)?);
        self.writer.set_proto_descriptor(proto_descriptor);
        Ok(())
    }

    pub fn set_default_missing_value_interpretation(&mut self, mvi: MissingValueInterpretation) {
        self.writer.set_default_missing_value_interpretation(mvi);
    }

    pub fn set_missing_value_interpretations(
        &mut self,
        interpretations: HashMap<String, MissingValueInterpretation>,
    ) {
        self.writer.set_missing_value_interpretations(interpretations);
    }

    pub fn writer(&self) -> &Writer {
        &self.writer
    }

    pub fn encoder(&self) -> &RowEncoder {
        &self.encoder
    }

    pub fn connection(&self) -> &StreamConnection {
        self.writer.connection()
    }

    pub async fn flush_rows(&self, offset: i64) -> Result<Option<FlushRowsResponse>, WriteError> {
        self.writer.flush_rows(offset).await
    }

    pub async fn finalize(&self) -> Result<Option<FinalizeWriteStreamResponse>, WriteError> {
        self.writer.finalize().await
    }

    pub fn close(&self) {
        self.writer.close();
    }

    fn apply_connection_events(&mut self) -> Result<(), JsonWriterError> {
        let mut lagged = false;
        loop {
            match self.events.try_recv() {
                Ok(ConnectionEvent::SchemaUpdated(schema)) => {
                    debug!(fields = schema.fields.len(), "applying updated table schema");
                    self.set_table_schema(&schema)?;
                }
                Ok(ConnectionEvent::Error(_)) => {}
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "connection events dropped; reloading latest table schema");
                    lagged = true;
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
        if lagged {
            if let Some(schema) = self.connection().latest_schema() {
                self.set_table_schema(&schema)?;
            }
        }
        Ok(())
    }
}
