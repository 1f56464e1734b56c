//! Appends pre-serialized rows through a connection.

use std::collections::HashMap;

use prost_types::DescriptorProto;
use tracing::debug;

use super::connection::StreamConnection;
use super::error::WriteError;
use super::pending_write::PendingWrite;
use crate::proto::append_rows_request::{MissingValueInterpretation, ProtoData};
use crate::proto::{AppendRowsRequest, FinalizeWriteStreamResponse, FlushRowsResponse, ProtoRows, ProtoSchema};

/// Binds a writer schema to a [`StreamConnection`].
///
/// Every request carries the full descriptor, so a channel reopened between
/// requests always sees the schema on its first message.
#[derive(Debug)]
pub struct Writer {
    connection: StreamConnection,
    proto_descriptor: DescriptorProto,
    default_missing_value_interpretation: Option<MissingValueInterpretation>,
    missing_value_interpretations: HashMap<String, MissingValueInterpretation>,
}

impl Writer {
    pub fn new(connection: StreamConnection, proto_descriptor: DescriptorProto) -> Self {
        Self {
            connection,
            proto_descriptor,
            default_missing_value_interpretation: None,
            missing_value_interpretations: HashMap::new(),
        }
    }

    /// Send a batch of serialized rows, optionally at `offset`.
    pub fn append_rows(&self, rows: Vec<Vec<u8>>, offset: Option<i64>) -> PendingWrite {
        let request = AppendRowsRequest {
            write_stream: self.connection.stream_id().to_string(),
            offset: offset.map(|value| crate::proto::Int64Value { value }),
            proto_rows: Some(ProtoData {
                writer_schema: Some(ProtoSchema {
                    proto_descriptor: Some(self.proto_descriptor.clone()),
                }),
                rows: Some(ProtoRows {
                    serialized_rows: rows,
                }),
            }),
            trace_id: String::new(),
            missing_value_interpretations: self
                .missing_value_interpretations
                .iter()
                .map(|(column, mvi)| (column.clone(), *mvi as i32))
                .collect(),
            default_missing_value_interpretation: self
                .default_missing_value_interpretation
                .map_or(MissingValueInterpretation::Unspecified as i32, |mvi| mvi as i32),
        };
        self.connection.write(request)
    }

    pub fn proto_descriptor(&self) -> &DescriptorProto {
        &self.proto_descriptor
    }

    /// Swap the writer schema. A different descriptor reconnects the channel;
    /// an equal one is a no-op. Returns whether the descriptor changed.
    pub fn set_proto_descriptor(&mut self, proto_descriptor: DescriptorProto) -> bool {
        if proto_descriptor == self.proto_descriptor {
            return false;
        }
        debug!(
            name = proto_descriptor.name(),
            fields = proto_descriptor.field.len(),
            "writer schema changed"
        );
        self.proto_descriptor = proto_descriptor;
        self.connection.reconnect();
        true
    }

    /// Applies to later appends only.
    pub fn set_default_missing_value_interpretation(&mut self, mvi: MissingValueInterpretation) {
        self.default_missing_value_interpretation = Some(mvi);
    }

    /// Per-column interpretations, replacing any set before. Applies to later
    /// appends only.
    pub fn set_missing_value_interpretations(
        &mut self,
        interpretations: HashMap<String, MissingValueInterpretation>,
    ) {
        self.missing_value_interpretations = interpretations;
    }

    pub fn connection(&self) -> &StreamConnection {
        &self.connection
    }

    pub async fn flush_rows(&self, offset: i64) -> Result<Option<FlushRowsResponse>, WriteError> {
        self.connection.flush_rows(offset).await
    }

    pub async fn finalize(&self) -> Result<Option<FinalizeWriteStreamResponse>, WriteError> {
        self.connection.finalize().await
    }

    pub fn close(&self) {
        self.connection.close();
    }
}
