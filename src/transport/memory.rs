//! In-memory write transport for testing.
//!
//! Unary calls are recorded and answered from a small stream registry. Every
//! `append_rows` call is handed to the test as an [`AppendSession`], which sees
//! the routing metadata and the outbound requests and decides what the server
//! answers.
//!
//! ## Limitations
//!
//! - **No row storage**: appended rows are only visible through the session
//! - **No offset checks**: acknowledgements are whatever the test injects

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use futures::channel::mpsc as futures_mpsc;
use futures::StreamExt;
use tokio::sync::mpsc;
use tonic::metadata::MetadataMap;
use tonic::Status;

use super::{AppendRequestStream, AppendRowsStream, WriteTransport, REQUEST_PARAMS_HEADER};
use crate::proto::append_rows_response::{AppendResult, Response};
use crate::proto::{
    AppendRowsRequest, AppendRowsResponse, BatchCommitWriteStreamsRequest,
    BatchCommitWriteStreamsResponse, CreateWriteStreamRequest, FinalizeWriteStreamRequest,
    FinalizeWriteStreamResponse, FlushRowsRequest, FlushRowsResponse, GetWriteStreamRequest,
    TableSchema, WriteStream,
};

/// A unary call received by the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum UnaryCall {
    CreateWriteStream(CreateWriteStreamRequest),
    GetWriteStream(GetWriteStreamRequest),
    FinalizeWriteStream(FinalizeWriteStreamRequest),
    FlushRows(FlushRowsRequest),
    BatchCommitWriteStreams(BatchCommitWriteStreamsRequest),
}

/// One open `AppendRows` call, seen from the server side.
pub struct AppendSession {
    pub metadata: MetadataMap,
    requests: AppendRequestStream,
    responses: futures_mpsc::UnboundedSender<Result<AppendRowsResponse, Status>>,
}

impl AppendSession {
    /// The next request sent by the client, or `None` once the client hung up.
    pub async fn next_request(&mut self) -> Option<AppendRowsRequest> {
        self.requests.next().await
    }

    /// Value of the routing header, if present.
    pub fn request_params(&self) -> Option<&str> {
        self.metadata
            .get(REQUEST_PARAMS_HEADER)
            .and_then(|v| v.to_str().ok())
    }

    /// Send a raw response. Returns false if the client is gone.
    pub fn respond(&self, response: AppendRowsResponse) -> bool {
        self.responses.unbounded_send(Ok(response)).is_ok()
    }

    /// Acknowledge one request.
    pub fn ack(&self, offset: Option<i64>) -> bool {
        self.respond(ack_response(offset))
    }

    /// Acknowledge one request and report a new table schema.
    pub fn ack_with_schema(&self, offset: Option<i64>, schema: TableSchema) -> bool {
        self.respond(AppendRowsResponse {
            updated_schema: Some(schema),
            ..ack_response(offset)
        })
    }

    /// Deliver a stream-level error.
    pub fn fail(&self, status: Status) -> bool {
        self.responses.unbounded_send(Err(status)).is_ok()
    }

    /// Whether the client side of the call is still reading responses.
    pub fn is_open(&self) -> bool {
        !self.responses.is_closed()
    }

    /// End the response stream, as a server closing the call would.
    pub fn close(self) {
        self.responses.close_channel();
    }
}

fn ack_response(offset: Option<i64>) -> AppendRowsResponse {
    AppendRowsResponse {
        response: Some(Response::AppendResult(AppendResult {
            offset: offset.map(|value| crate::proto::Int64Value { value }),
        })),
        ..Default::default()
    }
}

#[derive(Default)]
struct State {
    calls: Vec<UnaryCall>,
    streams: HashMap<String, WriteStream>,
    next_stream: u64,
    unary_failures: VecDeque<Status>,
    append_failures: VecDeque<Status>,
    appends_opened: usize,
}

/// In-memory transport for testing.
pub struct InMemoryTransport {
    state: Mutex<State>,
    sessions_tx: mpsc::UnboundedSender<AppendSession>,
    sessions_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<AppendSession>>,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTransport {
    pub fn new() -> Self {
        let (sessions_tx, sessions_rx) = mpsc::unbounded_channel();
        Self {
            state: Mutex::new(State::default()),
            sessions_tx,
            sessions_rx: tokio::sync::Mutex::new(sessions_rx),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for the next `append_rows` call to be opened.
    pub async fn next_session(&self) -> Option<AppendSession> {
        self.sessions_rx.lock().await.recv().await
    }

    /// All unary calls received so far, in order.
    pub fn calls(&self) -> Vec<UnaryCall> {
        self.lock().calls.clone()
    }

    /// Number of `append_rows` calls opened so far, failed ones included.
    pub fn appends_opened(&self) -> usize {
        self.lock().appends_opened
    }

    /// Make the next unary call fail with `status`.
    pub fn fail_next_unary(&self, status: Status) {
        self.lock().unary_failures.push_back(status);
    }

    /// Make the next `append_rows` call fail to open with `status`.
    pub fn fail_next_append(&self, status: Status) {
        self.lock().append_failures.push_back(status);
    }

    fn record(&self, call: UnaryCall) -> Result<MutexGuard<'_, State>, Status> {
        let mut state = self.lock();
        state.calls.push(call);
        match state.unary_failures.pop_front() {
            Some(status) => Err(status),
            None => Ok(state),
        }
    }
}

#[async_trait]
impl WriteTransport for InMemoryTransport {
    async fn create_write_stream(
        &self,
        request: CreateWriteStreamRequest,
    ) -> Result<WriteStream, Status> {
        let mut state = self.record(UnaryCall::CreateWriteStream(request.clone()))?;
        state.next_stream += 1;
        let name = format!("{}/streams/{}", request.parent, state.next_stream);
        let stream = WriteStream {
            name: name.clone(),
            create_time: Some(now()),
            ..request.write_stream.unwrap_or_default()
        };
        state.streams.insert(name, stream.clone());
        Ok(stream)
    }

    async fn get_write_stream(&self, request: GetWriteStreamRequest) -> Result<WriteStream, Status> {
        let state = self.record(UnaryCall::GetWriteStream(request.clone()))?;
        state
            .streams
            .get(&request.name)
            .cloned()
            .ok_or_else(|| Status::not_found(format!("stream {} not found", request.name)))
    }

    async fn finalize_write_stream(
        &self,
        request: FinalizeWriteStreamRequest,
    ) -> Result<FinalizeWriteStreamResponse, Status> {
        let state = self.record(UnaryCall::FinalizeWriteStream(request.clone()))?;
        if !state.streams.contains_key(&request.name) {
            return Err(Status::not_found(format!("stream {} not found", request.name)));
        }
        Ok(FinalizeWriteStreamResponse { row_count: 0 })
    }

    async fn flush_rows(&self, request: FlushRowsRequest) -> Result<FlushRowsResponse, Status> {
        let offset = request.offset.as_ref().map_or(0, |o| o.value);
        self.record(UnaryCall::FlushRows(request))?;
        Ok(FlushRowsResponse { offset })
    }

    async fn batch_commit_write_streams(
        &self,
        request: BatchCommitWriteStreamsRequest,
    ) -> Result<BatchCommitWriteStreamsResponse, Status> {
        let mut state = self.record(UnaryCall::BatchCommitWriteStreams(request.clone()))?;
        let commit_time = now();
        for name in &request.write_streams {
            if let Some(stream) = state.streams.get_mut(name) {
                stream.commit_time = Some(commit_time.clone());
            }
        }
        Ok(BatchCommitWriteStreamsResponse {
            commit_time: Some(commit_time),
            stream_errors: Vec::new(),
        })
    }

    async fn append_rows(
        &self,
        metadata: MetadataMap,
        requests: AppendRequestStream,
    ) -> Result<AppendRowsStream, Status> {
        {
            let mut state = self.lock();
            state.appends_opened += 1;
            if let Some(status) = state.append_failures.pop_front() {
                return Err(status);
            }
        }

        let (responses, inbound) = futures_mpsc::unbounded();
        let session = AppendSession {
            metadata,
            requests,
            responses,
        };
        self.sessions_tx
            .send(session)
            .map_err(|_| Status::unavailable("in-memory transport dropped"))?;
        Ok(inbound.boxed())
    }
}

fn now() -> prost_types::Timestamp {
    let now = Utc::now();
    prost_types::Timestamp {
        seconds: now.timestamp(),
        nanos: now.timestamp_subsec_nanos() as i32,
    }
}
