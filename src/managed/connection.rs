//! One duplex `AppendRows` channel bound to a single write stream.
//!
//! A [`StreamConnection`] owns the ordered queue of writes that have been sent
//! but not acknowledged. Requests are pushed to the front of the queue as they
//! are sent and responses resolve from the back, so acknowledgements match
//! send order. All queue mutation happens under one mutex: the caller side
//! (`write`, `close`) and the reader task that consumes responses never touch
//! the queue concurrently.
//!
//! The reader side of each channel is a spawned task tagged with a generation
//! number, and every queued write remembers the generation that carried it.
//! A channel lost to an error is aborted and its writes are handed to the new
//! channel per the [`InFlightPolicy`]. A channel replaced on request (a new
//! writer schema, say) is only half-closed: its reader keeps resolving the
//! writes it carried until they are all answered.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::channel::mpsc::{self, UnboundedSender};
use futures::StreamExt;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tonic::metadata::{Ascii, MetadataMap, MetadataValue};
use tonic::{Code, Status};
use tracing::{debug, trace, warn, Instrument, Span};

use super::error::{RpcError, WriteError};
use super::pending_write::PendingWrite;
use crate::config::{ConnectionOptions, InFlightPolicy};
use crate::observability::connection_span;
use crate::proto::{
    AppendRowsRequest, AppendRowsResponse, FinalizeWriteStreamRequest,
    FinalizeWriteStreamResponse, FlushRowsRequest, FlushRowsResponse, TableSchema,
};
use crate::transport::{AppendRequestStream, WriteTransport, REQUEST_PARAMS_HEADER};

/// Stream id sentinel for a table's implicit default stream.
pub const DEFAULT_STREAM: &str = "_default";

/// Notifications published by a connection.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// The service reported a new table schema alongside an acknowledgement.
    SchemaUpdated(TableSchema),
    /// A connection-level failure not tied to a single write.
    Error(WriteError),
}

/// Whether `stream_id` names a default stream.
pub fn is_default_stream(stream_id: &str) -> bool {
    stream_id == DEFAULT_STREAM || stream_id.ends_with("/streams/_default")
}

/// Handle to a managed append channel. Clones share the same channel and queue.
#[derive(Clone)]
pub struct StreamConnection {
    inner: Arc<Inner>,
}

/// Non-owning handle to a [`StreamConnection`].
#[derive(Clone)]
pub(crate) struct WeakStreamConnection {
    inner: Weak<Inner>,
}

impl WeakStreamConnection {
    /// The connection, unless every owning handle has been dropped.
    pub(crate) fn upgrade(&self) -> Option<StreamConnection> {
        self.inner.upgrade().map(|inner| StreamConnection { inner })
    }
}

struct Inner {
    stream_id: String,
    transport: Arc<dyn WriteTransport>,
    metadata: MetadataMap,
    options: ConnectionOptions,
    events: broadcast::Sender<ConnectionEvent>,
    runtime: Handle,
    span: Span,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    generation: u64,
    channel: Option<Channel>,
    /// Newest at the front, oldest at the back.
    pending: VecDeque<Queued>,
    latest_schema: Option<TableSchema>,
}

struct Queued {
    generation: u64,
    write: PendingWrite,
}

impl State {
    /// Remove the oldest write carried by channel `generation`.
    fn take_oldest(&mut self, generation: u64) -> Option<PendingWrite> {
        let index = self.pending.iter().rposition(|q| q.generation == generation)?;
        self.pending.remove(index).map(|q| q.write)
    }

    fn carried_by(&self, generation: u64) -> usize {
        self.pending.iter().filter(|q| q.generation == generation).count()
    }

    /// Remove every write carried by channel `generation`, oldest first.
    fn drain_generation(&mut self, generation: u64) -> Vec<PendingWrite> {
        let (carried, rest): (VecDeque<Queued>, VecDeque<Queued>) =
            std::mem::take(&mut self.pending)
                .into_iter()
                .partition(|q| q.generation == generation);
        self.pending = rest;
        carried.into_iter().rev().map(|q| q.write).collect()
    }

    /// Remove every write, oldest first.
    fn drain_all(&mut self) -> Vec<PendingWrite> {
        self.pending.drain(..).rev().map(|q| q.write).collect()
    }
}

/// What becomes of the outgoing channel's writes when a new channel opens.
enum Handover<'a> {
    /// The old channel stays readable and resolves what it carried.
    Drain,
    /// The old channel is gone; its writes follow the in-flight policy.
    Recover(Option<&'a RpcError>),
}

struct Channel {
    sender: UnboundedSender<AppendRowsRequest>,
    reader: JoinHandle<()>,
    torn_down: bool,
}

impl Channel {
    fn is_usable(&self) -> bool {
        !self.torn_down && !self.sender.is_closed()
    }

    fn shutdown(self) {
        self.sender.close_channel();
        self.reader.abort();
    }

    /// Stop sending but keep reading responses to what was already sent.
    fn retire(self) {
        self.sender.close_channel();
    }
}

impl StreamConnection {
    /// Create a connection to `stream_id` and open its channel.
    ///
    /// Must be called from within a tokio runtime, which drives the channel.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no current runtime or the stream id
    /// cannot be carried in request metadata.
    pub fn new(
        stream_id: impl Into<String>,
        transport: Arc<dyn WriteTransport>,
        options: ConnectionOptions,
    ) -> Result<Self, WriteError> {
        let stream_id = stream_id.into();
        let runtime = Handle::try_current().map_err(|_| WriteError::NoRuntime)?;

        let params: MetadataValue<Ascii> = format!("write_stream={stream_id}")
            .parse()
            .map_err(|_| WriteError::InvalidStreamId(stream_id.clone()))?;
        let mut metadata = MetadataMap::new();
        metadata.insert(REQUEST_PARAMS_HEADER, params);

        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        let span = connection_span(&stream_id);

        let connection = Self {
            inner: Arc::new(Inner {
                stream_id,
                transport,
                metadata,
                options,
                events,
                runtime,
                span,
                state: Mutex::new(State::default()),
            }),
        };
        connection.open();
        Ok(connection)
    }

    pub fn stream_id(&self) -> &str {
        &self.inner.stream_id
    }

    pub(crate) fn downgrade(&self) -> WeakStreamConnection {
        WeakStreamConnection {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.inner.options
    }

    pub fn is_default_stream(&self) -> bool {
        is_default_stream(&self.inner.stream_id)
    }

    /// Whether a channel is open and accepting writes.
    pub fn is_open(&self) -> bool {
        self.inner
            .lock()
            .channel
            .as_ref()
            .is_some_and(Channel::is_usable)
    }

    /// The most recent table schema reported by the service, if any.
    pub fn latest_schema(&self) -> Option<TableSchema> {
        self.inner.lock().latest_schema.clone()
    }

    /// Subscribe to connection events. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// Open a channel if none is usable. No-op when already open.
    pub fn open(&self) {
        let _enter = self.inner.span.enter();
        let mut state = self.inner.lock();
        if state.channel.as_ref().is_some_and(Channel::is_usable) {
            return;
        }
        self.inner.reopen(&mut state, Handover::Recover(None));
    }

    /// Replace the channel with a fresh one for later writes.
    ///
    /// Writes already sent stay queued and resolve from the old channel's
    /// responses; nothing is sent twice. If the old channel was already torn
    /// down, its writes are handled per the configured [`InFlightPolicy`].
    pub fn reconnect(&self) {
        let _enter = self.inner.span.enter();
        debug!("reconnecting");
        let mut state = self.inner.lock();
        self.inner.reopen(&mut state, Handover::Drain);
    }

    /// Tear down the channel and abort every unacknowledged write.
    ///
    /// Later writes fail with [`WriteError::ConnectionClosed`] until the
    /// connection is opened again.
    pub fn close(&self) {
        let _enter = self.inner.span.enter();
        let mut state = self.inner.lock();
        state.generation += 1;
        if let Some(channel) = state.channel.take() {
            channel.shutdown();
            debug!("closed append channel");
        }
        let aborted = state.drain_all();
        drop(state);
        for pending in aborted {
            pending.abort();
        }
    }

    /// Send `request` and return a handle to its result.
    ///
    /// Fills in the stream id and trace id if the request leaves them empty.
    /// If the channel was torn down by the server it is reopened first; if
    /// the connection is closed the write fails immediately.
    pub fn write(&self, mut request: AppendRowsRequest) -> PendingWrite {
        let _enter = self.inner.span.enter();
        if request.write_stream.is_empty() {
            request.write_stream = self.inner.stream_id.clone();
        }
        if request.trace_id.is_empty() {
            request.trace_id = self.inner.options.trace_id.clone();
        }
        let pending = PendingWrite::new(request);

        let mut guard = self.inner.lock();
        match guard.channel.as_ref().map(Channel::is_usable) {
            None => {
                drop(guard);
                trace!("write on closed connection");
                pending.mark_done(Err(WriteError::ConnectionClosed));
                return pending;
            }
            Some(false) => {
                debug!("channel torn down; reconnecting before write");
                self.inner.reopen(&mut guard, Handover::Recover(None));
            }
            Some(true) => {}
        }

        let state = &mut *guard;
        let sent = state
            .channel
            .as_ref()
            .is_some_and(|channel| channel.sender.unbounded_send(pending.request().clone()).is_ok());
        if sent {
            trace!(
                offset = ?pending.request().offset.as_ref().map(|o| o.value),
                pending = state.pending.len() + 1,
                "sending append request"
            );
            let generation = state.generation;
            state.pending.push_front(Queued {
                generation,
                write: pending.clone(),
            });
        } else {
            drop(guard);
            pending.mark_done(Err(WriteError::ConnectionClosed));
        }
        pending
    }

    /// Unacknowledged writes, oldest first.
    pub fn get_pending_writes(&self) -> Vec<PendingWrite> {
        self.inner
            .lock()
            .pending
            .iter()
            .rev()
            .map(|q| q.write.clone())
            .collect()
    }

    /// Flush a BUFFERED stream up to and including `offset`.
    ///
    /// Closes the channel first. Returns `None` without an RPC for the default
    /// stream.
    pub async fn flush_rows(&self, offset: i64) -> Result<Option<FlushRowsResponse>, WriteError> {
        self.close();
        if self.is_default_stream() {
            return Ok(None);
        }
        let request = FlushRowsRequest {
            write_stream: self.inner.stream_id.clone(),
            offset: Some(crate::proto::Int64Value { value: offset }),
        };
        self.inner
            .transport
            .flush_rows(request)
            .instrument(self.inner.span.clone())
            .await
            .map(Some)
            .map_err(|status| WriteError::Rpc(status.into()))
    }

    /// Finalize the stream so no more rows can be appended.
    ///
    /// Closes the channel first. Returns `None` without an RPC for the default
    /// stream.
    pub async fn finalize(&self) -> Result<Option<FinalizeWriteStreamResponse>, WriteError> {
        self.close();
        if self.is_default_stream() {
            return Ok(None);
        }
        let request = FinalizeWriteStreamRequest {
            name: self.inner.stream_id.clone(),
        };
        self.inner
            .transport
            .finalize_write_stream(request)
            .instrument(self.inner.span.clone())
            .await
            .map(Some)
            .map_err(|status| WriteError::Rpc(status.into()))
    }
}

impl std::fmt::Debug for StreamConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConnection")
            .field("stream_id", &self.inner.stream_id)
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ConnectionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Replace the channel. `handover` decides what happens to the writes the
    /// old channel carried.
    fn reopen(self: &Arc<Self>, state: &mut State, handover: Handover<'_>) {
        let previous = state.generation;
        let cause = match (handover, state.channel.take()) {
            (Handover::Drain, Some(old)) if old.is_usable() => {
                old.retire();
                None
            }
            (handover, old) => {
                if let Some(old) = old {
                    old.shutdown();
                }
                match handover {
                    Handover::Recover(cause) => Some(cause),
                    Handover::Drain => Some(None),
                }
            }
        };
        state.generation += 1;
        let generation = state.generation;

        let (sender, receiver) = mpsc::unbounded();
        let reader = self.runtime.spawn(
            run_channel(
                Arc::downgrade(self),
                Arc::clone(&self.transport),
                self.metadata.clone(),
                receiver.boxed(),
                generation,
            )
            .instrument(self.span.clone()),
        );
        debug!(generation, "opened append channel");

        match cause {
            Some(cause) => self.hand_over(state, previous, &sender, cause),
            None => {
                let draining = state.carried_by(previous);
                if draining > 0 {
                    debug!(draining, "previous channel left to acknowledge its writes");
                }
            }
        }

        state.channel = Some(Channel {
            sender,
            reader,
            torn_down: false,
        });
    }

    /// Apply the in-flight policy to the writes of lost channel `previous`.
    fn hand_over(
        &self,
        state: &mut State,
        previous: u64,
        sender: &UnboundedSender<AppendRowsRequest>,
        cause: Option<&RpcError>,
    ) {
        let count = state.carried_by(previous);
        if count == 0 {
            return;
        }
        match self.options.in_flight_policy {
            InFlightPolicy::Resend => {
                debug!(count, "resending unacknowledged writes");
                let generation = state.generation;
                for queued in state.pending.iter_mut().rev() {
                    if queued.generation != previous {
                        continue;
                    }
                    queued.generation = generation;
                    if sender.unbounded_send(queued.write.request().clone()).is_err() {
                        trace!("new channel closed while resending");
                    }
                }
            }
            InFlightPolicy::Fail => {
                debug!(count, "failing unacknowledged writes");
                let error = cause
                    .cloned()
                    .map_or(WriteError::ConnectionClosed, WriteError::TransientChannel);
                for pending in state.drain_generation(previous) {
                    pending.mark_done(Err(error.clone()));
                }
            }
        }
    }

    /// Handle one item from the reader of channel `generation`. Returns false
    /// when that reader should stop.
    fn on_item(
        self: &Arc<Self>,
        generation: u64,
        item: Result<AppendRowsResponse, Status>,
    ) -> bool {
        let mut state = self.lock();
        if state.generation != generation {
            return self.on_retired_item(&mut state, generation, item);
        }
        match item {
            Ok(response) => self.on_response(&mut state, generation, response),
            Err(status) => self.on_error(&mut state, RpcError::from(status), true),
        }
        state.generation == generation && state.channel.is_some()
    }

    /// Handle an item from a replaced channel. Its reader stops once every
    /// write it carried has been resolved.
    fn on_retired_item(
        &self,
        state: &mut State,
        generation: u64,
        item: Result<AppendRowsResponse, Status>,
    ) -> bool {
        if state.carried_by(generation) == 0 {
            trace!(generation, "ignoring item from stale channel");
            return false;
        }
        match item {
            Ok(response) => self.on_response(state, generation, response),
            Err(status) => {
                let error = RpcError::from(status);
                if error.code == Code::InvalidArgument && !error.is_schema_mismatch() {
                    if let Some(oldest) = state.take_oldest(generation) {
                        oldest.mark_done(Err(WriteError::Request(error)));
                    }
                } else {
                    debug!(generation, %error, "replaced channel failed");
                    fail_generation(state, generation, &retired_failure(error));
                }
            }
        }
        state.carried_by(generation) > 0
    }

    fn on_response(&self, state: &mut State, generation: u64, response: AppendRowsResponse) {
        if let Some(schema) = &response.updated_schema {
            debug!(fields = schema.fields.len(), "table schema updated");
            state.latest_schema = Some(schema.clone());
            self.emit(ConnectionEvent::SchemaUpdated(schema.clone()));
        }

        let Some(pending) = state.take_oldest(generation) else {
            trace!("response arrived with no pending write; dropping");
            return;
        };
        trace!(offset = ?response.acknowledged_offset(), "data arrived");

        let error = response
            .error()
            .map(|status| RpcError::from_rpc_status(status, &response.row_errors));
        let result = match error {
            Some(error) => Err(WriteError::Request(error)),
            None => Ok(response),
        };
        pending.mark_done(result);
    }

    /// Classify a stream-level error. `established` is false when the call
    /// itself could not be opened.
    fn on_error(self: &Arc<Self>, state: &mut State, error: RpcError, established: bool) {
        if !established {
            mark_torn_down(state);
        }

        if error.is_schema_mismatch() {
            warn!(%error, pending = state.pending.len(), "schema mismatch; failing all pending writes");
            let failure = WriteError::PermanentSchemaMismatch(error);
            for pending in state.drain_all() {
                pending.mark_done(Err(failure.clone()));
            }
            if let Some(channel) = state.channel.take() {
                channel.shutdown();
            }
            self.emit(ConnectionEvent::Error(failure));
            return;
        }

        if error.is_transient() {
            if established {
                debug!(%error, "transient channel error; reconnecting");
                self.reopen(state, Handover::Recover(Some(&error)));
            } else {
                warn!(%error, "failed to open append channel");
                self.emit(ConnectionEvent::Error(WriteError::Connection(error)));
            }
            return;
        }

        if error.code == Code::InvalidArgument {
            let generation = state.generation;
            if let Some(oldest) = state.take_oldest(generation) {
                debug!(%error, "append request rejected");
                oldest.mark_done(Err(WriteError::Request(error)));
                return;
            }
        }

        warn!(%error, "append channel error");
        mark_torn_down(state);
        self.emit(ConnectionEvent::Error(WriteError::Connection(error)));
    }

    fn on_open_failed(self: &Arc<Self>, generation: u64, status: Status) {
        let mut state = self.lock();
        if state.generation == generation {
            self.on_error(&mut state, RpcError::from(status), false);
        } else {
            fail_generation(&mut state, generation, &WriteError::Connection(status.into()));
        }
    }

    fn on_channel_ended(&self, generation: u64) {
        let mut state = self.lock();
        if state.generation == generation {
            debug!(generation, "append channel ended by server");
            mark_torn_down(&mut state);
        } else {
            // A replaced channel closed before answering everything it carried.
            fail_generation(&mut state, generation, &WriteError::ConnectionClosed);
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(channel) = state.channel.take() {
            channel.shutdown();
        }
        for pending in state.drain_all() {
            pending.abort();
        }
    }
}

fn mark_torn_down(state: &mut State) {
    if let Some(channel) = state.channel.as_mut() {
        channel.torn_down = true;
    }
}

fn fail_generation(state: &mut State, generation: u64, error: &WriteError) {
    let failed = state.drain_generation(generation);
    if !failed.is_empty() {
        debug!(generation, count = failed.len(), %error, "failing writes of replaced channel");
    }
    for pending in failed {
        pending.mark_done(Err(error.clone()));
    }
}

/// Error for writes left on a replaced channel that failed as a whole.
fn retired_failure(error: RpcError) -> WriteError {
    if error.is_schema_mismatch() {
        WriteError::PermanentSchemaMismatch(error)
    } else if error.is_transient() {
        WriteError::TransientChannel(error)
    } else {
        WriteError::Connection(error)
    }
}

/// Reader side of one channel. Holds only a weak reference so dropping every
/// connection handle ends the call.
async fn run_channel(
    inner: Weak<Inner>,
    transport: Arc<dyn WriteTransport>,
    metadata: MetadataMap,
    requests: AppendRequestStream,
    generation: u64,
) {
    let mut responses = match transport.append_rows(metadata, requests).await {
        Ok(responses) => responses,
        Err(status) => {
            if let Some(inner) = inner.upgrade() {
                inner.on_open_failed(generation, status);
            }
            return;
        }
    };

    while let Some(item) = responses.next().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        if !inner.on_item(generation, item) {
            return;
        }
    }

    if let Some(inner) = inner.upgrade() {
        inner.on_channel_ended(generation);
    }
}
