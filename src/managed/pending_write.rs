//! A submitted append and its eventual result.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::warn;

use super::error::WriteError;
use crate::proto::{AppendRowsRequest, AppendRowsResponse};

type WriteResult = Result<AppendRowsResponse, WriteError>;

/// Handle to one in-flight append request.
///
/// Clones share state. The result is set exactly once, by the connection that
/// owns the request; every clone observes it.
#[derive(Clone)]
pub struct PendingWrite {
    inner: Arc<Inner>,
}

struct Inner {
    request: AppendRowsRequest,
    retry_attempts: AtomicU32,
    result: watch::Sender<Option<WriteResult>>,
}

impl PendingWrite {
    pub fn new(request: AppendRowsRequest) -> Self {
        let (result, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                request,
                retry_attempts: AtomicU32::new(0),
                result,
            }),
        }
    }

    pub fn request(&self) -> &AppendRowsRequest {
        &self.inner.request
    }

    /// Resolve the write. Returns false, leaving the first result in place, if
    /// it was already resolved.
    pub fn mark_done(&self, result: WriteResult) -> bool {
        let mut result = Some(result);
        let resolved = self.inner.result.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = result.take();
            true
        });
        if !resolved {
            warn!(
                write_stream = %self.inner.request.write_stream,
                "pending write resolved more than once; keeping first result"
            );
        }
        resolved
    }

    /// Reject the write because its connection went away.
    pub fn abort(&self) -> bool {
        self.mark_done(Err(WriteError::Aborted))
    }

    pub fn is_done(&self) -> bool {
        self.inner.result.borrow().is_some()
    }

    /// The result, if already resolved.
    pub fn try_result(&self) -> Option<WriteResult> {
        self.inner.result.borrow().clone()
    }

    /// Wait for the result.
    pub async fn get_result(&self) -> WriteResult {
        let mut rx = self.inner.result.subscribe();
        let result = match rx.wait_for(Option::is_some).await {
            Ok(slot) => slot.clone().unwrap_or(Err(WriteError::Aborted)),
            Err(_) => Err(WriteError::Aborted),
        };
        result
    }

    /// Bump the retry counter, returning its previous value.
    ///
    /// Nothing in this crate reads the counter; it is there for retry layers
    /// built on top of the connection.
    pub fn increase_retry_attempts(&self) -> u32 {
        self.inner.retry_attempts.fetch_add(1, Ordering::Relaxed)
    }

    pub fn retry_attempts(&self) -> u32 {
        self.inner.retry_attempts.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for PendingWrite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingWrite")
            .field("write_stream", &self.inner.request.write_stream)
            .field("offset", &self.inner.request.offset.as_ref().map(|o| o.value))
            .field("done", &self.is_done())
            .finish()
    }
}
