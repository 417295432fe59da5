//! Pending Requests
//!
//! Correlation-id keyed completion slots for pipelined requests. The
//! issuing task registers a slot and awaits its [`ResponseHandle`]; the
//! connection's read loop completes slots as responses arrive, in any
//! order.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::domain::identifiers::CorrelationId;

use super::client::ClientError;
use super::messages::CommandResponse;

type Completion = oneshot::Sender<Result<CommandResponse, ClientError>>;

struct PendingRequest {
    sender: Completion,
    issued_at: Instant,
}

/// Outstanding requests of one connection.
#[derive(Default)]
pub struct PendingRequests {
    slots: Mutex<HashMap<CorrelationId, PendingRequest>>,
    closed: AtomicBool,
}

impl PendingRequests {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a slot for `correlation_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectionLost`] once the store is failed.
    pub fn register(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<oneshot::Receiver<Result<CommandResponse, ClientError>>, ClientError> {
        let mut slots = self.slots.lock();
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::ConnectionLost);
        }

        let (tx, rx) = oneshot::channel();
        slots.insert(
            correlation_id,
            PendingRequest {
                sender: tx,
                issued_at: Instant::now(),
            },
        );
        Ok(rx)
    }

    /// Deliver a response to its slot.
    ///
    /// Returns `false` if no slot is waiting or the waiter went away.
    pub fn complete(&self, correlation_id: CorrelationId, response: CommandResponse) -> bool {
        let Some(pending) = self.slots.lock().remove(&correlation_id) else {
            tracing::warn!(
                correlation_id = %correlation_id,
                "Response for unknown or expired correlation id"
            );
            return false;
        };

        let elapsed = pending.issued_at.elapsed();
        if pending.sender.send(Ok(response)).is_err() {
            tracing::debug!(correlation_id = %correlation_id, "Response waiter dropped");
            return false;
        }

        tracing::debug!(
            correlation_id = %correlation_id,
            response_time_ms = elapsed.as_millis(),
            "Completed pending request"
        );
        true
    }

    /// Drop a slot without completing it.
    pub fn cancel(&self, correlation_id: CorrelationId) -> bool {
        self.slots.lock().remove(&correlation_id).is_some()
    }

    /// Fail every outstanding slot and refuse new ones.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<_> = {
            let mut slots = self.slots.lock();
            self.closed.store(true, Ordering::SeqCst);
            slots.drain().collect()
        };

        let count = drained.len();
        for (_, pending) in drained {
            let _ = pending.sender.send(Err(ClientError::ConnectionLost));
        }
        count
    }

    /// Whether the store has been failed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Outstanding request count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Whether nothing is outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}

/// Awaitable result of one pipelined request.
///
/// Dropping the handle before the response arrives frees its slot; a late
/// response is then logged and dropped by the read loop.
pub struct ResponseHandle {
    correlation_id: CorrelationId,
    rx: oneshot::Receiver<Result<CommandResponse, ClientError>>,
    timeout: Duration,
    pending: Arc<PendingRequests>,
    settled: bool,
}

impl ResponseHandle {
    pub(crate) const fn new(
        correlation_id: CorrelationId,
        rx: oneshot::Receiver<Result<CommandResponse, ClientError>>,
        timeout: Duration,
        pending: Arc<PendingRequests>,
    ) -> Self {
        Self {
            correlation_id,
            rx,
            timeout,
            pending,
            settled: false,
        }
    }

    /// Correlation id of the request.
    #[must_use]
    pub const fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Wait for the response.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Timeout`] past the request deadline, or
    /// [`ClientError::ConnectionLost`] if the connection dropped first.
    pub async fn wait(mut self) -> Result<CommandResponse, ClientError> {
        let outcome = tokio::time::timeout(self.timeout, &mut self.rx).await;
        self.settled = true;
        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::ConnectionLost),
            Err(_) => {
                self.pending.cancel(self.correlation_id);
                Err(ClientError::Timeout(self.correlation_id))
            }
        }
    }
}

impl Drop for ResponseHandle {
    fn drop(&mut self) {
        if !self.settled && self.pending.cancel(self.correlation_id) {
            tracing::debug!(correlation_id = %self.correlation_id, "Abandoned pending request");
        }
    }
}
