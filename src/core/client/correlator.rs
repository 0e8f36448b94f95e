// src/core/client/correlator.rs

//! Positional request/response correlation.
//!
//! MProtocol replies carry no request identifier, so the next result off the
//! wire always belongs to the oldest outstanding synchronous request. The
//! engine guarantees there is at most one by holding its request lock across
//! the whole send-and-wait sequence; this type only holds the slot for that
//! one request.

use crate::core::ClientError;
use crate::core::protocol::ProtocolResult;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

pub(crate) type Completion = Result<ProtocolResult, ClientError>;

/// The synchronous request currently waiting for its result.
struct PendingRequest {
    command: String,
    responder: oneshot::Sender<Completion>,
}

#[derive(Default)]
struct Slot {
    pending: Option<PendingRequest>,
    /// Set once the connection is gone. No request can be registered afterwards.
    closed: bool,
}

#[derive(Default)]
pub(crate) struct RequestCorrelator {
    slot: Mutex<Slot>,
}

impl RequestCorrelator {
    pub(crate) fn new() -> Self {
        Default::default()
    }

    /// Registers `command` as the pending request and returns the receiver its
    /// result will arrive on. Any stale pending request is discarded.
    pub(crate) fn begin(&self, command: &str) -> Result<oneshot::Receiver<Completion>, ClientError> {
        let mut slot = self.slot.lock();
        if slot.closed {
            return Err(ClientError::ConnectionLost(command.to_string()));
        }
        if let Some(stale) = slot.pending.take() {
            debug!("Discarding stale pending request '{}'", stale.command);
        }
        let (responder, receiver) = oneshot::channel();
        slot.pending = Some(PendingRequest {
            command: command.to_string(),
            responder,
        });
        Ok(receiver)
    }

    /// Hands `result` to the waiting caller. Returns false if nobody was waiting.
    pub(crate) fn deliver(&self, result: ProtocolResult) -> bool {
        let Some(pending) = self.slot.lock().pending.take() else {
            debug!("Dropping unsolicited result: {}", result);
            return false;
        };
        // The receiver is gone if the caller timed out in the meantime.
        pending.responder.send(Ok(result)).is_ok()
    }

    /// Forgets the pending request without completing it.
    pub(crate) fn cancel(&self) {
        self.slot.lock().pending = None;
    }

    /// Marks the connection as gone and releases the waiting caller, if any,
    /// with `ConnectionLost`.
    pub(crate) fn abort(&self) {
        let pending = {
            let mut slot = self.slot.lock();
            slot.closed = true;
            slot.pending.take()
        };
        if let Some(pending) = pending {
            let error = ClientError::ConnectionLost(pending.command);
            let _ = pending.responder.send(Err(error));
        }
    }
}
