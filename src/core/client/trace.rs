// src/core/client/trace.rs

//! The wire trace hook. Every raw command written and every raw line read is
//! reported to a hook supplied at construction; the engine never prints.

use std::sync::Arc;
use tracing::{trace, warn};

/// A single event on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEvent<'a> {
    /// A command line as written, without its terminator.
    Outgoing(&'a str),
    /// A line as received, without its terminator. Block markers and block
    /// lines are reported too, once the block closes or, for a block cut short
    /// by a closed connection, when the receive loop stops.
    Incoming(&'a str),
    /// A received line the decoder could not classify. It has been dropped.
    Unrecognized { line: &'a str, reason: &'a str },
}

pub type TraceHook = Arc<dyn Fn(TraceEvent<'_>) + Send + Sync>;

/// The default hook: forwards wire traffic to `tracing` under the
/// `mprotocol::wire` target.
pub fn tracing_hook() -> TraceHook {
    Arc::new(|event: TraceEvent<'_>| match event {
        TraceEvent::Outgoing(line) => trace!(target: "mprotocol::wire", "> {}", line),
        TraceEvent::Incoming(line) => trace!(target: "mprotocol::wire", "< {}", line),
        TraceEvent::Unrecognized { line, reason } => {
            warn!(target: "mprotocol::wire", "Unable to process line ({}): {}", reason, line)
        }
    })
}
