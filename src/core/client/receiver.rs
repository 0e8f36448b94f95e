// src/core/client/receiver.rs

//! The receive loop: the only reader of a connection's socket.

use super::Link;
use super::trace::TraceEvent;
use crate::core::protocol::result::{BLOCK_CLOSE, BLOCK_OPEN};
use crate::core::protocol::{
    DecodedLine, Frame, MProtocolCodec, Payload, ProtocolResult, decode_line,
};
use crate::core::ClientError;
use crate::core::subscription::SubscriptionRegistry;
use futures::StreamExt;
use std::sync::Arc;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::broadcast;
use tokio_util::codec::FramedRead;
use tracing::{debug, warn};

/// Runs until the peer closes the socket, a read fails, or the link is closed
/// locally. On exit the link is closed, which releases any caller still
/// waiting for a result.
pub(crate) async fn run(
    mut reader: FramedRead<OwnedReadHalf, MProtocolCodec>,
    link: Arc<Link>,
    subscriptions: Arc<SubscriptionRegistry>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let reason = loop {
        tokio::select! {
            // Prioritize the shutdown signal over pending input.
            biased;
            _ = shutdown_rx.recv() => break "shutdown requested".to_string(),
            frame = reader.next() => match frame {
                Some(Ok(frame)) => route(frame, &link, &subscriptions),
                Some(Err(ClientError::Decode(detail))) => {
                    warn!("Protocol violation from {}: {}", link.peer, detail);
                    break format!("protocol violation: {detail}");
                }
                Some(Err(e)) => break format!("read failed: {e}"),
                None => break "peer closed the connection".to_string(),
            },
        }
    };
    debug!("Receive loop for {} stopped: {}", link.peer, reason);

    // A block cut short is never delivered, but its lines were still received.
    if let Some(lines) = reader.decoder_mut().take_unfinished_block() {
        let trace = &link.trace;
        trace(TraceEvent::Incoming(BLOCK_OPEN));
        for line in &lines {
            trace(TraceEvent::Incoming(line));
        }
    }
    link.close(&reason);
}

/// Hands one frame to whoever is waiting for it.
fn route(frame: Frame, link: &Link, subscriptions: &SubscriptionRegistry) {
    let trace = &link.trace;
    match frame {
        Frame::Block(lines) => {
            trace(TraceEvent::Incoming(BLOCK_OPEN));
            for line in &lines {
                trace(TraceEvent::Incoming(line));
            }
            trace(TraceEvent::Incoming(BLOCK_CLOSE));
            link.correlator.deliver(ProtocolResult::ok(Payload::Lines(lines)));
        }
        Frame::Line(line) => {
            trace(TraceEvent::Incoming(&line));
            match decode_line(&line) {
                DecodedLine::Result(result) => {
                    link.correlator.deliver(result);
                }
                DecodedLine::Change(change) => {
                    subscriptions.dispatch(&change);
                }
                DecodedLine::BlockOpen | DecodedLine::BlockClose => {
                    trace(TraceEvent::Unrecognized {
                        line: &line,
                        reason: "block marker outside of a block",
                    });
                }
                DecodedLine::Unrecognized { reason, .. } => {
                    trace(TraceEvent::Unrecognized {
                        line: &line,
                        reason: &reason,
                    });
                }
            }
        }
    }
}
