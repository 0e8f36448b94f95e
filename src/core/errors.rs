// src/core/errors.rs

//! Defines the primary error type for the client.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing every failure the connection engine and
/// the node layer can report.
///
/// A device answering with a non-zero status is *not* an error at the engine
/// level: it arrives as a [`ProtocolResult`](crate::core::protocol::ProtocolResult)
/// whose `is_ok()` is false. `CommandRejected` exists for the layers that
/// choose to treat such a reply as fatal.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Not connected")]
    NotConnected,

    #[error("Already connected")]
    AlreadyConnected,

    /// The synchronous request exceeded its deadline. The connection has been closed.
    #[error("Timed out waiting for a response to '{0}'")]
    Timeout(String),

    /// The peer closed the socket, an I/O error occurred, or the connection was
    /// closed locally before a response arrived.
    #[error("Connection lost while executing '{0}'")]
    ConnectionLost(String),

    #[error("Command '{command}' rejected: {message} (Code: {code})")]
    CommandRejected {
        command: String,
        code: u8,
        message: String,
    },

    /// The device broke framing limits. The connection has been closed.
    #[error("Protocol decode error: {0}")]
    Decode(String),

    #[error("Unexpected response to '{command}': {detail}")]
    UnexpectedResponse { command: String, detail: String },

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
// It is wrapped in an Arc so a single failure can be handed to several waiters.
impl Clone for ClientError {
    fn clone(&self) -> Self {
        match self {
            ClientError::Io(e) => ClientError::Io(Arc::clone(e)),
            ClientError::NotConnected => ClientError::NotConnected,
            ClientError::AlreadyConnected => ClientError::AlreadyConnected,
            ClientError::Timeout(c) => ClientError::Timeout(c.clone()),
            ClientError::ConnectionLost(c) => ClientError::ConnectionLost(c.clone()),
            ClientError::CommandRejected {
                command,
                code,
                message,
            } => ClientError::CommandRejected {
                command: command.clone(),
                code: *code,
                message: message.clone(),
            },
            ClientError::Decode(s) => ClientError::Decode(s.clone()),
            ClientError::UnexpectedResponse { command, detail } => {
                ClientError::UnexpectedResponse {
                    command: command.clone(),
                    detail: detail.clone(),
                }
            }
            ClientError::InvalidCommand(s) => ClientError::InvalidCommand(s.clone()),
            ClientError::InvalidOperation(s) => ClientError::InvalidOperation(s.clone()),
        }
    }
}

impl PartialEq for ClientError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ClientError::Io(e1), ClientError::Io(e2)) => e1.to_string() == e2.to_string(),
            (ClientError::Timeout(c1), ClientError::Timeout(c2)) => c1 == c2,
            (ClientError::ConnectionLost(c1), ClientError::ConnectionLost(c2)) => c1 == c2,
            (
                ClientError::CommandRejected {
                    command: c1,
                    code: k1,
                    message: m1,
                },
                ClientError::CommandRejected {
                    command: c2,
                    code: k2,
                    message: m2,
                },
            ) => c1 == c2 && k1 == k2 && m1 == m2,
            (ClientError::Decode(s1), ClientError::Decode(s2)) => s1 == s2,
            (
                ClientError::UnexpectedResponse {
                    command: c1,
                    detail: d1,
                },
                ClientError::UnexpectedResponse {
                    command: c2,
                    detail: d2,
                },
            ) => c1 == c2 && d1 == d2,
            (ClientError::InvalidCommand(s1), ClientError::InvalidCommand(s2)) => s1 == s2,
            (ClientError::InvalidOperation(s1), ClientError::InvalidOperation(s2)) => s1 == s2,
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::Io(Arc::new(e))
    }
}
