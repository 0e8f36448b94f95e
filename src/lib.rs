// src/lib.rs

pub mod config;
pub mod core;

// Re-export
pub use crate::config::ClientConfig;
pub use crate::core::client::{TraceEvent, TraceHook};
pub use crate::core::node::{CallMode, Node, NodePath};
pub use crate::core::protocol::{ChangeNotification, Payload};
pub use crate::core::subscription::ChangeCallback;
pub use crate::core::{Client, ClientError, ConnectionState, ProtocolResult};
