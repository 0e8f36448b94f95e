// src/core/mod.rs

//! The central module containing the connection engine and the pieces it is built from.

pub mod client;
pub mod errors;
pub mod node;
pub mod protocol;
pub mod subscription;

pub use client::{Client, ConnectionState};
pub use errors::ClientError;
pub use protocol::ProtocolResult;
