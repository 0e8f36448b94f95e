// src/core/node/mod.rs

//! Fluent navigation of the device's node tree on top of a `Client`.
//!
//! A `Node` is an immutable handle: `child` returns a new handle, and every
//! protocol operation is an explicit method that builds the command string and
//! sends it through the client.

use crate::core::ClientError;
use crate::core::client::Client;
use crate::core::protocol::{Payload, PropertyLine, ProtocolResult, parse_property_shorthand};
use crate::core::subscription::ChangeCallback;
use tracing::debug;

mod path;
pub use path::NodePath;

const CHILD_NODE_PREFIX: &str = "N ";
const PROPERTY_LINE_PREFIX: char = 'P';

/// Whether a handle waits for the device's reply or fires and forgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMode {
    Sync,
    Async,
}

/// A node or property of the device tree, bound to a client.
#[derive(Clone)]
pub struct Node {
    client: Client,
    path: NodePath,
    mode: CallMode,
}

impl Node {
    pub fn new(client: Client, path: NodePath, mode: CallMode) -> Self {
        Self { client, path, mode }
    }

    /// Returns the handle for the child `name`.
    pub fn child(&self, name: &str) -> Self {
        Self {
            client: self.client.clone(),
            path: self.path.child(name),
            mode: self.mode,
        }
    }

    /// Returns the handle for a slash-separated path below this node.
    pub fn descendant(&self, relative: &str) -> Self {
        NodePath::parse(relative)
            .segments()
            .iter()
            .fold(self.clone(), |node, segment| node.child(segment))
    }

    pub fn path(&self) -> &NodePath {
        &self.path
    }

    pub fn name(&self) -> &str {
        self.path.name()
    }

    pub fn mode(&self) -> CallMode {
        self.mode
    }

    /// Reads the value of this property (`GET /parent.name`).
    pub async fn get(&self) -> Result<String, ClientError> {
        let command = format!("GET {}", self.property_path()?);
        let result = self.request(&command).await?;
        match result.value() {
            Some(value) => Ok(value.to_string()),
            None => Err(unexpected(&command, &result)),
        }
    }

    /// Writes the value of this property (`SET /parent.name=value`).
    pub async fn set(&self, value: &str) -> Result<(), ClientError> {
        let command = format!("SET {}={}", self.property_path()?, value);
        match self.mode {
            CallMode::Sync => self.request(&command).await.map(|_| ()),
            CallMode::Async => self.client.send_async(&command).await,
        }
    }

    /// Calls this method (`CALL /parent.name[=argument]`).
    ///
    /// Returns the device's result in synchronous mode, whether or not it
    /// reports success, and `None` in asynchronous mode.
    pub async fn call(
        &self,
        argument: Option<&str>,
    ) -> Result<Option<ProtocolResult>, ClientError> {
        let mut command = format!("CALL {}", self.property_path()?);
        if let Some(argument) = argument.filter(|a| !a.is_empty()) {
            command.push('=');
            command.push_str(argument);
        }
        match self.mode {
            CallMode::Sync => self.client.send_sync(&command).await.map(Some),
            CallMode::Async => self.client.send_async(&command).await.map(|_| None),
        }
    }

    /// Returns the raw listing of this node (`GET /a/b`).
    pub async fn listing(&self) -> Result<Vec<String>, ClientError> {
        let command = format!("GET {}", self.path.as_node());
        let result = self.request(&command).await?;
        match result.into_payload() {
            Payload::Lines(lines) => Ok(lines),
            Payload::None => Ok(Vec::new()),
            other => Err(ClientError::UnexpectedResponse {
                command,
                detail: format!("expected a block, got {other:?}"),
            }),
        }
    }

    /// Returns handles for the child nodes listed by the device.
    pub async fn children(&self) -> Result<Vec<Node>, ClientError> {
        let listing = self.listing().await?;
        Ok(listing
            .iter()
            .filter_map(|line| line.strip_prefix(CHILD_NODE_PREFIX))
            .map(|name| self.child(name))
            .collect())
    }

    /// Returns the properties listed by the device. Malformed lines are skipped.
    pub async fn properties(&self) -> Result<Vec<PropertyLine>, ClientError> {
        let listing = self.listing().await?;
        Ok(listing
            .iter()
            .filter(|line| line.starts_with(PROPERTY_LINE_PREFIX))
            .filter_map(|line| {
                let parsed = parse_property_shorthand(line);
                if parsed.is_none() {
                    debug!(
                        "Skipping malformed property line in {}: {}",
                        self.path, line
                    );
                }
                parsed
            })
            .collect())
    }

    /// Returns the manual text of this node (`MAN /a/b`).
    pub async fn node_manual(&self) -> Result<String, ClientError> {
        self.manual(self.path.as_node()).await
    }

    /// Returns the manual text of this property (`MAN /a.b`).
    pub async fn property_manual(&self) -> Result<String, ClientError> {
        let path = self.property_path()?;
        self.manual(path).await
    }

    /// Subscribes `callback` to changes of this property.
    pub async fn subscribe(&self, callback: ChangeCallback) -> Result<(), ClientError> {
        let name = self.property_name()?;
        self.client
            .add_subscription(callback, &self.path.parent_node(), Some(name))
            .await
    }

    pub async fn unsubscribe(&self, callback: &ChangeCallback) -> Result<bool, ClientError> {
        let name = self.property_name()?;
        self.client
            .remove_subscription(callback, &self.path.parent_node(), Some(name))
            .await
    }

    /// Subscribes `callback` to changes of any property of this node.
    pub async fn subscribe_all(&self, callback: ChangeCallback) -> Result<(), ClientError> {
        self.client
            .add_subscription(callback, &self.path.as_node(), None)
            .await
    }

    pub async fn unsubscribe_all(&self, callback: &ChangeCallback) -> Result<bool, ClientError> {
        self.client
            .remove_subscription(callback, &self.path.as_node(), None)
            .await
    }

    async fn manual(&self, path: String) -> Result<String, ClientError> {
        let command = format!("MAN {path}");
        let result = self.request(&command).await?;
        match result.into_payload() {
            Payload::Text(text) => Ok(text),
            other => Err(ClientError::UnexpectedResponse {
                command,
                detail: format!("expected manual text, got {other:?}"),
            }),
        }
    }

    /// Sends a synchronous request and turns a rejection into an error.
    async fn request(&self, command: &str) -> Result<ProtocolResult, ClientError> {
        if self.mode == CallMode::Async {
            return Err(ClientError::InvalidOperation(format!(
                "cannot wait for a reply on an asynchronous node ({command})"
            )));
        }
        self.client.send_sync(command).await?.into_checked(command)
    }

    fn property_path(&self) -> Result<String, ClientError> {
        self.path.as_property().ok_or_else(|| {
            ClientError::InvalidOperation("the root node is not a property".to_string())
        })
    }

    fn property_name(&self) -> Result<&str, ClientError> {
        if self.path.is_root() {
            return Err(ClientError::InvalidOperation(
                "the root node is not a property".to_string(),
            ));
        }
        Ok(self.path.name())
    }
}

fn unexpected(command: &str, result: &ProtocolResult) -> ClientError {
    ClientError::UnexpectedResponse {
        command: command.to_string(),
        detail: format!("no value in {:?}", result.payload()),
    }
}
