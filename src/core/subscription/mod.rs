// src/core/subscription/mod.rs

//! The subscription registry.
//! It maps node paths and property names to change callbacks, and decides when
//! the device must be told to start (`OPEN`) or stop (`CLOSE`) reporting
//! changes for a node.

use crate::core::ClientError;
use crate::core::protocol::{ChangeNotification, ProtocolResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info};

/// A callback invoked on the receive task for every matching change notification.
///
/// Callbacks run synchronously on the connection's receive task: a slow
/// callback delays the processing of every frame behind it, including replies
/// to pending requests.
pub type ChangeCallback = Arc<dyn Fn(&ChangeNotification) + Send + Sync>;

/// The channel the registry uses to issue `OPEN` / `CLOSE`.
#[async_trait]
pub trait CommandChannel: Send + Sync {
    async fn send_sync(&self, command: &str) -> Result<ProtocolResult, ClientError>;
}

/// Property key within a node. `None` is the whole-node key.
type PropertyKey = Option<String>;

type NodeEntry = HashMap<PropertyKey, Vec<ChangeCallback>>;

/// `SubscriptionRegistry` tracks every callback registered on a connection.
///
/// Two locks are involved. `mutation_lock` serializes `add`/`remove` for the
/// whole duration of their `OPEN`/`CLOSE` round trip. `nodes` guards the map
/// itself and is only ever held for short, non-async sections, so the receive
/// task can always dispatch (and deliver the very `OPEN` reply an `add` is
/// waiting for) without contending on `mutation_lock`.
#[derive(Default)]
pub struct SubscriptionRegistry {
    mutation_lock: tokio::sync::Mutex<()>,
    nodes: Mutex<HashMap<String, NodeEntry>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    /// Registers `callback` under `(node_path, property)`.
    ///
    /// If `node_path` had no callbacks at all, `OPEN <node_path>` is sent first
    /// and must succeed; otherwise the registry is left untouched and the error
    /// is returned.
    pub async fn add(
        &self,
        channel: &dyn CommandChannel,
        callback: ChangeCallback,
        node_path: &str,
        property: Option<&str>,
    ) -> Result<(), ClientError> {
        let _guard = self.mutation_lock.lock().await;

        let is_new_node = !self.nodes.lock().contains_key(node_path);
        if is_new_node {
            let command = format!("OPEN {node_path}");
            channel.send_sync(&command).await?.into_checked(&command)?;
            info!("Opened change notifications for {}", node_path);
        }

        let mut nodes = self.nodes.lock();
        let callbacks = nodes
            .entry(node_path.to_string())
            .or_default()
            .entry(property.map(str::to_string))
            .or_default();
        if !callbacks.iter().any(|cb| Arc::ptr_eq(cb, &callback)) {
            callbacks.push(callback);
        }
        Ok(())
    }

    /// Removes `callback` from `(node_path, property)`.
    ///
    /// Returns `Ok(false)` if the callback was not registered there. When the
    /// last callback of a node goes away, `CLOSE <node_path>` is sent; if that
    /// fails, the callback is put back and the error is returned.
    pub async fn remove(
        &self,
        channel: &dyn CommandChannel,
        callback: &ChangeCallback,
        node_path: &str,
        property: Option<&str>,
    ) -> Result<bool, ClientError> {
        let _guard = self.mutation_lock.lock().await;
        let key: PropertyKey = property.map(str::to_string);

        let node_emptied = {
            let mut nodes = self.nodes.lock();
            let Some(entry) = nodes.get_mut(node_path) else {
                return Ok(false);
            };
            let Some(callbacks) = entry.get_mut(&key) else {
                return Ok(false);
            };
            let before = callbacks.len();
            callbacks.retain(|cb| !Arc::ptr_eq(cb, callback));
            if callbacks.len() == before {
                return Ok(false);
            }
            if callbacks.is_empty() {
                entry.remove(&key);
            }
            if entry.is_empty() {
                nodes.remove(node_path);
                true
            } else {
                false
            }
        };

        if node_emptied {
            let command = format!("CLOSE {node_path}");
            let closed = match channel.send_sync(&command).await {
                Ok(result) => result.into_checked(&command).map(|_| ()),
                Err(e) => Err(e),
            };
            if let Err(e) = closed {
                self.nodes
                    .lock()
                    .entry(node_path.to_string())
                    .or_default()
                    .entry(key)
                    .or_default()
                    .push(Arc::clone(callback));
                return Err(e);
            }
            info!("Closed change notifications for {}", node_path);
        }
        Ok(true)
    }

    /// Invokes every callback registered under the exact property of `change`
    /// and, independently, every callback registered under the whole-node key.
    ///
    /// Unknown node paths are dropped. Returns the number of callbacks invoked.
    pub fn dispatch(&self, change: &ChangeNotification) -> usize {
        let targets: Vec<ChangeCallback> = {
            let nodes = self.nodes.lock();
            let Some(entry) = nodes.get(&change.node_path) else {
                debug!(
                    "Dropping change for unsubscribed node {}",
                    change.node_path
                );
                return 0;
            };
            let exact = entry.get(&Some(change.property.clone()));
            let whole = entry.get(&None);
            exact
                .into_iter()
                .chain(whole)
                .flatten()
                .cloned()
                .collect()
        };

        for callback in &targets {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(change))).is_err() {
                error!(
                    "Change callback for {}.{} panicked",
                    change.node_path, change.property
                );
            }
        }
        targets.len()
    }

    /// Returns every node path that currently has callbacks.
    pub fn nodes(&self) -> Vec<String> {
        self.nodes.lock().keys().cloned().collect()
    }

    pub fn is_subscribed(&self, node_path: &str) -> bool {
        self.nodes.lock().contains_key(node_path)
    }

    /// Returns the number of callbacks registered on `node_path` across all keys.
    pub fn callback_count(&self, node_path: &str) -> usize {
        self.nodes
            .lock()
            .get(node_path)
            .map_or(0, |entry| entry.values().map(Vec::len).sum())
    }

    /// Forgets every subscription without talking to the device.
    pub fn clear(&self) {
        let mut nodes = self.nodes.lock();
        if !nodes.is_empty() {
            debug!("Clearing {} subscribed nodes", nodes.len());
        }
        nodes.clear();
    }
}
