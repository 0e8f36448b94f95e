// src/core/client/mod.rs

//! The connection engine.
//!
//! A `Client` owns one TCP connection to a device. A single background task
//! reads the socket, frames and classifies every line, hands results to the
//! caller waiting in `send_sync`, and dispatches change notifications to the
//! subscription registry. Callers on any task may send commands concurrently.

use crate::config::ClientConfig;
use crate::core::ClientError;
use crate::core::node::{CallMode, Node, NodePath};
use crate::core::protocol::{MProtocolCodec, ProtocolResult, validate_command};
use crate::core::subscription::{ChangeCallback, CommandChannel, SubscriptionRegistry};
use async_trait::async_trait;
use correlator::RequestCorrelator;
use futures::SinkExt;
use parking_lot::Mutex;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

mod correlator;
mod receiver;
pub mod trace;

pub use trace::{TraceEvent, TraceHook, tracing_hook};

/// The lifecycle of a connection. `Closed` is terminal for a given socket;
/// `connect` opens a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Closing,
    Closed,
}

type CommandWriter = FramedWrite<OwnedWriteHalf, MProtocolCodec>;

/// Everything that belongs to one live socket. A reconnect builds a new `Link`.
pub(crate) struct Link {
    peer: SocketAddr,
    state: Mutex<ConnectionState>,
    /// The per-connection write lock. `None` once the write half has been released.
    writer: tokio::sync::Mutex<Option<CommandWriter>>,
    correlator: RequestCorrelator,
    shutdown_tx: broadcast::Sender<()>,
    trace: TraceHook,
}

impl Link {
    fn new(
        peer: SocketAddr,
        writer: CommandWriter,
        shutdown_tx: broadcast::Sender<()>,
        trace: TraceHook,
    ) -> Self {
        Self {
            peer,
            state: Mutex::new(ConnectionState::Connected),
            writer: tokio::sync::Mutex::new(Some(writer)),
            correlator: RequestCorrelator::new(),
            shutdown_tx,
            trace,
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Writes one command line. Bytes of concurrent writers never interleave.
    ///
    /// A write stuck on a peer that stopped reading is abandoned as soon as the
    /// link is closed, and the write half is released.
    async fn write(&self, command: &str) -> Result<(), ClientError> {
        // Subscribe before checking the state so a concurrent close cannot be missed.
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let outcome = {
            let mut writer = self.writer.lock().await;
            let Some(framed) = writer.as_mut() else {
                return Err(ClientError::ConnectionLost(command.to_string()));
            };
            if self.state() != ConnectionState::Connected {
                return Err(ClientError::ConnectionLost(command.to_string()));
            }
            (self.trace)(TraceEvent::Outgoing(command));
            let sent = tokio::select! {
                biased;
                _ = shutdown_rx.recv() => None,
                sent = framed.send(command) => Some(sent),
            };
            if sent.is_none() {
                debug!("Abandoning write to {} on shutdown", self.peer);
                writer.take();
            }
            sent
        };
        match outcome {
            Some(Ok(())) => Ok(()),
            Some(Err(e)) => {
                self.close(&format!("write failed: {e}"));
                Err(ClientError::ConnectionLost(command.to_string()))
            }
            None => Err(ClientError::ConnectionLost(command.to_string())),
        }
    }

    /// Moves the link from `Connected` to `Closed`. Only the first call has any
    /// effect: it stops the receive task, releases a blocked synchronous caller
    /// with `ConnectionLost`, and drops the write half of the socket.
    pub(crate) fn close(&self, reason: &str) {
        {
            let mut state = self.state.lock();
            if *state != ConnectionState::Connected {
                return;
            }
            *state = ConnectionState::Closing;
        }
        info!("Closing connection to {}: {}", self.peer, reason);

        let _ = self.shutdown_tx.send(());
        self.correlator.abort();
        match self.writer.try_lock() {
            Ok(mut writer) => {
                writer.take();
            }
            Err(_) => debug!(
                "Write half to {} is busy; the writer releases it on shutdown",
                self.peer
            ),
        }

        *self.state.lock() = ConnectionState::Closed;
    }
}

struct Inner {
    config: ClientConfig,
    trace: TraceHook,
    /// Held across the whole send-and-wait of a synchronous request.
    request_lock: tokio::sync::Mutex<()>,
    link: Mutex<Option<Arc<Link>>>,
    subscriptions: Arc<SubscriptionRegistry>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(link) = self.link.get_mut().take() {
            link.close("client dropped");
        }
    }
}

/// A cloneable handle to one device connection.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Creates a disconnected client that traces wire traffic through `tracing`.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_trace_hook(config, tracing_hook())
    }

    /// Creates a disconnected client that reports wire traffic to `trace`.
    pub fn with_trace_hook(config: ClientConfig, trace: TraceHook) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                trace,
                request_lock: tokio::sync::Mutex::new(()),
                link: Mutex::new(None),
                subscriptions: Arc::new(SubscriptionRegistry::new()),
            }),
        }
    }

    /// Creates a client and connects it.
    pub async fn open(config: ClientConfig) -> Result<Self, ClientError> {
        let client = Self::new(config);
        client.connect().await?;
        Ok(client)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        self.inner
            .link
            .lock()
            .as_ref()
            .map_or(ConnectionState::Disconnected, |link| link.state())
    }

    /// The address of the connected device, if a socket has been opened.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.link.lock().as_ref().map(|link| link.peer)
    }

    /// Opens the socket and starts the receive task.
    ///
    /// Valid from `Disconnected` and from `Closed`. Reconnecting forgets every
    /// subscription, since the device dropped them with the old socket.
    pub async fn connect(&self) -> Result<(), ClientError> {
        // Keeps a connect from racing an in-flight synchronous request.
        let _guard = self.inner.request_lock.lock().await;

        let reconnecting = match self.state() {
            ConnectionState::Connected => return Err(ClientError::AlreadyConnected),
            ConnectionState::Closing => {
                return Err(ClientError::InvalidOperation(
                    "connection is still closing".to_string(),
                ));
            }
            ConnectionState::Closed => true,
            ConnectionState::Disconnected => false,
        };

        let addr = self.inner.config.address();
        let connect_timeout = self.inner.config.connect_timeout;
        let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(&addr)).await
        {
            Ok(stream) => stream?,
            Err(_) => {
                return Err(ClientError::from(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connecting to {addr} timed out after {connect_timeout:?}"),
                )));
            }
        };
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;

        if reconnecting {
            self.inner.subscriptions.clear();
        }

        let (read_half, write_half) = stream.into_split();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let link = Arc::new(Link::new(
            peer,
            FramedWrite::new(write_half, MProtocolCodec::new()),
            shutdown_tx,
            Arc::clone(&self.inner.trace),
        ));
        *self.inner.link.lock() = Some(Arc::clone(&link));

        tokio::spawn(receiver::run(
            FramedRead::new(read_half, MProtocolCodec::new()),
            link,
            Arc::clone(&self.inner.subscriptions),
            shutdown_rx,
        ));

        info!("Connected to {}", peer);
        Ok(())
    }

    /// Closes the connection. Any caller blocked in `send_sync` fails with
    /// `ConnectionLost`. Closing a connection that is not open does nothing.
    pub fn close(&self) {
        let link = self.inner.link.lock().clone();
        if let Some(link) = link {
            link.close("closed by caller");
        }
    }

    fn live_link(&self, command: &str) -> Result<Arc<Link>, ClientError> {
        match self.inner.link.lock().as_ref() {
            None => Err(ClientError::NotConnected),
            Some(link) if link.state() == ConnectionState::Connected => Ok(Arc::clone(link)),
            Some(_) => Err(ClientError::ConnectionLost(command.to_string())),
        }
    }

    /// Writes `command` and returns without waiting for any reply.
    pub async fn send_async(&self, command: &str) -> Result<(), ClientError> {
        validate_command(command)?;
        let link = self.live_link(command)?;
        link.write(command).await
    }

    /// Sends `command` and waits up to the configured request timeout for its result.
    pub async fn send_sync(&self, command: &str) -> Result<ProtocolResult, ClientError> {
        self.send_sync_timeout(command, self.inner.config.request_timeout)
            .await
    }

    /// Sends `command` and waits up to `timeout` for its result.
    ///
    /// Only one synchronous request is in flight per connection; concurrent
    /// callers queue on the request lock. The deadline starts once this caller
    /// holds the lock and covers both writing the command and waiting for the
    /// reply. A timeout closes the connection, since the stream cannot be
    /// resynchronized mid-response.
    ///
    /// A device-side rejection is returned as `Ok` with `is_ok() == false`.
    pub async fn send_sync_timeout(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<ProtocolResult, ClientError> {
        validate_command(command)?;
        let _guard = self.inner.request_lock.lock().await;
        let deadline = Instant::now() + timeout;

        let link = self.live_link(command)?;
        let receiver = link.correlator.begin(command)?;
        match tokio::time::timeout_at(deadline, link.write(command)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                link.correlator.cancel();
                return Err(e);
            }
            Err(_) => {
                link.correlator.cancel();
                return Err(expire(&link, command, timeout, "writing the command"));
            }
        }

        match tokio::time::timeout_at(deadline, receiver).await {
            Ok(Ok(completion)) => completion,
            Ok(Err(_)) => Err(ClientError::ConnectionLost(command.to_string())),
            Err(_) => Err(expire(&link, command, timeout, "waiting for a response")),
        }
    }

    /// Registers `callback` for changes of `property` on `node_path`, or of any
    /// property when `property` is `None`. The first subscription on a node
    /// sends `OPEN <node_path>`.
    pub async fn add_subscription(
        &self,
        callback: ChangeCallback,
        node_path: &str,
        property: Option<&str>,
    ) -> Result<(), ClientError> {
        self.inner
            .subscriptions
            .add(self, callback, node_path, property)
            .await
    }

    /// Unregisters `callback`. Removing the last subscription on a node sends
    /// `CLOSE <node_path>`. Returns false if the callback was not registered.
    pub async fn remove_subscription(
        &self,
        callback: &ChangeCallback,
        node_path: &str,
        property: Option<&str>,
    ) -> Result<bool, ClientError> {
        self.inner
            .subscriptions
            .remove(self, callback, node_path, property)
            .await
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.inner.subscriptions
    }

    /// The root node, navigated with synchronous requests.
    pub fn root(&self) -> Node {
        Node::new(self.clone(), NodePath::root(), CallMode::Sync)
    }

    /// The root node, navigated with fire-and-forget requests.
    pub fn root_async(&self) -> Node {
        Node::new(self.clone(), NodePath::root(), CallMode::Async)
    }
}

/// Closes `link` after a synchronous request ran out of time.
fn expire(link: &Link, command: &str, timeout: Duration, phase: &str) -> ClientError {
    warn!(
        "'{:.80}' timed out after {:?} while {}; closing connection",
        command, timeout, phase
    );
    link.close("request timed out");
    ClientError::Timeout(command.to_string())
}

#[async_trait]
impl CommandChannel for Client {
    async fn send_sync(&self, command: &str) -> Result<ProtocolResult, ClientError> {
        Client::send_sync(self, command).await
    }
}
