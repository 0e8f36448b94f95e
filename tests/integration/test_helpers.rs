// tests/integration/test_helpers.rs

//! Test helpers and utilities for integration tests

use mprotocol_client::{ChangeCallback, ChangeNotification, ClientConfig, TraceEvent, TraceHook};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// How the mock device answers one command line.
pub enum Reply {
    /// Write these lines, each followed by `\n`.
    Lines(Vec<String>),
    /// Write these lines, then drop the connection.
    LinesThenHangup(Vec<String>),
    /// Write nothing.
    Silent,
}

impl Reply {
    pub fn line(line: &str) -> Self {
        Reply::Lines(vec![line.to_string()])
    }

    pub fn ok() -> Self {
        Self::line("E0:Ok")
    }

    pub fn block(lines: &[&str]) -> Self {
        let mut all = vec!["{".to_string()];
        all.extend(lines.iter().map(|l| l.to_string()));
        all.push("}".to_string());
        Reply::Lines(all)
    }
}

enum Control {
    Send(Vec<u8>),
    Hangup,
}

/// A scripted device on a loopback port. It serves one connection at a time,
/// accepting the next one after the previous closes, and records every
/// command line it receives.
pub struct MockDevice {
    pub addr: SocketAddr,
    commands: Arc<Mutex<Vec<String>>>,
    control: mpsc::UnboundedSender<Control>,
}

impl MockDevice {
    /// Starts a device that answers each command with `responder(command)`.
    pub async fn start<F>(responder: F) -> Self
    where
        F: Fn(&str) -> Reply + Send + Sync + 'static,
    {
        init_tracing();

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock device");
        let addr = listener.local_addr().expect("Failed to read local addr");
        let commands = Arc::new(Mutex::new(Vec::new()));
        let (control, mut control_rx) = mpsc::unbounded_channel();

        let log = Arc::clone(&commands);
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                let (read_half, mut write_half) = socket.into_split();
                let mut lines = BufReader::new(read_half).lines();
                loop {
                    tokio::select! {
                        line = lines.next_line() => {
                            let Ok(Some(line)) = line else { break };
                            log.lock().unwrap().push(line.clone());
                            match responder(&line) {
                                Reply::Lines(reply) => {
                                    if write_lines(&mut write_half, &reply).await.is_err() {
                                        break;
                                    }
                                }
                                Reply::LinesThenHangup(reply) => {
                                    let _ = write_lines(&mut write_half, &reply).await;
                                    break;
                                }
                                Reply::Silent => {}
                            }
                        }
                        control = control_rx.recv() => match control {
                            Some(Control::Send(bytes)) => {
                                if write_half.write_all(&bytes).await.is_err() {
                                    break;
                                }
                            }
                            Some(Control::Hangup) => break,
                            None => return,
                        },
                    }
                }
            }
        });

        Self {
            addr,
            commands,
            control,
        }
    }

    /// A device that acknowledges every command with `E0:Ok`.
    pub async fn acknowledging() -> Self {
        Self::start(|_| Reply::ok()).await
    }

    /// A client config pointing at this device, with a short request timeout.
    pub fn config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(self.addr.ip().to_string(), self.addr.port());
        config.request_timeout = Duration::from_secs(2);
        config
    }

    /// Every command line received so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    /// Number of received commands equal to `command`.
    pub fn count(&self, command: &str) -> usize {
        self.commands().iter().filter(|c| *c == command).count()
    }

    /// Writes raw bytes to the connected client.
    pub fn send_raw(&self, bytes: &[u8]) {
        let _ = self.control.send(Control::Send(bytes.to_vec()));
    }

    /// Writes one unsolicited line to the connected client.
    pub fn send_line(&self, line: &str) {
        self.send_raw(format!("{line}\n").as_bytes());
    }

    /// Drops the current connection.
    pub fn hangup(&self) {
        let _ = self.control.send(Control::Hangup);
    }
}

/// A device that accepts one connection and never reads from it, so the
/// client's writes eventually stall once the socket buffers are full.
pub async fn deaf_device() -> ClientConfig {
    init_tracing();

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind deaf device");
    let addr = listener.local_addr().expect("Failed to read local addr");
    tokio::spawn(async move {
        if let Ok((socket, _)) = listener.accept().await {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            drop(socket);
        }
    });

    let mut config = ClientConfig::new(addr.ip().to_string(), addr.port());
    config.request_timeout = Duration::from_secs(2);
    config
}

/// A single command line far larger than any socket buffer.
pub fn oversized_command() -> String {
    format!("SET /a.b={}", "x".repeat(64 * 1024 * 1024))
}

async fn write_lines(
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
    lines: &[String],
) -> std::io::Result<()> {
    let mut buf = String::new();
    for line in lines {
        buf.push_str(line);
        buf.push('\n');
    }
    writer.write_all(buf.as_bytes()).await
}

fn init_tracing() {
    // Ignore the error if another test already installed a subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("warn"))
        .with_test_writer()
        .try_init();
}

/// A trace hook that records every event as a string, e.g. `> GET /a` or `< E0:Ok`.
pub fn recording_hook() -> (TraceHook, Arc<Mutex<Vec<String>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let hook: TraceHook = Arc::new(move |event: TraceEvent<'_>| {
        let entry = match event {
            TraceEvent::Outgoing(line) => format!("> {line}"),
            TraceEvent::Incoming(line) => format!("< {line}"),
            TraceEvent::Unrecognized { line, .. } => format!("? {line}"),
        };
        sink.lock().unwrap().push(entry);
    });
    (hook, events)
}

/// A change callback that forwards every notification to a channel.
pub fn channel_callback() -> (ChangeCallback, mpsc::UnboundedReceiver<ChangeNotification>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: ChangeCallback = Arc::new(move |change: &ChangeNotification| {
        let _ = tx.send(change.clone());
    });
    (callback, rx)
}

/// Waits briefly for the next notification on `rx`.
pub async fn next_change(
    rx: &mut mpsc::UnboundedReceiver<ChangeNotification>,
) -> Option<ChangeNotification> {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .ok()
        .flatten()
}

/// Asserts that nothing arrives on `rx` for a short while.
pub async fn assert_no_change(rx: &mut mpsc::UnboundedReceiver<ChangeNotification>) {
    let outcome = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(outcome.is_err(), "unexpected change: {:?}", outcome);
}
