// src/main.rs

//! The entry point for the `mprotocol` command-line client.

use anyhow::{Context, Result, anyhow};
use mprotocol_client::{
    ChangeCallback, ChangeNotification, Client, ClientConfig, ConnectionState, Payload,
    ProtocolResult,
};
use std::env;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::filter::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "mprotocol.toml";
const USAGE: &str = "Usage: mprotocol [--config FILE] [--host HOST] [--port PORT] \
                     [--timeout MILLIS] (COMMAND... | --watch NODE)";
const WATCH_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// What the invocation asked for.
enum Action {
    /// Send one command and print its result.
    Command(String),
    /// Print every change of a node until interrupted.
    Watch(String),
}

struct Invocation {
    config: ClientConfig,
    action: Action,
}

impl Invocation {
    fn parse(args: &[String]) -> Result<Self> {
        let mut config_path: Option<&str> = None;
        let mut host: Option<&str> = None;
        let mut port: Option<u16> = None;
        let mut timeout: Option<Duration> = None;
        let mut watch: Option<&str> = None;
        let mut words: Vec<&str> = Vec::new();

        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            let mut value = |flag: &str| {
                iter.next()
                    .map(String::as_str)
                    .ok_or_else(|| anyhow!("{flag} flag requires a value"))
            };
            match arg.as_str() {
                "--config" => config_path = Some(value("--config")?),
                "--host" => host = Some(value("--host")?),
                "--port" => {
                    let raw = value("--port")?;
                    port = Some(
                        raw.parse()
                            .map_err(|_| anyhow!("Invalid port number: {raw}"))?,
                    );
                }
                "--timeout" => {
                    let raw = value("--timeout")?;
                    let millis: u64 = raw
                        .parse()
                        .map_err(|_| anyhow!("Invalid timeout in milliseconds: {raw}"))?;
                    timeout = Some(Duration::from_millis(millis));
                }
                "--watch" => watch = Some(value("--watch")?),
                _ => words.push(arg.as_str()),
            }
        }

        // An explicit --config must load; the default file is optional.
        let mut config = match config_path {
            Some(path) => ClientConfig::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                ClientConfig::from_file(DEFAULT_CONFIG_PATH)?
            }
            None => ClientConfig::default(),
        };
        if let Some(host) = host {
            config.host = host.to_string();
        }
        if let Some(port) = port {
            config.port = port;
        }
        if let Some(timeout) = timeout {
            config.request_timeout = timeout;
        }
        config.validate()?;

        let action = match (watch, words.is_empty()) {
            (Some(node), true) => Action::Watch(node.to_string()),
            (Some(_), false) => return Err(anyhow!("--watch cannot be combined with a command")),
            (None, false) => Action::Command(words.join(" ")),
            (None, true) => return Err(anyhow!("No command given")),
        };

        Ok(Self { config, action })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    const VERSION: &str = env!("MPROTOCOL_VERSION");

    let args: Vec<String> = env::args().skip(1).collect();

    if args.iter().any(|arg| arg == "--version") {
        println!("mprotocol version {VERSION}");
        return Ok(());
    }
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        println!("{USAGE}");
        return Ok(());
    }

    let invocation = match Invocation::parse(&args) {
        Ok(invocation) => invocation,
        Err(e) => {
            eprintln!("{e:#}");
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    };

    // Get the log level from the env var or the config.
    let log_level =
        env::var("RUST_LOG").unwrap_or_else(|_| invocation.config.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .with_writer(std::io::stderr)
        .compact()
        .with_ansi(true)
        .init();

    let client = Client::open(invocation.config.clone())
        .await
        .with_context(|| format!("Failed to connect to {}", invocation.config.address()))?;

    let outcome = match &invocation.action {
        Action::Command(command) => run_command(&client, command).await,
        Action::Watch(node_path) => watch(&client, node_path).await,
    };
    client.close();

    if let Err(e) = outcome {
        error!("{:#}", e);
        return Err(e);
    }
    Ok(())
}

async fn run_command(client: &Client, command: &str) -> Result<()> {
    let result = client.send_sync(command).await?;
    print_result(&result);
    if !result.is_ok() {
        return Err(anyhow!("'{command}' was rejected: {result}"));
    }
    Ok(())
}

fn print_result(result: &ProtocolResult) {
    println!("{result}");
    match result.payload() {
        Payload::None => {}
        Payload::Text(text) => println!("{text}"),
        Payload::Property { kind, value } => println!("{value} ({kind})"),
        Payload::Lines(lines) => {
            for line in lines {
                println!("  {line}");
            }
        }
    }
}

async fn watch(client: &Client, node_path: &str) -> Result<()> {
    let callback: ChangeCallback = Arc::new(|change: &ChangeNotification| {
        println!("{}.{}={}", change.node_path, change.property, change.value);
    });
    client
        .add_subscription(Arc::clone(&callback), node_path, None)
        .await?;
    info!("Watching {} (Ctrl-C to stop)", node_path);

    let mut poll = tokio::time::interval(WATCH_POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = poll.tick() => {
                if client.state() != ConnectionState::Connected {
                    return Err(anyhow!("Connection to {} was lost", client.config().address()));
                }
            }
        }
    }

    client
        .remove_subscription(&callback, node_path, None)
        .await?;
    Ok(())
}
