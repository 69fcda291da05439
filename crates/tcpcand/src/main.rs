//! tcpcand - CAN-over-TCP bridge daemon
//!
//! Server mode accepts one TCP peer and bridges it to a local CAN channel
//! (or just logs its frames). Client mode forwards a local CAN channel to a
//! remote server.
//!
//! # Usage
//!
//! ```bash
//! # Listen on port 29536 and bridge to vcan0
//! ./tcpcand server --port 29536 --channel vcan0
//!
//! # Forward can0 to that server, diagnostics responses only, newest value
//! # per identifier at most 100 times a second
//! ./tcpcand client --channel can0 --host 192.168.1.10 --port 29536 \
//!     --filter 0x7E8:0x7F8:std --unordered --rate-hz 100
//!
//! # Everything from a file
//! ./tcpcand --config tcpcand.toml client
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tcpcan_bus::{BusConfig, BusListener};
use tcpcan_client::{create_interface, CanFilter, ClientConfig, InterfaceKind, TcpClient};
use tcpcand::{serve, DaemonConfig, ServerConfig};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "tcpcand", version)]
#[command(about = "Bridge a CAN bus over a TCP connection")]
struct Args {
    /// Configuration file path (TOML format)
    /// If provided, overrides command-line options
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Accept one TCP peer and bridge it to a local CAN channel
    Server(ServerArgs),
    /// Forward a local CAN channel to a tcpcand server
    Client(ClientArgs),
}

#[derive(clap::Args, Debug)]
struct ServerArgs {
    /// Address to listen on
    #[arg(long = "host", default_value = "0.0.0.0")]
    hostname: String,

    /// TCP port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// CAN channel to bridge; frames are only logged when omitted
    #[arg(long)]
    channel: Option<String>,

    /// CAN interface implementation (socketcan, mock)
    #[arg(long, default_value = "socketcan")]
    interface: InterfaceKind,
}

#[derive(clap::Args, Debug)]
struct ClientArgs {
    /// CAN channel name
    #[arg(long, default_value = "vcan0")]
    channel: String,

    /// CAN interface implementation (socketcan, mock)
    #[arg(long, default_value = "socketcan")]
    interface: InterfaceKind,

    /// Server host
    #[arg(long = "host", default_value = "127.0.0.1")]
    hostname: String,

    /// Server port
    #[arg(short, long)]
    port: Option<u16>,

    /// Identifier filter in hex, may be repeated
    #[arg(long = "filter", value_name = "ID:MASK[:ext|std]")]
    filters: Vec<CanFilter>,

    /// Send only the newest pending frame per identifier
    #[arg(long)]
    unordered: bool,

    /// Flush frames to the server at most this often
    #[arg(long = "rate-hz")]
    rate_hz: Option<u32>,
}

impl ServerArgs {
    fn into_config(self, file: Option<DaemonConfig>) -> Result<ServerConfig> {
        if let Some(file) = file {
            return file.server.context("config file has no [server] section");
        }
        let port = self.port.context("--port is required without --config")?;
        Ok(ServerConfig {
            bus: BusConfig::new(self.hostname, port),
            channel: self.channel,
            interface: self.interface,
        })
    }
}

impl ClientArgs {
    fn into_config(self, file: Option<DaemonConfig>) -> Result<ClientConfig> {
        if let Some(file) = file {
            return file.client.context("config file has no [client] section");
        }
        let port = self.port.context("--port is required without --config")?;
        let mut config = ClientConfig::new(self.channel, self.hostname, port);
        config.interface = self.interface;
        config.filters = self.filters;
        config.use_unordered_map = self.unordered;
        config.limit_recv_rate_hz = self.rate_hz;
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose, args.json_logs);

    let file = match &args.config {
        Some(path) => {
            info!(path = %path.display(), "Loading config");
            Some(DaemonConfig::load(path)?)
        }
        None => None,
    };

    match args.mode {
        Mode::Server(server) => run_server(server.into_config(file)?).await,
        Mode::Client(client) => run_client(client.into_config(file)?).await,
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let default_filter = if verbose {
        "tcpcand=debug,tcpcan_bus=debug,tcpcan_client=debug"
    } else {
        "tcpcand=info,tcpcan_bus=info,tcpcan_client=info"
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

async fn run_server(config: ServerConfig) -> Result<()> {
    let interface = config
        .channel
        .as_deref()
        .map(|channel| create_interface(config.interface, channel, &[]))
        .transpose()?;

    let listener = BusListener::bind(config.bus).await?;
    let addr = listener.local_addr()?;
    info!(%addr, channel = ?config.channel, "Waiting for peer");
    info!("Press Ctrl+C to stop");

    let bus = tokio::select! {
        bus = listener.accept() => bus?,
        _ = shutdown_signal() => {
            info!("Stopped before a peer connected");
            return Ok(());
        }
    };
    info!(info = %bus.channel_info(), peer = %bus.peer_addr(), "Bus connected");

    serve(&bus, interface, shutdown_signal()).await;
    info!("tcpcand server stopped");
    Ok(())
}

async fn run_client(config: ClientConfig) -> Result<()> {
    let interface = create_interface(config.interface, &config.channel, &config.filters)?;
    let client = Arc::new(TcpClient::new(config, interface)?);

    let mut task = {
        let client = client.clone();
        tokio::spawn(async move { client.run().await })
    };

    let finished = tokio::select! {
        result = &mut task => Some(result),
        _ = shutdown_signal() => None,
    };
    let result = match finished {
        Some(result) => result?,
        None => {
            info!("Shutting down...");
            client.stop();
            task.await?
        }
    };

    let stats = result?;
    info!(
        can_to_tcp = stats.can_to_tcp,
        tcp_to_can = stats.tcp_to_can,
        "tcpcand client stopped"
    );
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(%e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(%e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
