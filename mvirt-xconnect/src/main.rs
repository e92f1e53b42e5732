//! mvirt-xconnect: builds the dataplane configuration for one connection and
//! commits it to the dataplane agent.
//!
//! `request` reads a JSON connection request and prints the resulting
//! connection. `close` reads a JSON connection and deletes its configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use mvirt_xconnect::agent::GrpcConfigAgent;
use mvirt_xconnect::mechanisms::KernelTemplate;
use mvirt_xconnect::pipeline::{FixedPeer, close_incoming};
use mvirt_xconnect::{
    ChainBuilder, Connection, ConnectionRequest, Endpoint, Mechanism, Role, Terminal,
    XconnectConfig,
};
use serde::de::DeserializeOwned;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// mvirt dataplane cross-connect tool
#[derive(Parser, Debug)]
#[command(name = "mvirt-xconnect", version, about)]
struct Args {
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Dataplane agent endpoint (overrides the config file)
    #[arg(long)]
    agent_endpoint: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build and commit the configuration for a new connection
    Request(CallArgs),
    /// Delete the configuration of an existing connection
    Close(CallArgs),
}

#[derive(clap::Args, Debug)]
struct CallArgs {
    /// Role of this dataplane in the connection
    #[arg(long, value_enum, default_value_t = Mode::Endpoint)]
    mode: Mode,

    /// JSON file with the connection request (request) or connection (close)
    #[arg(long)]
    connection: PathBuf,

    /// JSON file with the mechanism agreed with the next hop (forwarder only)
    #[arg(long)]
    peer_mechanism: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Mode {
    Endpoint,
    Forwarder,
}

impl From<Mode> for Role {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Endpoint => Role::Endpoint,
            Mode::Forwarder => Role::Forwarder,
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mvirt_xconnect=info,tonic=warn,tower=warn,hyper=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => XconnectConfig::load(path)?,
        None => XconnectConfig::default(),
    };
    if let Some(endpoint) = args.agent_endpoint {
        config.agent_endpoint = endpoint;
    }

    let template = KernelTemplate::detect(&config.fast_path_device);
    info!(agent = %config.agent_endpoint, ?template, "Starting mvirt-xconnect");

    let agent = GrpcConfigAgent::connect_lazy(&config.agent_endpoint)
        .with_context(|| format!("invalid agent endpoint {}", config.agent_endpoint))?;
    let builder = ChainBuilder::new(&config, Arc::new(agent), template);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received SIGINT, cancelling");
            on_signal.cancel();
        }
    });

    let (Command::Request(call) | Command::Close(call)) = &args.command;
    let tail: Arc<dyn Endpoint> = match &call.peer_mechanism {
        Some(path) => Arc::new(FixedPeer::new(read_json::<Mechanism>(path)?)),
        None => Arc::new(Terminal),
    };
    let chain = builder.build(call.mode.into(), tail);

    let conn = match &args.command {
        Command::Request(call) => {
            let request: ConnectionRequest = read_json(&call.connection)?;
            chain
                .request(request, cancel)
                .await
                .context("connection request failed")?
        }
        Command::Close(call) => {
            let mut conn: Connection = read_json(&call.connection)?;
            close_incoming(&chain, &mut conn, cancel)
                .await
                .context("connection close failed")?;
            conn
        }
    };

    println!("{}", serde_json::to_string_pretty(&conn)?);
    Ok(())
}
