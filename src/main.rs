use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use chordal::{spawn_server, Key, Peer, PeerConfig, RpcClient};

#[derive(Parser, Debug)]
#[command(name = "chordal")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on. The peer's ring identifier is the hash of
    /// this endpoint, so it must be the address other peers dial.
    #[arg(short, long, default_value = "127.0.0.1:5055")]
    bind: SocketAddr,

    /// Endpoint of any member of an existing chord. Without it, this peer
    /// starts a chord of its own.
    #[arg(short, long, value_name = "HOST:PORT")]
    join: Option<String>,

    /// Seconds between maintenance ticks.
    #[arg(short, long, default_value = "10")]
    maintenance_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let listener = TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("binding {}", args.bind))?;
    let ip = args.bind.ip().to_string();
    let port = args.bind.port();

    let network = RpcClient::new(Key::from_plaintext(&format!("{ip}:{port}")));
    let config = PeerConfig {
        maintenance_interval: Duration::from_secs(args.maintenance_interval),
    };
    let peer = Peer::new(&ip, port, network, config);
    info!("peer {} listening on {}", peer.id(), peer.endpoint());

    spawn_server(peer.clone(), listener).await;

    match &args.join {
        Some(gateway) => peer.join(gateway).await?,
        None => peer.start_chord().await?,
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, leaving the chord");
    peer.leave().await?;
    Ok(())
}
