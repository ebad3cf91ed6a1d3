// Exhibit hub
// Bridges interactive clients, the backlog and the robots on the bus

use anyhow::Context;
use clap::Parser;
use exhibit_core::{HubConfig, LoggingConfig};
use std::net::{IpAddr, UdpSocket};
use std::path::PathBuf;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "exhibit-hub")]
#[command(about = "Real-time control hub for exhibit robots", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (TOML or JSON)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Client endpoint port
    #[arg(long, short)]
    port: Option<u16>,

    /// Bus broker host
    #[arg(long)]
    broker: Option<String>,

    #[arg(long)]
    log_level: Option<String>,

    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn apply(&self, config: &mut HubConfig) {
        if let Some(port) = self.port {
            config.network.ws_port = port;
        }
        if let Some(broker) = &self.broker {
            config.bus.host = broker.clone();
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if self.json_logs {
            config.logging.json = true;
        }
    }
}

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Address other machines on the LAN can reach us at; no packet is sent
fn lan_address() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}

fn print_banner(config: &HubConfig, port: u16) {
    let host = lan_address()
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "localhost".to_string());
    println!();
    println!("  exhibit-hub {}", env!("CARGO_PKG_VERSION"));
    println!("  clients  ws://{}:{}/ws", host, port);
    println!("  broker   {}:{}", config.bus.host, config.bus.port);
    println!("  robot    {}", config.robots.default_target);
    println!();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = HubConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    cli.apply(&mut config);
    config.validate().context("invalid configuration")?;

    init_logging(&config.logging);

    let hub = exhibit_server::hub::start(config.clone())
        .await
        .context("failed to start hub")?;
    print_banner(&config, hub.local_addr().port());
    info!("Hub ready on {}", hub.local_addr());

    wait_for_shutdown().await;
    hub.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
