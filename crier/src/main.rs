#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use clap::Parser;
use crier::{config::Config, discovery, server, shutdown};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "crier")]
#[command(about = "crier - LAN chat server with multicast discovery and group fan-out")]
#[command(version)]
struct Args {
    /// TCP address for client control connections
    #[arg(short, long, default_value = "0.0.0.0:6000")]
    listen: SocketAddr,

    /// Multicast group for discovery probes
    #[arg(long, default_value = "239.0.0.1")]
    mcast_addr: Ipv4Addr,

    /// UDP port for discovery probes
    #[arg(long, default_value = "5000")]
    mcast_port: u16,

    /// Disable the discovery responder
    #[arg(long)]
    no_discovery: bool,

    /// Root directory for user, group, and history stores
    #[arg(short, long, default_value = "/var/lib/crier")]
    data_dir: PathBuf,

    /// Load settings from a TOML or JSON file instead of flags
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write a default config file to PATH and exit
    #[arg(long, value_name = "PATH")]
    gen_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Handle --gen-config before initializing tracing
    if let Some(path) = &args.gen_config {
        if let Err(e) = generate_config(path) {
            eprintln!("Failed to generate config: {}", e);
            std::process::exit(1);
        }
        println!("Generated default config at: {}", path.display());
        return;
    }

    init_tracing();

    let config = match &args.config {
        Some(path) => match Config::from_file(path) {
            Ok(c) => c,
            Err(e) => {
                error!(
                    target: "crier",
                    error = %e,
                    path = %path.display(),
                    "Failed to load config file"
                );
                std::process::exit(1);
            }
        },
        None => config_from_args(&args),
    };

    info!(
        target: "crier",
        listen = %config.listen_addr,
        mcast = %config.discovery.mcast_addr,
        mcast_port = config.discovery.mcast_port,
        data_dir = %config.data_dir.display(),
        "Starting crier v{}",
        env!("CARGO_PKG_VERSION")
    );

    if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
        error!(target: "crier", error = %e, "Failed to create data directory");
        std::process::exit(1);
    }

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let shutdown_signal = shutdown::install_signal_handlers(shutdown_tx.clone());

    if config.discovery.enabled {
        let settings = config.discovery.clone();
        let tcp_port = config.listen_addr.port();
        let discovery_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = discovery::run(settings, tcp_port, discovery_rx).await {
                error!(target: "crier", error = %e, "Discovery responder failed");
            }
        });
    }

    let server_handle = tokio::spawn(server::run(config, shutdown_tx.subscribe()));

    tokio::select! {
        _ = shutdown_signal => {
            info!(target: "crier", "Shutdown signal received");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!(target: "crier", "Server exited cleanly"),
                Ok(Err(e)) => {
                    error!(target: "crier", error = %e, "Server error");
                    std::process::exit(1);
                }
                Err(e) => {
                    error!(target: "crier", error = %e, "Server task panicked");
                    std::process::exit(1);
                }
            }
        }
    }

    info!(target: "crier", "crier shutdown complete");
}

fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,crier=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

fn config_from_args(args: &Args) -> Config {
    let mut config = Config {
        listen_addr: args.listen,
        data_dir: args.data_dir.clone(),
        ..Default::default()
    };
    config.discovery.enabled = !args.no_discovery;
    config.discovery.mcast_addr = args.mcast_addr;
    config.discovery.mcast_port = args.mcast_port;
    config
}

fn generate_config(path: &std::path::Path) -> std::io::Result<()> {
    let config = Config::default();

    let content = format!(
        r#"# crier configuration file
# Generated by: crier --gen-config {}
#
# All values shown are defaults. Uncomment and modify as needed.

# Address and port for client TCP control connections
listen_addr = "{}"

# Root directory for the users/, groups/, and history/ stores
data_dir = "{}"

[discovery]
# Respond to DISCOVER probes on the multicast group
enabled = {}

# Multicast group and UDP port the responder listens on
mcast_addr = "{}"
mcast_port = {}

[limits]
# Byte cap on a single HISTORY reply
history_reply_bytes = {}

# Line cap when scanning a history log
history_scan_lines = {}

# Byte cap on ACTIVE_USERS and GROUP_LIST replies
list_reply_bytes = {}
"#,
        path.display(),
        config.listen_addr,
        config.data_dir.display(),
        config.discovery.enabled,
        config.discovery.mcast_addr,
        config.discovery.mcast_port,
        config.limits.history_reply_bytes,
        config.limits.history_scan_lines,
        config.limits.list_reply_bytes,
    );

    std::fs::write(path, content)
}
