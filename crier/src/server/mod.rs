//! Server orchestration: shared state, TCP listener, accept loop.

mod commands;
mod connection;
pub mod groupcast;

pub use connection::handle_session;

use crate::config::Config;
use crate::sessions::SessionRegistry;
use crate::store::{GroupStore, HistoryStore, UserStore};
use crate::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace};

/// Listen backlog for the control socket.
const BACKLOG: u32 = 10;

/// Everything the session workers share: the session registry and the three
/// file-backed stores, each carrying its own locking discipline.
pub struct ServerContext {
    pub sessions: SessionRegistry,
    pub users: UserStore,
    pub groups: GroupStore,
    pub history: HistoryStore,
    /// Byte cap on ACTIVE_USERS and GROUP_LIST replies.
    pub list_reply_bytes: usize,
}

impl ServerContext {
    pub fn new(config: &Config) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        Ok(Self {
            sessions: SessionRegistry::new(),
            users: UserStore::new(config.users_dir())?,
            groups: GroupStore::new(config.groups_dir())?,
            history: HistoryStore::new(
                config.history_dir(),
                config.limits.history_scan_lines,
                config.limits.history_reply_bytes,
            )?,
            list_reply_bytes: config.limits.list_reply_bytes,
        })
    }
}

/// Bind the control socket with SO_REUSEADDR and a backlog of 10.
pub fn bind(addr: SocketAddr) -> Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    Ok(socket.listen(BACKLOG)?)
}

/// Bind and serve until shutdown.
pub async fn run(config: Config, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
    let listener = bind(config.listen_addr)?;
    serve(listener, config, shutdown_rx).await
}

/// Accept loop over an already-bound listener. One spawned worker per
/// connection; the acceptor never blocks on session work.
pub async fn serve(
    listener: TcpListener,
    config: Config,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let ctx = Arc::new(ServerContext::new(&config)?);

    info!(
        target: "crier::server",
        addr = %listener.local_addr()?,
        data_dir = %config.data_dir.display(),
        "Listening for connections"
    );

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer)) => {
                        let _ = stream.set_nodelay(true);
                        trace!(target: "crier::server", peer = %peer, "Connection accepted");

                        let ctx = Arc::clone(&ctx);
                        tokio::spawn(async move {
                            if let Err(e) = handle_session(stream, peer, ctx).await {
                                debug!(target: "crier::server", peer = %peer, error = %e, "Session ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(target: "crier::server", error = %e, "Accept failed");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!(target: "crier::server", "Shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    info!(target: "crier::server", "Server shutdown complete");
    Ok(())
}
