//! UDP multicast discovery responder.
//!
//! Joins the configured multicast group and answers empty DISCOVER records
//! with a unicast SERVER_INFO carrying this host's outbound IPv4 address and
//! the TCP port. Malformed and non-DISCOVER datagrams are dropped silently;
//! socket errors are logged and the loop keeps running.

use crate::config::DiscoverySettings;
use crate::Result;
use crier_proto::{encode_record, parse_record, Record, RecordType, ServerInfo};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub async fn run(
    settings: DiscoverySettings,
    tcp_port: u16,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let socket = bind_multicast(&settings)?;

    info!(
        target: "crier::discovery",
        mcast = %settings.mcast_addr,
        port = settings.mcast_port,
        tcp_port,
        "Discovery responder listening"
    );

    let mut buf = [0u8; 256];
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!(target: "crier::discovery", "Shutdown signal received, stopping responder");
                return Ok(());
            }
            result = socket.recv_from(&mut buf) => {
                let (n, peer) = match result {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(target: "crier::discovery", error = %e, "recv_from failed");
                        continue;
                    }
                };

                if !is_discover_probe(&buf[..n]) {
                    debug!(target: "crier::discovery", peer = %peer, len = n, "Dropped non-DISCOVER datagram");
                    continue;
                }

                let addr = match outbound_ipv4().await {
                    Ok(addr) => addr,
                    Err(e) => {
                        warn!(target: "crier::discovery", error = %e, "Could not determine local address");
                        continue;
                    }
                };

                let reply = Record::new_server_info(&ServerInfo {
                    addr,
                    port: tcp_port,
                });
                if let Err(e) = socket.send_to(&encode_record(&reply), peer).await {
                    warn!(target: "crier::discovery", peer = %peer, error = %e, "Failed to send SERVER_INFO");
                    continue;
                }

                info!(target: "crier::discovery", peer = %peer, "Replied to discovery probe");
            }
        }
    }
}

/// Bind the multicast port with SO_REUSEADDR and join the group on all
/// interfaces.
fn bind_multicast(settings: &DiscoverySettings) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;

    let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, settings.mcast_port));
    socket.bind(&bind_addr.into())?;
    socket.join_multicast_v4(&settings.mcast_addr, &Ipv4Addr::UNSPECIFIED)?;

    Ok(UdpSocket::from_std(socket.into())?)
}

/// A valid probe is exactly one DISCOVER record with a zero-length payload.
fn is_discover_probe(datagram: &[u8]) -> bool {
    match parse_record(datagram) {
        Ok(Some((record, _))) => {
            record.kind() == Some(RecordType::Discover) && record.payload.is_empty()
        }
        _ => false,
    }
}

/// Local outbound IPv4 address, found by connecting a UDP socket toward a
/// public address and reading the bound local address. No packets are sent.
pub async fn outbound_ipv4() -> std::io::Result<Ipv4Addr> {
    let probe = UdpSocket::bind("0.0.0.0:0").await?;
    probe.connect("8.8.8.8:53").await?;
    match probe.local_addr()?.ip() {
        IpAddr::V4(addr) => Ok(addr),
        IpAddr::V6(_) => Err(std::io::Error::other("no outbound IPv4 address")),
    }
}
