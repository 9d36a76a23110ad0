//! Server discovery and client-side multicast membership.

use crate::{ClientError, Result};
use crier_proto::{encode_record, parse_record, GroupInfo, Record, RecordType};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::debug;

/// Locate the server by sending a DISCOVER record to the discovery multicast
/// group and waiting for a unicast SERVER_INFO reply.
pub async fn discover(
    mcast_addr: Ipv4Addr,
    mcast_port: u16,
    timeout: Duration,
) -> Result<SocketAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;

    let probe = encode_record(&Record::new_discover());
    socket.send_to(&probe, (mcast_addr, mcast_port)).await?;
    debug!(mcast = %mcast_addr, port = mcast_port, "Sent discovery probe");

    let mut buf = [0u8; 256];
    let (n, from) = tokio::time::timeout(timeout, socket.recv_from(&mut buf))
        .await
        .map_err(|_| ClientError::Timeout)??;

    let (record, _) = parse_record(&buf[..n])?
        .ok_or_else(|| ClientError::Protocol("truncated discovery reply".to_string()))?;

    if record.kind() != Some(RecordType::ServerInfo) {
        return Err(ClientError::UnexpectedRecord(format!(
            "expected SERVER_INFO, got type {}",
            record.record_type
        )));
    }

    let info = record.server_info()?;
    debug!(server = %info.addr, port = info.port, from = %from, "Server discovered");
    Ok(SocketAddr::from((info.addr, info.port)))
}

/// Bind a UDP socket on the group's port and join its multicast address so
/// group messages can be received. Leaving the group is dropping the socket.
pub fn join_group_socket(group: &GroupInfo) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;

    let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, group.mcast_port));
    socket.bind(&bind_addr.into())?;
    socket.join_multicast_v4(&group.mcast_addr, &Ipv4Addr::UNSPECIFIED)?;

    Ok(UdpSocket::from_std(socket.into())?)
}
