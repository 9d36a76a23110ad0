//! Group message fan-out.
//!
//! Each send uses a transient UDP socket addressed to the group's multicast
//! endpoint. No TTL or loopback options are set; system defaults apply.

use crier_proto::GroupInfo;
use tokio::net::UdpSocket;

/// Plain-text line carried in the datagram and shown by receiving clients.
pub fn format_line(group: &str, sender_login: &str, sender_display: &str, message: &str) -> String {
    format!("[{}] <{}> {} : {}", group, sender_login, sender_display, message)
}

/// Fan one line out to the group's multicast address.
pub async fn send(group: &GroupInfo, line: &str) -> std::io::Result<()> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket
        .send_to(line.as_bytes(), (group.mcast_addr, group.mcast_port))
        .await?;
    Ok(())
}
