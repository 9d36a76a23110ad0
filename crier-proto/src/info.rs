//! Fixed-width payload codecs for GROUP_INFO and SERVER_INFO records.

use crate::{ProtoError, Result};
use bytes::Bytes;
use std::net::Ipv4Addr;

/// GROUP_INFO payload: name[32] || mcast_ip[16] || mcast_port (u16 BE) ||
/// id (u32 BE), packed. Text fields are NUL-padded.
pub const GROUP_INFO_LEN: usize = 54;

const NAME_FIELD: usize = 32;
const IP_FIELD: usize = 16;

/// Group descriptor sent to clients so they can join the group's
/// multicast address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInfo {
    pub name: String,
    pub mcast_addr: Ipv4Addr,
    pub mcast_port: u16,
    pub id: u32,
}

impl GroupInfo {
    pub fn encode(&self) -> Bytes {
        let mut buf = vec![0u8; GROUP_INFO_LEN];
        let name = self.name.as_bytes();
        let n = name.len().min(NAME_FIELD - 1);
        buf[..n].copy_from_slice(&name[..n]);

        let ip = self.mcast_addr.to_string();
        let ip = ip.as_bytes();
        let n = ip.len().min(IP_FIELD - 1);
        buf[NAME_FIELD..NAME_FIELD + n].copy_from_slice(&ip[..n]);

        buf[48..50].copy_from_slice(&self.mcast_port.to_be_bytes());
        buf[50..54].copy_from_slice(&self.id.to_be_bytes());
        Bytes::from(buf)
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() != GROUP_INFO_LEN {
            return Err(ProtoError::InvalidPayload(format!(
                "group info payload must be {} bytes, got {}",
                GROUP_INFO_LEN,
                buf.len()
            )));
        }

        let name = field_str(&buf[..NAME_FIELD])?;
        let ip_str = field_str(&buf[NAME_FIELD..NAME_FIELD + IP_FIELD])?;
        let mcast_addr: Ipv4Addr = ip_str
            .parse()
            .map_err(|_| ProtoError::InvalidPayload(format!("bad multicast address {ip_str:?}")))?;
        let mcast_port = u16::from_be_bytes([buf[48], buf[49]]);
        let id = u32::from_be_bytes([buf[50], buf[51], buf[52], buf[53]]);

        Ok(Self {
            name: name.to_string(),
            mcast_addr,
            mcast_port,
            id,
        })
    }
}

/// SERVER_INFO payload: IPv4 address (4 bytes, network order) plus TCP port
/// (u16, network order).
pub const SERVER_INFO_LEN: usize = 6;

/// Discovery reply telling a client where the TCP endpoint lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerInfo {
    pub addr: Ipv4Addr,
    pub port: u16,
}

impl ServerInfo {
    pub fn encode(&self) -> Bytes {
        let mut buf = [0u8; SERVER_INFO_LEN];
        buf[..4].copy_from_slice(&self.addr.octets());
        buf[4..6].copy_from_slice(&self.port.to_be_bytes());
        Bytes::copy_from_slice(&buf)
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() != SERVER_INFO_LEN {
            return Err(ProtoError::InvalidPayload(format!(
                "server info payload must be {} bytes, got {}",
                SERVER_INFO_LEN,
                buf.len()
            )));
        }
        Ok(Self {
            addr: Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]),
            port: u16::from_be_bytes([buf[4], buf[5]]),
        })
    }
}

/// NUL-padded fixed field to &str.
fn field_str(field: &[u8]) -> Result<&str> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    std::str::from_utf8(&field[..end]).map_err(|_| ProtoError::InvalidUtf8)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_group_info_roundtrip() {
        let info = GroupInfo {
            name: "devs".to_string(),
            mcast_addr: Ipv4Addr::new(239, 0, 0, 2),
            mcast_port: 7001,
            id: 1,
        };

        let encoded = info.encode();
        assert_eq!(encoded.len(), GROUP_INFO_LEN);

        let parsed = GroupInfo::parse(&encoded).unwrap();
        assert_eq!(parsed, info);
    }

    #[test]
    fn test_group_info_field_offsets() {
        let info = GroupInfo {
            name: "g".to_string(),
            mcast_addr: Ipv4Addr::new(239, 0, 0, 5),
            mcast_port: 7004,
            id: 4,
        };
        let encoded = info.encode();

        assert_eq!(&encoded[..2], b"g\0");
        assert_eq!(&encoded[32..41], b"239.0.0.5");
        assert_eq!(&encoded[48..50], &7004u16.to_be_bytes());
        assert_eq!(&encoded[50..54], &4u32.to_be_bytes());
    }

    #[test]
    fn test_group_info_wrong_length() {
        assert!(GroupInfo::parse(&[0u8; GROUP_INFO_LEN - 1]).is_err());
        assert!(GroupInfo::parse(&[0u8; GROUP_INFO_LEN + 1]).is_err());
    }

    #[test]
    fn test_server_info_roundtrip() {
        let info = ServerInfo {
            addr: Ipv4Addr::new(192, 168, 1, 17),
            port: 6000,
        };

        let encoded = info.encode();
        assert_eq!(encoded.len(), SERVER_INFO_LEN);
        assert_eq!(&encoded[..4], &[192, 168, 1, 17]);
        assert_eq!(&encoded[4..6], &6000u16.to_be_bytes());

        let parsed = ServerInfo::parse(&encoded).unwrap();
        assert_eq!(parsed, info);
    }

    #[test]
    fn test_server_info_wrong_length() {
        assert!(ServerInfo::parse(&[0u8; 5]).is_err());
    }
}
