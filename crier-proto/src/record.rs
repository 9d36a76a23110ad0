//! Record framing.
//!
//! Record header (4 bytes):
//! - Type: 2 bytes (big-endian)
//! - Length: 2 bytes (big-endian, payload length)
//!
//! A zero length is a valid record with an empty payload.

use crate::{
    Command, GroupInfo, ProtoError, Result, ServerInfo, Status, RECORD_HEADER_LEN,
};
use bytes::Bytes;

/// Record types carried in the header's type field.
///
/// Values are fixed for wire compatibility; 100+ is the discovery range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum RecordType {
    /// Login string
    Login = 1,
    /// Password string
    Password = 2,
    /// One 32-bit command code
    Command = 3,
    /// Message text
    Message = 4,
    /// Display-name string
    Username = 5,
    /// Group name string
    GroupName = 6,
    /// Fixed-width group descriptor
    GroupInfo = 7,
    /// Newline-separated group names
    GroupList = 8,
    /// Raw history log text
    History = 9,
    /// Newline-separated `<login> display` lines
    ActiveUsers = 10,
    /// One 32-bit status code
    Status = 11,
    /// One 16-bit big-endian integer
    Uint16 = 12,
    /// Discovery probe, empty payload
    Discover = 100,
    /// Discovery reply: IPv4 + TCP port
    ServerInfo = 101,
}

impl RecordType {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::Login),
            2 => Some(Self::Password),
            3 => Some(Self::Command),
            4 => Some(Self::Message),
            5 => Some(Self::Username),
            6 => Some(Self::GroupName),
            7 => Some(Self::GroupInfo),
            8 => Some(Self::GroupList),
            9 => Some(Self::History),
            10 => Some(Self::ActiveUsers),
            11 => Some(Self::Status),
            12 => Some(Self::Uint16),
            100 => Some(Self::Discover),
            101 => Some(Self::ServerInfo),
            _ => None,
        }
    }
}

/// A single record: raw type tag plus a move-owned payload.
///
/// The tag is kept raw so that unrecognized types can still be read off the
/// stream and skipped instead of aborting the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub record_type: u16,
    pub payload: Bytes,
}

impl Record {
    pub fn new(record_type: RecordType, payload: impl Into<Bytes>) -> Self {
        Self {
            record_type: record_type as u16,
            payload: payload.into(),
        }
    }

    /// Decoded record type, if the tag is one we know.
    pub fn kind(&self) -> Option<RecordType> {
        RecordType::from_u16(self.record_type)
    }

    pub fn is(&self, record_type: RecordType) -> bool {
        self.record_type == record_type as u16
    }

    pub fn new_login(login: &str) -> Self {
        Self::new(RecordType::Login, Bytes::copy_from_slice(login.as_bytes()))
    }

    pub fn new_password(password: &str) -> Self {
        Self::new(
            RecordType::Password,
            Bytes::copy_from_slice(password.as_bytes()),
        )
    }

    pub fn new_command(command: Command) -> Self {
        Self::new(
            RecordType::Command,
            Bytes::copy_from_slice(&(command as u32).to_be_bytes()),
        )
    }

    pub fn new_message(text: &str) -> Self {
        Self::new(RecordType::Message, Bytes::copy_from_slice(text.as_bytes()))
    }

    pub fn new_username(name: &str) -> Self {
        Self::new(RecordType::Username, Bytes::copy_from_slice(name.as_bytes()))
    }

    pub fn new_group_name(name: &str) -> Self {
        Self::new(
            RecordType::GroupName,
            Bytes::copy_from_slice(name.as_bytes()),
        )
    }

    pub fn new_group_info(info: &GroupInfo) -> Self {
        Self::new(RecordType::GroupInfo, info.encode())
    }

    pub fn new_group_list(listing: &str) -> Self {
        Self::new(
            RecordType::GroupList,
            Bytes::copy_from_slice(listing.as_bytes()),
        )
    }

    pub fn new_history(text: &str) -> Self {
        Self::new(RecordType::History, Bytes::copy_from_slice(text.as_bytes()))
    }

    pub fn new_active_users(listing: &str) -> Self {
        Self::new(
            RecordType::ActiveUsers,
            Bytes::copy_from_slice(listing.as_bytes()),
        )
    }

    pub fn new_status(status: Status) -> Self {
        Self::new(
            RecordType::Status,
            Bytes::copy_from_slice(&(status as u32).to_be_bytes()),
        )
    }

    pub fn new_uint16(value: u16) -> Self {
        Self::new(RecordType::Uint16, Bytes::copy_from_slice(&value.to_be_bytes()))
    }

    pub fn new_discover() -> Self {
        Self::new(RecordType::Discover, Bytes::new())
    }

    pub fn new_server_info(info: &ServerInfo) -> Self {
        Self::new(RecordType::ServerInfo, info.encode())
    }

    /// Payload as UTF-8 text.
    pub fn text(&self) -> Result<&str> {
        std::str::from_utf8(&self.payload).map_err(|_| ProtoError::InvalidUtf8)
    }

    /// Decode a COMMAND payload.
    pub fn command(&self) -> Result<Command> {
        let raw = self.payload_u32()?;
        Command::from_u32(raw).ok_or(ProtoError::UnknownCommand(raw))
    }

    /// Decode a STATUS payload.
    pub fn status(&self) -> Result<Status> {
        let raw = self.payload_u32()?;
        Status::from_u32(raw).ok_or(ProtoError::UnknownStatus(raw))
    }

    /// Decode a UINT16 payload.
    pub fn uint16(&self) -> Result<u16> {
        let p: &[u8] = &self.payload;
        if p.len() != 2 {
            return Err(ProtoError::InvalidPayload(format!(
                "expected 2-byte integer payload, got {} bytes",
                p.len()
            )));
        }
        Ok(u16::from_be_bytes([p[0], p[1]]))
    }

    pub fn group_info(&self) -> Result<GroupInfo> {
        GroupInfo::parse(&self.payload)
    }

    pub fn server_info(&self) -> Result<ServerInfo> {
        ServerInfo::parse(&self.payload)
    }

    fn payload_u32(&self) -> Result<u32> {
        let p: &[u8] = &self.payload;
        if p.len() != 4 {
            return Err(ProtoError::InvalidPayload(format!(
                "expected 4-byte integer payload, got {} bytes",
                p.len()
            )));
        }
        Ok(u32::from_be_bytes([p[0], p[1], p[2], p[3]]))
    }
}

/// Encode a record into a contiguous buffer, header first.
#[must_use]
pub fn encode_record(record: &Record) -> Vec<u8> {
    let mut buf = Vec::with_capacity(RECORD_HEADER_LEN + record.payload.len());
    buf.extend_from_slice(&record.record_type.to_be_bytes());
    buf.extend_from_slice(&(record.payload.len() as u16).to_be_bytes());
    buf.extend_from_slice(&record.payload);
    buf
}

/// Parse one record from the front of `buf`.
///
/// Returns `Ok(None)` when the buffer does not yet hold a complete record,
/// otherwise the record and the number of bytes consumed.
pub fn parse_record(buf: &[u8]) -> Result<Option<(Record, usize)>> {
    if buf.len() < RECORD_HEADER_LEN {
        return Ok(None);
    }

    let record_type = u16::from_be_bytes([buf[0], buf[1]]);
    let length = u16::from_be_bytes([buf[2], buf[3]]) as usize;
    let total = RECORD_HEADER_LEN + length;

    if buf.len() < total {
        return Ok(None);
    }

    let payload = if length > 0 {
        Bytes::copy_from_slice(&buf[RECORD_HEADER_LEN..total])
    } else {
        Bytes::new()
    };

    Ok(Some((
        Record {
            record_type,
            payload,
        },
        total,
    )))
}
