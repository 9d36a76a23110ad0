//! Wire protocol shared by the crier server and clients.
//!
//! Every unit on the wire is a typed length-value record: a 2-byte
//! big-endian type tag, a 2-byte big-endian payload length, and exactly
//! `length` payload bytes. The same framing is used over the TCP control
//! connection and inside discovery datagrams.

mod command;
mod error;
mod info;
mod record;
pub mod wire;

pub use command::{Command, Status};
pub use error::{ProtoError, Result};
pub use info::{GroupInfo, ServerInfo, GROUP_INFO_LEN, SERVER_INFO_LEN};
pub use record::{encode_record, parse_record, Record, RecordType};

/// Size of the record header on the wire (type + length).
pub const RECORD_HEADER_LEN: usize = 4;

/// Maximum length of a login, password, display name, or group name in bytes.
/// The original protocol reserves 32-byte buffers including the terminator.
pub const MAX_NAME_LEN: usize = 31;

/// Maximum length of a chat message in bytes.
pub const MAX_MESSAGE_LEN: usize = 1024;

/// Cap on a serialized active-user or group listing.
pub const MAX_LIST_LEN: usize = 1024;

/// Cap on a single HISTORY reply.
pub const MAX_HISTORY_LEN: usize = 8192;
