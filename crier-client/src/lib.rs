//! Programmatic client for the crier LAN chat service.
//!
//! Covers the full wire contract: UDP multicast discovery, the TCP command
//! protocol, server-pushed direct messages, and client-side multicast group
//! membership. The interactive terminal front-end lives elsewhere; this
//! crate is what it (and the integration tests) drive.

mod client;
mod discover;
mod error;

pub use client::{ChatClient, ClientConfig, DirectMessage};
pub use discover::{discover, join_group_socket};
pub use error::{ClientError, Result};

pub use crier_proto::{GroupInfo, ServerInfo, Status};
