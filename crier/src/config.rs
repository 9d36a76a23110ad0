use crate::{Result, ServerError};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address and port for client TCP control connections
    pub listen_addr: SocketAddr,
    /// Root directory for the users/, groups/, and history/ stores
    pub data_dir: PathBuf,
    #[serde(default)]
    pub discovery: DiscoverySettings,
    #[serde(default)]
    pub limits: LimitsSettings,
}

/// UDP multicast discovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverySettings {
    /// Respond to DISCOVER probes
    pub enabled: bool,
    /// Multicast group the responder joins
    pub mcast_addr: Ipv4Addr,
    /// UDP port the responder binds
    pub mcast_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsSettings {
    /// Byte cap on a single HISTORY reply
    #[serde(default = "default_history_reply_bytes")]
    pub history_reply_bytes: usize,
    /// Line cap when scanning a history log
    #[serde(default = "default_history_scan_lines")]
    pub history_scan_lines: usize,
    /// Byte cap on ACTIVE_USERS and GROUP_LIST replies
    #[serde(default = "default_list_reply_bytes")]
    pub list_reply_bytes: usize,
}

fn default_history_reply_bytes() -> usize {
    crier_proto::MAX_HISTORY_LEN
}

fn default_history_scan_lines() -> usize {
    1024
}

fn default_list_reply_bytes() -> usize {
    crier_proto::MAX_LIST_LEN
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 6000)),
            data_dir: PathBuf::from("/var/lib/crier"),
            discovery: DiscoverySettings::default(),
            limits: LimitsSettings::default(),
        }
    }
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            mcast_addr: Ipv4Addr::new(239, 0, 0, 1),
            mcast_port: 5000,
        }
    }
}

impl Default for LimitsSettings {
    fn default() -> Self {
        Self {
            history_reply_bytes: default_history_reply_bytes(),
            history_scan_lines: default_history_scan_lines(),
            list_reply_bytes: default_list_reply_bytes(),
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        match ext {
            "toml" => toml::from_str(&content)
                .map_err(|e| ServerError::Config(format!("TOML parse error: {}", e))),
            "json" => serde_json::from_str(&content)
                .map_err(|e| ServerError::Config(format!("JSON parse error: {}", e))),
            _ => Err(ServerError::Config(format!(
                "Unknown config file extension: {}",
                ext
            ))),
        }
    }

    pub fn users_dir(&self) -> PathBuf {
        self.data_dir.join("users")
    }

    pub fn groups_dir(&self) -> PathBuf {
        self.data_dir.join("groups")
    }

    pub fn history_dir(&self) -> PathBuf {
        self.data_dir.join("history")
    }
}
