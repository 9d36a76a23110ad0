//! Persistent groups, one file per group name.
//!
//! File format:
//! ```text
//! id=<u32>
//! mcast=<dotted-quad>
//! port=<u16>
//! <member1>
//! <member2>
//! ...
//! ```
//! The first member is the creator. Membership is append-only; there is no
//! leave operation server-side.

use crate::{Result, ServerError};
use crier_proto::GroupInfo;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::info;

/// Result of a join attempt.
#[derive(Debug)]
pub enum JoinOutcome {
    Joined(GroupInfo),
    AlreadyMember,
    NotFound,
}

pub struct GroupStore {
    dir: PathBuf,
    /// The group mutex: every read and write of group files goes through it.
    lock: Mutex<()>,
}

impl GroupStore {
    pub fn new(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    pub async fn exists(&self, name: &str) -> bool {
        let _guard = self.lock.lock().await;
        self.path(name).exists()
    }

    /// Create a group with the next free id and the creator as sole member.
    /// Refuses a name collision.
    pub async fn create(&self, name: &str, creator: &str) -> Result<GroupInfo> {
        let _guard = self.lock.lock().await;

        let path = self.path(name);
        if path.exists() {
            return Err(ServerError::Store(format!("group '{}' already exists", name)));
        }

        let id = self.scan_next_id()?;
        let (mcast_addr, mcast_port) = derive_endpoint(id);
        let group = GroupInfo {
            name: name.to_string(),
            mcast_addr,
            mcast_port,
            id,
        };

        std::fs::write(
            &path,
            format!(
                "id={}\nmcast={}\nport={}\n{}\n",
                group.id, group.mcast_addr, group.mcast_port, creator
            ),
        )?;

        info!(
            target: "crier::store",
            group = name,
            id,
            mcast = %mcast_addr,
            port = mcast_port,
            "Created group"
        );
        Ok(group)
    }

    pub async fn info(&self, name: &str) -> Result<Option<GroupInfo>> {
        let _guard = self.lock.lock().await;
        self.read_group(name).map(|g| g.map(|(info, _)| info))
    }

    pub async fn has_member(&self, name: &str, login: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        match self.read_group(name)? {
            Some((_, members)) => Ok(members.iter().any(|m| m == login)),
            None => Ok(false),
        }
    }

    /// Group info plus the sender's membership in one critical region.
    pub async fn membership(&self, name: &str, login: &str) -> Result<Option<(GroupInfo, bool)>> {
        let _guard = self.lock.lock().await;
        match self.read_group(name)? {
            Some((group, members)) => {
                let is_member = members.iter().any(|m| m == login);
                Ok(Some((group, is_member)))
            }
            None => Ok(None),
        }
    }

    /// Append a member. No-op if already present.
    pub async fn join(&self, name: &str, login: &str) -> Result<JoinOutcome> {
        let _guard = self.lock.lock().await;

        let (group, members) = match self.read_group(name)? {
            Some(g) => g,
            None => return Ok(JoinOutcome::NotFound),
        };

        if members.iter().any(|m| m == login) {
            return Ok(JoinOutcome::AlreadyMember);
        }

        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(self.path(name))?;
        writeln!(file, "{}", login)?;

        info!(target: "crier::store", group = name, login, "Joined group");
        Ok(JoinOutcome::Joined(group))
    }

    /// Newline-separated group names, stopping before `cap` bytes would be
    /// exceeded. Sorted for a stable listing.
    pub async fn list(&self, cap: usize) -> Result<String> {
        let _guard = self.lock.lock().await;

        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();

        let mut out = String::new();
        for name in names {
            if out.len() + name.len() + 1 > cap {
                break;
            }
            out.push_str(&name);
            out.push('\n');
        }
        Ok(out)
    }

    /// Every group this login belongs to, in name order.
    pub async fn groups_of(&self, login: &str) -> Result<Vec<GroupInfo>> {
        let _guard = self.lock.lock().await;

        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();

        let mut groups = Vec::new();
        for name in names {
            // Skip malformed files rather than failing the whole enumeration.
            if let Ok(Some((group, members))) = self.read_group(&name) {
                if members.iter().any(|m| m == login) {
                    groups.push(group);
                }
            }
        }
        Ok(groups)
    }

    /// Max persisted id + 1; 1 for an empty directory. Caller holds the lock.
    fn scan_next_id(&self) -> Result<u32> {
        let mut max_id = 0u32;
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with('.') {
                continue;
            }
            // A malformed file must not block id allocation.
            if let Ok(Some((info, _))) = self.read_group(name) {
                max_id = max_id.max(info.id);
            }
        }
        Ok(max_id + 1)
    }

    /// Parse one group file. Caller holds the lock.
    fn read_group(&self, name: &str) -> Result<Option<(GroupInfo, Vec<String>)>> {
        let path = self.path(name);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut id = None;
        let mut mcast_addr = None;
        let mut mcast_port = None;
        let mut members = Vec::new();

        for line in content.lines() {
            if let Some(value) = line.strip_prefix("id=") {
                id = value.parse::<u32>().ok();
            } else if let Some(value) = line.strip_prefix("mcast=") {
                mcast_addr = value.parse::<Ipv4Addr>().ok();
            } else if let Some(value) = line.strip_prefix("port=") {
                mcast_port = value.parse::<u16>().ok();
            } else if !line.is_empty() {
                members.push(line.to_string());
            }
        }

        match (id, mcast_addr, mcast_port) {
            (Some(id), Some(mcast_addr), Some(mcast_port)) => Ok(Some((
                GroupInfo {
                    name: name.to_string(),
                    mcast_addr,
                    mcast_port,
                    id,
                },
                members,
            ))),
            _ => Err(ServerError::Store(format!(
                "malformed group file {}",
                path.display()
            ))),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Multicast endpoint for a group id: `239.0.0.<1+id>` on port `7000+id`.
fn derive_endpoint(id: u32) -> (Ipv4Addr, u16) {
    (
        Ipv4Addr::new(239, 0, 0, (1 + id) as u8),
        7000 + id as u16,
    )
}
