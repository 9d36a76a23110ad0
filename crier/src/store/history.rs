//! Append-only history logs.
//!
//! Direct conversations share one file named `min(a,b)_max(a,b)` so both
//! directions land in the same log; group logs are named after the group.
//! Lines are `YYYY-MM-DD HH:MM:SS <login> display : message`.

use crate::Result;
use chrono::Local;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub struct HistoryStore {
    dir: PathBuf,
    /// The history mutex: every append and read goes through it.
    lock: Mutex<()>,
    /// Line cap when scanning a log into memory.
    scan_lines: usize,
    /// Byte cap on a reply.
    reply_bytes: usize,
}

impl HistoryStore {
    pub fn new(dir: PathBuf, scan_lines: usize, reply_bytes: usize) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            lock: Mutex::new(()),
            scan_lines,
            reply_bytes,
        })
    }

    /// Log file name shared by both directions of a direct conversation.
    pub fn direct_file_name(a: &str, b: &str) -> String {
        if a < b {
            format!("{}_{}", a, b)
        } else {
            format!("{}_{}", b, a)
        }
    }

    /// Append one direct-message line under the history mutex.
    pub async fn append_direct(
        &self,
        sender_login: &str,
        sender_display: &str,
        peer_login: &str,
        message: &str,
    ) -> Result<()> {
        let file = Self::direct_file_name(sender_login, peer_login);
        self.append(&file, sender_login, sender_display, message)
            .await
    }

    /// Append one group-message line under the history mutex.
    pub async fn append_group(
        &self,
        group: &str,
        sender_login: &str,
        sender_display: &str,
        message: &str,
    ) -> Result<()> {
        self.append(group, sender_login, sender_display, message)
            .await
    }

    async fn append(
        &self,
        file_name: &str,
        sender_login: &str,
        sender_display: &str,
        message: &str,
    ) -> Result<()> {
        let _guard = self.lock.lock().await;

        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(file_name))?;

        let timestamp = Local::now().format(TIMESTAMP_FORMAT);
        writeln!(
            file,
            "{} <{}> {} : {}",
            timestamp, sender_login, sender_display, message
        )?;
        Ok(())
    }

    /// Read a log's tail.
    ///
    /// Scans the newest `scan_lines` lines, keeps the last `max_lines` of
    /// those when `max_lines > 0`, and concatenates subject to the reply byte
    /// cap; a line that would overflow the cap is dropped whole. Returns None
    /// when the log cannot be opened.
    pub async fn read(&self, file_name: &str, max_lines: u16) -> Result<Option<String>> {
        let _guard = self.lock.lock().await;

        let content = match std::fs::read_to_string(self.path(file_name)) {
            Ok(c) => c,
            Err(_) => return Ok(None),
        };

        let mut window: VecDeque<&str> = VecDeque::with_capacity(self.scan_lines.min(64));
        for line in content.lines() {
            if window.len() == self.scan_lines {
                window.pop_front();
            }
            window.push_back(line);
        }

        if max_lines > 0 {
            while window.len() > max_lines as usize {
                window.pop_front();
            }
        }

        let mut out = String::new();
        for line in window {
            if out.len() + line.len() + 1 > self.reply_bytes {
                break;
            }
            out.push_str(line);
            out.push('\n');
        }
        Ok(Some(out))
    }

    fn path(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
