//! Persistent user accounts, one file per login.
//!
//! File format:
//! ```text
//! password=<value>
//! username=<value>
//! ```
//! The login is the file name; it never appears inside the file.

use crate::{Result, ServerError};
use std::path::{Path, PathBuf};
use tracing::info;

pub struct UserStore {
    dir: PathBuf,
}

/// Parsed contents of one account file.
struct UserRecord {
    password: String,
    username: String,
}

impl UserStore {
    pub fn new(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn exists(&self, login: &str) -> bool {
        self.path(login).exists()
    }

    /// Create a new account. Refuses to overwrite an existing login.
    pub fn create(&self, login: &str, password: &str, username: &str) -> Result<()> {
        let path = self.path(login);
        if path.exists() {
            return Err(ServerError::Store(format!(
                "account '{}' already exists",
                login
            )));
        }

        write_record(
            &path,
            &UserRecord {
                password: password.to_string(),
                username: username.to_string(),
            },
        )?;

        info!(target: "crier::store", login, "Created account");
        Ok(())
    }

    /// Check credentials. Returns the stored display name on a match, None on
    /// a wrong password or missing account.
    pub fn authenticate(&self, login: &str, password: &str) -> Result<Option<String>> {
        let record = match read_record(&self.path(login)) {
            Ok(r) => r,
            Err(_) => return Ok(None),
        };

        if record.password == password {
            Ok(Some(record.username))
        } else {
            Ok(None)
        }
    }

    /// Read-modify-write: replace the password, preserve the display name.
    pub fn change_password(&self, login: &str, new_password: &str) -> Result<()> {
        let path = self.path(login);
        let record = read_record(&path)?;
        write_record(
            &path,
            &UserRecord {
                password: new_password.to_string(),
                username: record.username,
            },
        )?;
        info!(target: "crier::store", login, "Changed password");
        Ok(())
    }

    /// Read-modify-write: replace the display name, preserve the password.
    pub fn change_username(&self, login: &str, new_username: &str) -> Result<()> {
        let path = self.path(login);
        let record = read_record(&path)?;
        write_record(
            &path,
            &UserRecord {
                password: record.password,
                username: new_username.to_string(),
            },
        )?;
        info!(target: "crier::store", login, username = new_username, "Changed display name");
        Ok(())
    }

    fn path(&self, login: &str) -> PathBuf {
        self.dir.join(login)
    }
}

fn read_record(path: &Path) -> Result<UserRecord> {
    let content = std::fs::read_to_string(path)?;

    let mut password = None;
    let mut username = None;
    for line in content.lines() {
        if let Some(value) = line.strip_prefix("password=") {
            password = Some(value.to_string());
        } else if let Some(value) = line.strip_prefix("username=") {
            username = Some(value.to_string());
        }
    }

    match (password, username) {
        (Some(password), Some(username)) if !password.is_empty() && !username.is_empty() => {
            Ok(UserRecord { password, username })
        }
        _ => Err(ServerError::Store(format!(
            "malformed account file {}",
            path.display()
        ))),
    }
}

fn write_record(path: &Path, record: &UserRecord) -> Result<()> {
    std::fs::write(
        path,
        format!("password={}\nusername={}\n", record.password, record.username),
    )?;
    Ok(())
}
