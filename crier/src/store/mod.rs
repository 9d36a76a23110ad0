//! File-backed stores for accounts, groups, and history logs.
//!
//! Each store owns one directory under the data root. Group and history
//! stores carry their own mutex; user-store read-modify-write sequences run
//! under the session mutex instead (see `sessions`).

mod groups;
mod history;
mod users;

pub use groups::{GroupStore, JoinOutcome};
pub use history::HistoryStore;
pub use users::UserStore;

use crier_proto::MAX_NAME_LEN;

/// Shared validation for logins, passwords, display names, and group names:
/// 1..=31 bytes.
pub fn valid_field(value: &str) -> bool {
    !value.is_empty() && value.len() <= MAX_NAME_LEN
}

/// Names double as file names, so path separators and dot-files are refused
/// on top of the length rule.
pub fn valid_file_name(value: &str) -> bool {
    valid_field(value) && !value.contains(['/', '\\']) && !value.starts_with('.')
}
