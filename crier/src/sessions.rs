//! Active-session registry.
//!
//! Sessions are indexed twice: by login and by connection id. Both indexes
//! live behind a single mutex (the session mutex); every reader and mutator
//! goes through [`SessionRegistry::lock`]. At most one session per login is
//! enforced at insert time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, MutexGuard};

/// Opaque handle identifying one TCP session.
pub type ConnId = u64;

/// Write half of a session's TCP stream, shareable with other workers so the
/// server can relay direct messages onto it.
pub type SharedWriter = Arc<Mutex<OwnedWriteHalf>>;

static CONN_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Allocate a connection id for a newly accepted stream.
pub fn next_conn_id() -> ConnId {
    CONN_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// One authenticated session.
#[derive(Clone)]
pub struct Session {
    pub login: String,
    pub display_name: String,
    pub conn_id: ConnId,
    pub writer: SharedWriter,
}

/// The two session indexes. Only reachable through the registry lock.
#[derive(Default)]
pub struct Sessions {
    by_login: HashMap<String, Session>,
    login_by_conn: HashMap<ConnId, String>,
}

impl Sessions {
    /// Register a session. Returns false (and leaves the registry untouched)
    /// if the login already has an active session.
    pub fn add(&mut self, session: Session) -> bool {
        if self.by_login.contains_key(&session.login) {
            return false;
        }
        self.login_by_conn
            .insert(session.conn_id, session.login.clone());
        self.by_login.insert(session.login.clone(), session);
        true
    }

    /// Remove whatever session is bound to this connection, if any.
    pub fn remove_by_conn(&mut self, conn_id: ConnId) -> Option<Session> {
        let login = self.login_by_conn.remove(&conn_id)?;
        self.by_login.remove(&login)
    }

    pub fn is_logged_in(&self, login: &str) -> bool {
        self.by_login.contains_key(login)
    }

    pub fn find_by_login(&self, login: &str) -> Option<&Session> {
        self.by_login.get(login)
    }

    pub fn find_by_conn(&self, conn_id: ConnId) -> Option<&Session> {
        let login = self.login_by_conn.get(&conn_id)?;
        self.by_login.get(login)
    }

    /// Update a session's display name in place (rename while logged in).
    pub fn set_display_name(&mut self, login: &str, display_name: &str) {
        if let Some(session) = self.by_login.get_mut(login) {
            session.display_name = display_name.to_string();
        }
    }

    pub fn len(&self) -> usize {
        self.by_login.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_login.is_empty()
    }

    /// Render `<login> display` lines, stopping before `cap` bytes would be
    /// exceeded. Sorted by login for a stable listing.
    pub fn serialize_all(&self, cap: usize) -> String {
        let mut logins: Vec<&String> = self.by_login.keys().collect();
        logins.sort();

        let mut out = String::new();
        for login in logins {
            let session = &self.by_login[login];
            let line = format!("<{}> {}\n", session.login, session.display_name);
            if out.len() + line.len() > cap {
                break;
            }
            out.push_str(&line);
        }
        out
    }
}

/// Process-wide registry guarded by the session mutex.
pub struct SessionRegistry {
    inner: Mutex<Sessions>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Sessions::default()),
        }
    }

    /// Acquire the session mutex.
    ///
    /// User-store read-modify-write sequences run under this guard as well,
    /// so login/account mutation and registry updates are one critical
    /// region.
    pub async fn lock(&self) -> MutexGuard<'_, Sessions> {
        self.inner.lock().await
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    /// Build a real writer half; the session registry holds stream halves,
    /// so tests need a connected socket pair.
    async fn test_writer() -> SharedWriter {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let _server_side = listener.accept().await.unwrap();
        let (_, writer) = client.into_split();
        Arc::new(Mutex::new(writer))
    }

    async fn session(login: &str, display: &str) -> Session {
        Session {
            login: login.to_string(),
            display_name: display.to_string(),
            conn_id: next_conn_id(),
            writer: test_writer().await,
        }
    }

    #[tokio::test]
    async fn test_single_session_per_login() {
        let registry = SessionRegistry::new();
        let first = session("alice", "Alice").await;
        let second = session("alice", "Alice Again").await;
        let second_conn = second.conn_id;

        let mut guard = registry.lock().await;
        assert!(guard.add(first));
        assert!(!guard.add(second));

        assert!(guard.is_logged_in("alice"));
        assert_eq!(guard.len(), 1);
        // The rejected session left no trace under its conn id.
        assert!(guard.find_by_conn(second_conn).is_none());
    }

    #[tokio::test]
    async fn test_remove_by_conn() {
        let registry = SessionRegistry::new();
        let s = session("bob", "Bob").await;
        let conn_id = s.conn_id;

        let mut guard = registry.lock().await;
        assert!(guard.add(s));
        assert!(guard.find_by_conn(conn_id).is_some());

        let removed = guard.remove_by_conn(conn_id).unwrap();
        assert_eq!(removed.login, "bob");
        assert!(!guard.is_logged_in("bob"));
        assert!(guard.is_empty());

        // Removing twice is a no-op.
        assert!(guard.remove_by_conn(conn_id).is_none());
    }

    #[tokio::test]
    async fn test_display_name_update_in_place() {
        let registry = SessionRegistry::new();
        let s = session("carol", "Carol").await;

        let mut guard = registry.lock().await;
        guard.add(s);
        guard.set_display_name("carol", "Caroline");

        assert_eq!(
            guard.find_by_login("carol").unwrap().display_name,
            "Caroline"
        );
    }

    #[tokio::test]
    async fn test_serialize_all_format_and_cap() {
        let registry = SessionRegistry::new();
        let mut guard = registry.lock().await;
        guard.add(session("bob", "Bob").await);
        guard.add(session("alice", "Alice").await);

        let listing = guard.serialize_all(1024);
        assert_eq!(listing, "<alice> Alice\n<bob> Bob\n");

        // A cap too small for the second line drops it whole.
        let capped = guard.serialize_all(15);
        assert_eq!(capped, "<alice> Alice\n");
    }
}
