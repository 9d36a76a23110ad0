//! End-to-end tests for the crier server.
//!
//! Each test starts a real server on an ephemeral loopback port with a
//! temporary data root and drives it through `crier-client`. The two tests
//! that need a multicast-capable network are marked `#[ignore]`.

use crier::config::Config;
use crier::server;
use crier_client::{ChatClient, ClientConfig, Status};
use std::net::SocketAddr;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

async fn start_server() -> (SocketAddr, TempDir, broadcast::Sender<()>) {
    let dir = tempfile::tempdir().expect("tempdir");

    let config = Config {
        listen_addr: "127.0.0.1:0".parse().expect("addr"),
        data_dir: dir.path().to_path_buf(),
        ..Default::default()
    };

    let listener = server::bind(config.listen_addr).expect("bind");
    let addr = listener.local_addr().expect("local addr");

    let (shutdown_tx, _) = broadcast::channel(1);
    let rx = shutdown_tx.subscribe();
    tokio::spawn(async move {
        let _ = server::serve(listener, config, rx).await;
    });

    (addr, dir, shutdown_tx)
}

async fn connect(addr: SocketAddr) -> ChatClient {
    ChatClient::connect(ClientConfig::new(addr))
        .await
        .expect("connect")
}

/// Register and authenticate one user on a fresh connection.
async fn login_user(addr: SocketAddr, login: &str, password: &str, display: &str) -> ChatClient {
    let mut client = connect(addr).await;
    client
        .create_account(login, password, display)
        .await
        .expect("create account");
    client.login(login, password).await.expect("login");
    client
}

fn history_line_is_well_formed(line: &str, suffix: &str) -> bool {
    // "YYYY-MM-DD HH:MM:SS <login> display : message"
    if line.len() < 19 + suffix.len() {
        return false;
    }
    let (timestamp, rest) = line.split_at(19);
    let digits = [0, 1, 2, 3, 5, 6, 8, 9, 11, 12, 14, 15, 17, 18];
    let bytes = timestamp.as_bytes();
    digits.iter().all(|&i| bytes[i].is_ascii_digit())
        && &timestamp[4..5] == "-"
        && &timestamp[7..8] == "-"
        && &timestamp[10..11] == " "
        && &timestamp[13..14] == ":"
        && &timestamp[16..17] == ":"
        && rest == suffix
}

// ============================================================================
// Accounts and authentication
// ============================================================================

#[tokio::test]
async fn test_create_account_and_login() {
    let (addr, _dir, _shutdown) = start_server().await;

    let mut client = connect(addr).await;
    client
        .create_account("alice", "pw", "Alice")
        .await
        .expect("create account");
    client.login("alice", "pw").await.expect("login");

    // The login reply carried zero GROUP_INFO records; the stream is in sync
    // for the next command.
    let listing = client.get_active_users().await.expect("active users");
    assert_eq!(listing, "<alice> Alice\n");

    client.close().await.expect("close");
}

#[tokio::test]
async fn test_duplicate_account_refused() {
    let (addr, _dir, _shutdown) = start_server().await;

    let mut client = connect(addr).await;
    client
        .create_account("alice", "pw", "Alice")
        .await
        .expect("create account");

    let err = client
        .create_account("alice", "other", "Mallory")
        .await
        .expect_err("duplicate must be refused");
    assert_eq!(err.status(), Some(Status::Error));
}

#[tokio::test]
async fn test_wrong_password_rejected() {
    let (addr, _dir, _shutdown) = start_server().await;

    let mut client = connect(addr).await;
    client
        .create_account("alice", "pw", "Alice")
        .await
        .expect("create account");

    let err = client
        .login("alice", "wrong")
        .await
        .expect_err("wrong password must fail");
    assert_eq!(err.status(), Some(Status::AuthenticationError));

    // The session survives and can still log in correctly.
    client.login("alice", "pw").await.expect("login");
}

#[tokio::test]
async fn test_duplicate_login_refused() {
    let (addr, _dir, _shutdown) = start_server().await;

    let first = login_user(addr, "alice", "pw", "Alice").await;

    let mut second = connect(addr).await;
    let err = second
        .login("alice", "pw")
        .await
        .expect_err("second session for the same login must be refused");
    assert_eq!(err.status(), Some(Status::AlreadyLoggedIn));

    // Once the first session is gone the login becomes available again.
    first.close().await.expect("close");
    let mut ok = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if second.login("alice", "pw").await.is_ok() {
            ok = true;
            break;
        }
    }
    assert!(ok, "login should succeed after the old session disconnects");
}

#[tokio::test]
async fn test_logout_frees_login() {
    let (addr, _dir, _shutdown) = start_server().await;

    let mut first = login_user(addr, "alice", "pw", "Alice").await;
    first.logout().await.expect("logout");

    // Same connection can re-authenticate...
    first.login("alice", "pw").await.expect("re-login");
    first.logout().await.expect("logout again");

    // ...and so can a different connection.
    let mut second = connect(addr).await;
    second.login("alice", "pw").await.expect("login elsewhere");
}

#[tokio::test]
async fn test_field_length_boundaries() {
    let (addr, _dir, _shutdown) = start_server().await;

    let mut client = connect(addr).await;

    let max_login = "x".repeat(31);
    client
        .create_account(&max_login, "pw", "Max")
        .await
        .expect("31-byte login is accepted");

    let too_long = "x".repeat(32);
    let err = client
        .create_account(&too_long, "pw", "Over")
        .await
        .expect_err("32-byte login is rejected");
    assert_eq!(err.status(), Some(Status::Error));

    let err = client
        .create_account("bob", "", "Bob")
        .await
        .expect_err("empty password is rejected");
    assert_eq!(err.status(), Some(Status::Error));

    let err = client
        .create_account("bob", "pw", &"d".repeat(32))
        .await
        .expect_err("oversize display name is rejected");
    assert_eq!(err.status(), Some(Status::Error));
}

// ============================================================================
// Account mutation
// ============================================================================

#[tokio::test]
async fn test_change_password_roundtrip() {
    let (addr, _dir, _shutdown) = start_server().await;

    let mut client = login_user(addr, "alice", "old", "Alice").await;

    let err = client
        .change_password("bogus", "new")
        .await
        .expect_err("wrong old password must fail");
    assert_eq!(err.status(), Some(Status::AuthenticationError));

    client.change_password("old", "new").await.expect("change");
    client.logout().await.expect("logout");

    let err = client
        .login("alice", "old")
        .await
        .expect_err("old password must no longer work");
    assert_eq!(err.status(), Some(Status::AuthenticationError));

    client.login("alice", "new").await.expect("new password works");
}

#[tokio::test]
async fn test_change_username_preserves_password() {
    let (addr, _dir, _shutdown) = start_server().await;

    let mut client = login_user(addr, "alice", "pw", "Alice").await;
    client.change_username("Alicia").await.expect("rename");

    // Display name updated in place for the live session.
    let listing = client.get_active_users().await.expect("active users");
    assert_eq!(listing, "<alice> Alicia\n");

    // Password unchanged.
    client.logout().await.expect("logout");
    client.login("alice", "pw").await.expect("login");
    let listing = client.get_active_users().await.expect("active users");
    assert_eq!(listing, "<alice> Alicia\n");
}

// ============================================================================
// Direct messages
// ============================================================================

#[tokio::test]
async fn test_direct_message_relay_and_history() {
    let (addr, dir, _shutdown) = start_server().await;

    let mut alice = login_user(addr, "alice", "pw", "Alice").await;
    let mut bob = login_user(addr, "bob", "pw", "Bob").await;

    alice.send_to_user("bob", "hi").await.expect("send");

    let push = bob.recv_push().await.expect("pushed message");
    assert_eq!(push.from_login, "alice");
    assert_eq!(push.from_display, "Alice");
    assert_eq!(push.text, "hi");

    let log = std::fs::read_to_string(dir.path().join("history/alice_bob")).expect("history file");
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 1);
    assert!(
        history_line_is_well_formed(lines[0], " <alice> Alice : hi"),
        "unexpected history line: {:?}",
        lines[0]
    );
}

#[tokio::test]
async fn test_offline_target() {
    let (addr, dir, _shutdown) = start_server().await;

    let mut alice = login_user(addr, "alice", "pw", "Alice").await;

    let err = alice
        .send_to_user("carol", "anyone there?")
        .await
        .expect_err("offline target must be reported");
    assert_eq!(err.status(), Some(Status::UserNotFound));

    // No history line is appended for a failed delivery.
    assert!(!dir.path().join("history/alice_carol").exists());
}

#[tokio::test]
async fn test_history_tail_cap() {
    let (addr, _dir, _shutdown) = start_server().await;

    let mut alice = login_user(addr, "alice", "pw", "Alice").await;
    let mut bob = login_user(addr, "bob", "pw", "Bob").await;

    for i in 0..5 {
        alice
            .send_to_user("bob", &format!("msg {}", i))
            .await
            .expect("send");
        bob.recv_push().await.expect("push");
    }

    let tail = alice.get_history("bob", 3).await.expect("history");
    let lines: Vec<&str> = tail.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].ends_with("msg 2"));
    assert!(lines[1].ends_with("msg 3"));
    assert!(lines[2].ends_with("msg 4"));

    // Zero means the whole log, and both peers resolve the same file.
    let full = bob.get_history("alice", 0).await.expect("history");
    assert_eq!(full.lines().count(), 5);
}

#[tokio::test]
async fn test_history_for_unknown_peer() {
    let (addr, _dir, _shutdown) = start_server().await;

    let mut alice = login_user(addr, "alice", "pw", "Alice").await;
    let err = alice
        .get_history("nobody", 0)
        .await
        .expect_err("no log for this pair");
    assert_eq!(err.status(), Some(Status::Error));
}

// ============================================================================
// Groups
// ============================================================================

#[tokio::test]
async fn test_group_create_join_and_message() {
    let (addr, dir, _shutdown) = start_server().await;

    let mut alice = login_user(addr, "alice", "pw", "Alice").await;
    let mut bob = login_user(addr, "bob", "pw", "Bob").await;

    let group = alice.create_group("devs").await.expect("create group");
    assert_eq!(group.name, "devs");
    assert_eq!(group.id, 1);
    assert_eq!(group.mcast_addr.to_string(), "239.0.0.2");
    assert_eq!(group.mcast_port, 7001);

    // The creator is already a member.
    let err = alice
        .join_group("devs")
        .await
        .expect_err("creator re-join must be refused");
    assert_eq!(err.status(), Some(Status::AlreadyInGroup));

    let joined = bob.join_group("devs").await.expect("join");
    assert_eq!(joined, group);

    let err = bob
        .join_group("ghosts")
        .await
        .expect_err("unknown group");
    assert_eq!(err.status(), Some(Status::GroupNotFound));

    let names = alice.list_groups().await.expect("list");
    assert_eq!(names, vec!["devs".to_string()]);

    alice.send_to_group("devs", "hello").await.expect("group send");

    let log = std::fs::read_to_string(dir.path().join("history/devs")).expect("group history");
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 1);
    assert!(history_line_is_well_formed(
        lines[0],
        " <alice> Alice : hello"
    ));

    // Non-members cannot post.
    let mut carol = login_user(addr, "carol", "pw", "Carol").await;
    let err = carol
        .send_to_group("devs", "let me in")
        .await
        .expect_err("non-member post must be refused");
    assert_eq!(err.status(), Some(Status::Error));
}

#[tokio::test]
async fn test_group_history_by_name() {
    let (addr, _dir, _shutdown) = start_server().await;

    let mut alice = login_user(addr, "alice", "pw", "Alice").await;
    alice.create_group("devs").await.expect("create group");
    alice.send_to_group("devs", "first").await.expect("send");
    alice.send_to_group("devs", "second").await.expect("send");

    // A group name takes precedence over a peer login in GET_HISTORY.
    let log = alice.get_history("devs", 0).await.expect("history");
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with("first"));
    assert!(lines[1].ends_with("second"));
}

#[tokio::test]
async fn test_login_replays_memberships() {
    let (addr, _dir, _shutdown) = start_server().await;

    let mut alice = login_user(addr, "alice", "pw", "Alice").await;
    alice.create_group("devs").await.expect("create");
    alice.create_group("ops").await.expect("create");
    alice.logout().await.expect("logout");

    alice.login("alice", "pw").await.expect("login");
    let first = alice.recv_group_info().await.expect("membership 1");
    let second = alice.recv_group_info().await.expect("membership 2");
    assert_eq!(first.name, "devs");
    assert_eq!(second.name, "ops");

    // Stream back in sync after the membership burst.
    let listing = alice.get_active_users().await.expect("active users");
    assert_eq!(listing, "<alice> Alice\n");
}

#[tokio::test]
async fn test_group_ids_monotonic_across_server_restart() {
    let dir = tempfile::tempdir().expect("tempdir");

    let make_config = |dir: &TempDir| Config {
        listen_addr: "127.0.0.1:0".parse().expect("addr"),
        data_dir: dir.path().to_path_buf(),
        ..Default::default()
    };

    // First server instance: create two groups.
    {
        let config = make_config(&dir);
        let listener = server::bind(config.listen_addr).expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, _) = broadcast::channel(1);
        let rx = shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            let _ = server::serve(listener, config, rx).await;
        });

        let mut alice = login_user(addr, "alice", "pw", "Alice").await;
        assert_eq!(alice.create_group("devs").await.expect("create").id, 1);
        assert_eq!(alice.create_group("ops").await.expect("create").id, 2);

        let _ = shutdown_tx.send(());
        let _ = handle.await;
    }

    // Second instance over the same data root continues the id sequence.
    {
        let config = make_config(&dir);
        let listener = server::bind(config.listen_addr).expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, _) = broadcast::channel(1);
        let rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let _ = server::serve(listener, config, rx).await;
        });

        let mut alice = connect(addr).await;
        alice.login("alice", "pw").await.expect("login");
        // Drain the two membership records from the first instance's groups.
        alice.recv_group_info().await.expect("membership 1");
        alice.recv_group_info().await.expect("membership 2");

        let group = alice.create_group("qa").await.expect("create");
        assert_eq!(group.id, 3);
        assert_eq!(group.mcast_addr.to_string(), "239.0.0.4");
        assert_eq!(group.mcast_port, 7003);
    }
}

// ============================================================================
// Unauthenticated sessions
// ============================================================================

#[tokio::test]
async fn test_unauthenticated_commands_rejected() {
    let (addr, _dir, _shutdown) = start_server().await;

    let mut client = connect(addr).await;

    let err = client
        .send_to_user("alice", "hi")
        .await
        .expect_err("unauthenticated send");
    assert_eq!(err.status(), Some(Status::Error));

    let err = client
        .create_group("devs")
        .await
        .expect_err("unauthenticated group create");
    assert_eq!(err.status(), Some(Status::Error));

    let err = client
        .get_history("alice", 0)
        .await
        .expect_err("unauthenticated history");
    assert_eq!(err.status(), Some(Status::Error));

    let err = client.logout().await.expect_err("logout without login");
    assert_eq!(err.status(), Some(Status::Error));

    // The connection is still usable afterwards.
    client
        .create_account("alice", "pw", "Alice")
        .await
        .expect("create account");
    client.login("alice", "pw").await.expect("login");
}

// ============================================================================
// Discovery and multicast delivery
// ============================================================================

#[tokio::test]
#[ignore = "requires a multicast-capable network"]
async fn test_discovery_roundtrip() {
    use crier::config::DiscoverySettings;
    use std::net::Ipv4Addr;

    let (addr, _dir, shutdown_tx) = start_server().await;

    let settings = DiscoverySettings {
        enabled: true,
        mcast_addr: Ipv4Addr::new(239, 0, 0, 1),
        mcast_port: 5000,
    };
    let rx = shutdown_tx.subscribe();
    tokio::spawn(async move {
        let _ = crier::discovery::run(settings, addr.port(), rx).await;
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let discovered = crier_client::discover(
        Ipv4Addr::new(239, 0, 0, 1),
        5000,
        Duration::from_secs(2),
    )
    .await
    .expect("discovery reply");

    assert_eq!(discovered.port(), addr.port());
}

#[tokio::test]
#[ignore = "requires a multicast-capable network"]
async fn test_group_message_reaches_multicast_group() {
    let (addr, _dir, _shutdown) = start_server().await;

    let mut alice = login_user(addr, "alice", "pw", "Alice").await;
    let group = alice.create_group("devs").await.expect("create group");

    let socket = crier_client::join_group_socket(&group).expect("join multicast");
    tokio::time::sleep(Duration::from_millis(100)).await;

    alice.send_to_group("devs", "hello").await.expect("send");

    let mut buf = [0u8; 2048];
    let (n, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
        .await
        .expect("datagram within deadline")
        .expect("recv");

    assert_eq!(&buf[..n], b"[devs] <alice> Alice : hello");
}
