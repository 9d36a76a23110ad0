//! Per-connection session worker.
//!
//! Each worker owns the read half of its stream and shares the write half
//! through the session registry so other workers can relay direct messages
//! onto it. The outer loop reads one record at a time: anything that is not
//! a COMMAND is discarded, a COMMAND is dispatched with its operand
//! sequence. Stream errors end the session; cleanup always deregisters the
//! connection.

use super::commands::{self, SessionAction};
use super::ServerContext;
use crate::sessions::{next_conn_id, ConnId, SharedWriter};
use crate::Result;
use crier_proto::{wire, Command, RecordType, Status};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Session-local state carried across commands.
pub(crate) struct SessionState {
    pub conn_id: ConnId,
    pub authenticated: Option<Authed>,
}

/// Identity copied from the store at login time. The display name tracks
/// renames in place.
pub(crate) struct Authed {
    pub login: String,
    pub display_name: String,
}

/// Handle one client connection until it closes or fails.
pub async fn handle_session(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<ServerContext>,
) -> Result<()> {
    let conn_id = next_conn_id();
    let (mut reader, writer) = stream.into_split();
    let writer: SharedWriter = Arc::new(Mutex::new(writer));

    debug!(target: "crier::session", peer = %peer, conn_id, "Session started");

    let mut state = SessionState {
        conn_id,
        authenticated: None,
    };

    let result = session_loop(&mut reader, &writer, &mut state, &ctx).await;

    // Cleanup runs on every exit path, authenticated or not.
    {
        let mut sessions = ctx.sessions.lock().await;
        if let Some(session) = sessions.remove_by_conn(conn_id) {
            debug!(
                target: "crier::session",
                conn_id,
                login = %session.login,
                "Deregistered session on disconnect"
            );
        }
    }

    debug!(target: "crier::session", peer = %peer, conn_id, "Session closed");
    result
}

async fn session_loop(
    reader: &mut OwnedReadHalf,
    writer: &SharedWriter,
    state: &mut SessionState,
    ctx: &Arc<ServerContext>,
) -> Result<()> {
    loop {
        let record = match wire::read_record(reader).await {
            Ok(record) => record,
            // Peer close or stream error: unrecoverable, exit quietly.
            Err(_) => return Ok(()),
        };

        if !record.is(RecordType::Command) {
            debug!(
                target: "crier::session",
                conn_id = state.conn_id,
                record_type = record.record_type,
                "Discarded record outside a command sequence"
            );
            continue;
        }

        let command = match record.command() {
            Ok(command) => command,
            Err(e) => {
                warn!(
                    target: "crier::session",
                    conn_id = state.conn_id,
                    error = %e,
                    "Bad command payload"
                );
                commands::send_status(writer, Status::Error).await?;
                continue;
            }
        };

        let action = dispatch(command, reader, writer, state, ctx).await?;
        if matches!(action, SessionAction::Close) {
            return Ok(());
        }
    }
}

async fn dispatch(
    command: Command,
    reader: &mut OwnedReadHalf,
    writer: &SharedWriter,
    state: &mut SessionState,
    ctx: &Arc<ServerContext>,
) -> Result<SessionAction> {
    debug!(
        target: "crier::session",
        conn_id = state.conn_id,
        command = ?command,
        "Dispatching command"
    );

    match command {
        Command::Login => commands::handle_login(reader, writer, state, ctx).await,
        Command::Logout => commands::handle_logout(writer, state, ctx).await,
        Command::CreateAccount => commands::handle_create_account(reader, writer, ctx).await,
        Command::ChangeUsername => {
            commands::handle_change_username(reader, writer, state, ctx).await
        }
        Command::ChangePassword => {
            commands::handle_change_password(reader, writer, state, ctx).await
        }
        Command::GetActiveUsers => commands::handle_get_active_users(writer, ctx).await,
        Command::SendToUser => commands::handle_send_to_user(reader, writer, state, ctx).await,
        Command::SendToGroup => commands::handle_send_to_group(reader, writer, state, ctx).await,
        Command::CreateGroup => commands::handle_create_group(reader, writer, state, ctx).await,
        Command::ListGroups => commands::handle_list_groups(writer, ctx).await,
        Command::JoinGroup => commands::handle_join_group(reader, writer, state, ctx).await,
        Command::GetHistory => commands::handle_get_history(reader, writer, state, ctx).await,
    }
}
