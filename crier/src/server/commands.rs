//! Command handlers.
//!
//! Every command reads a fixed operand sequence off the session's stream and
//! writes typed responses back. Two failure policies apply to a wrong operand
//! type, matching which commands can safely resync: Login, ChangePassword,
//! SendToUser, and GetHistory tear the session down; the rest reply
//! STATUS=ERROR and keep the session. A stream error always closes.

use super::connection::{Authed, SessionState};
use super::{groupcast, ServerContext};
use crate::sessions::{Session, SharedWriter};
use crate::store::{self, JoinOutcome};
use crate::Result;
use crier_proto::{encode_record, wire, Record, RecordType, Status, MAX_MESSAGE_LEN};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedReadHalf;
use tracing::{debug, warn};

/// What the session loop should do after a handler returns.
pub(crate) enum SessionAction {
    Continue,
    Close,
}

enum OperandOutcome {
    Value(Record),
    Abort(SessionAction),
}

/// Read an operand for a command where any malformation tears the session
/// down.
async fn strict_operand(reader: &mut OwnedReadHalf, expected: RecordType) -> OperandOutcome {
    match wire::read_record(reader).await {
        Ok(record) if record.is(expected) => OperandOutcome::Value(record),
        Ok(record) => {
            warn!(
                target: "crier::session",
                expected = ?expected,
                got = record.record_type,
                "Operand mismatch, closing session"
            );
            OperandOutcome::Abort(SessionAction::Close)
        }
        Err(_) => OperandOutcome::Abort(SessionAction::Close),
    }
}

/// Read an operand for a command that survives a mismatch with STATUS=ERROR.
/// Stream errors still close the session.
async fn lenient_operand(
    reader: &mut OwnedReadHalf,
    writer: &SharedWriter,
    expected: RecordType,
) -> Result<OperandOutcome> {
    match wire::read_record(reader).await {
        Ok(record) if record.is(expected) => Ok(OperandOutcome::Value(record)),
        Ok(record) => {
            warn!(
                target: "crier::session",
                expected = ?expected,
                got = record.record_type,
                "Operand mismatch, aborting command"
            );
            send_status(writer, Status::Error).await?;
            Ok(OperandOutcome::Abort(SessionAction::Continue))
        }
        Err(_) => Ok(OperandOutcome::Abort(SessionAction::Close)),
    }
}

/// Serialize one record onto a shared writer.
pub(crate) async fn write_to(writer: &SharedWriter, record: &Record) -> Result<()> {
    let buf = encode_record(record);
    let mut guard = writer.lock().await;
    guard.write_all(&buf).await?;
    Ok(())
}

pub(crate) async fn send_status(writer: &SharedWriter, status: Status) -> Result<()> {
    write_to(writer, &Record::new_status(status)).await
}

pub(crate) async fn handle_login(
    reader: &mut OwnedReadHalf,
    writer: &SharedWriter,
    state: &mut SessionState,
    ctx: &Arc<ServerContext>,
) -> Result<SessionAction> {
    let login_rec = match strict_operand(reader, RecordType::Login).await {
        OperandOutcome::Value(r) => r,
        OperandOutcome::Abort(a) => return Ok(a),
    };
    let password_rec = match strict_operand(reader, RecordType::Password).await {
        OperandOutcome::Value(r) => r,
        OperandOutcome::Abort(a) => return Ok(a),
    };

    let (Ok(login), Ok(password)) = (login_rec.text(), password_rec.text()) else {
        return Ok(SessionAction::Close);
    };

    // Authentication and registry insertion are one critical region under
    // the session mutex.
    let status = {
        let mut sessions = ctx.sessions.lock().await;

        if state.authenticated.is_some() {
            Status::Error
        } else if sessions.is_logged_in(login) {
            Status::AlreadyLoggedIn
        } else {
            match ctx.users.authenticate(login, password) {
                Ok(Some(display_name)) => {
                    sessions.add(Session {
                        login: login.to_string(),
                        display_name: display_name.clone(),
                        conn_id: state.conn_id,
                        writer: Arc::clone(writer),
                    });
                    state.authenticated = Some(Authed {
                        login: login.to_string(),
                        display_name,
                    });
                    Status::Ok
                }
                Ok(None) => Status::AuthenticationError,
                Err(e) => {
                    warn!(target: "crier::session", login, error = %e, "Authentication lookup failed");
                    Status::Error
                }
            }
        }
    };

    send_status(writer, status).await?;

    // Session mutex is released before the group mutex is taken.
    if status == Status::Ok {
        match ctx.groups.groups_of(login).await {
            Ok(groups) => {
                debug!(
                    target: "crier::session",
                    login,
                    groups = groups.len(),
                    "Logged in, sending memberships"
                );
                for group in &groups {
                    write_to(writer, &Record::new_group_info(group)).await?;
                }
            }
            Err(e) => {
                warn!(target: "crier::session", login, error = %e, "Failed to enumerate memberships");
            }
        }
    }

    Ok(SessionAction::Continue)
}

pub(crate) async fn handle_logout(
    writer: &SharedWriter,
    state: &mut SessionState,
    ctx: &Arc<ServerContext>,
) -> Result<SessionAction> {
    let status = if state.authenticated.is_some() {
        let mut sessions = ctx.sessions.lock().await;
        sessions.remove_by_conn(state.conn_id);
        state.authenticated = None;
        Status::Ok
    } else {
        Status::Error
    };

    send_status(writer, status).await?;
    Ok(SessionAction::Continue)
}

pub(crate) async fn handle_create_account(
    reader: &mut OwnedReadHalf,
    writer: &SharedWriter,
    ctx: &Arc<ServerContext>,
) -> Result<SessionAction> {
    let login_rec = match lenient_operand(reader, writer, RecordType::Login).await? {
        OperandOutcome::Value(r) => r,
        OperandOutcome::Abort(a) => return Ok(a),
    };
    let password_rec = match lenient_operand(reader, writer, RecordType::Password).await? {
        OperandOutcome::Value(r) => r,
        OperandOutcome::Abort(a) => return Ok(a),
    };
    let username_rec = match lenient_operand(reader, writer, RecordType::Username).await? {
        OperandOutcome::Value(r) => r,
        OperandOutcome::Abort(a) => return Ok(a),
    };

    let (Ok(login), Ok(password), Ok(username)) = (
        login_rec.text(),
        password_rec.text(),
        username_rec.text(),
    ) else {
        send_status(writer, Status::Error).await?;
        return Ok(SessionAction::Continue);
    };

    if !store::valid_file_name(login)
        || !store::valid_field(password)
        || !store::valid_field(username)
    {
        send_status(writer, Status::Error).await?;
        return Ok(SessionAction::Continue);
    }

    // Account mutation runs under the session mutex like the other
    // user-store read-modify-write paths.
    let status = {
        let _sessions = ctx.sessions.lock().await;
        match ctx.users.create(login, password, username) {
            Ok(()) => Status::Ok,
            Err(e) => {
                debug!(target: "crier::session", login, error = %e, "Account creation rejected");
                Status::Error
            }
        }
    };

    send_status(writer, status).await?;
    Ok(SessionAction::Continue)
}

pub(crate) async fn handle_change_password(
    reader: &mut OwnedReadHalf,
    writer: &SharedWriter,
    state: &mut SessionState,
    ctx: &Arc<ServerContext>,
) -> Result<SessionAction> {
    let old_rec = match strict_operand(reader, RecordType::Password).await {
        OperandOutcome::Value(r) => r,
        OperandOutcome::Abort(a) => return Ok(a),
    };
    let new_rec = match strict_operand(reader, RecordType::Password).await {
        OperandOutcome::Value(r) => r,
        OperandOutcome::Abort(a) => return Ok(a),
    };

    let (Ok(old_password), Ok(new_password)) = (old_rec.text(), new_rec.text()) else {
        return Ok(SessionAction::Close);
    };

    let Some(login) = state.authenticated.as_ref().map(|a| a.login.clone()) else {
        send_status(writer, Status::Error).await?;
        return Ok(SessionAction::Continue);
    };

    let status = if !store::valid_field(new_password) {
        Status::Error
    } else {
        let _sessions = ctx.sessions.lock().await;
        match ctx.users.authenticate(&login, old_password) {
            Ok(Some(_)) => match ctx.users.change_password(&login, new_password) {
                Ok(()) => Status::Ok,
                Err(e) => {
                    warn!(target: "crier::session", login = %login, error = %e, "Password change failed");
                    Status::Error
                }
            },
            Ok(None) => Status::AuthenticationError,
            Err(e) => {
                warn!(target: "crier::session", login = %login, error = %e, "Password verification failed");
                Status::Error
            }
        }
    };

    send_status(writer, status).await?;
    Ok(SessionAction::Continue)
}

pub(crate) async fn handle_change_username(
    reader: &mut OwnedReadHalf,
    writer: &SharedWriter,
    state: &mut SessionState,
    ctx: &Arc<ServerContext>,
) -> Result<SessionAction> {
    let username_rec = match lenient_operand(reader, writer, RecordType::Username).await? {
        OperandOutcome::Value(r) => r,
        OperandOutcome::Abort(a) => return Ok(a),
    };

    let Ok(new_username) = username_rec.text() else {
        send_status(writer, Status::Error).await?;
        return Ok(SessionAction::Continue);
    };

    let Some(login) = state.authenticated.as_ref().map(|a| a.login.clone()) else {
        send_status(writer, Status::Error).await?;
        return Ok(SessionAction::Continue);
    };

    let status = if !store::valid_field(new_username) {
        Status::Error
    } else {
        // File rewrite and in-place registry update stay consistent under
        // the session mutex.
        let mut sessions = ctx.sessions.lock().await;
        match ctx.users.change_username(&login, new_username) {
            Ok(()) => {
                sessions.set_display_name(&login, new_username);
                if let Some(authed) = state.authenticated.as_mut() {
                    authed.display_name = new_username.to_string();
                }
                Status::Ok
            }
            Err(e) => {
                warn!(target: "crier::session", login = %login, error = %e, "Display name change failed");
                Status::Error
            }
        }
    };

    send_status(writer, status).await?;
    Ok(SessionAction::Continue)
}

pub(crate) async fn handle_get_active_users(
    writer: &SharedWriter,
    ctx: &Arc<ServerContext>,
) -> Result<SessionAction> {
    let listing = {
        let sessions = ctx.sessions.lock().await;
        sessions.serialize_all(ctx.list_reply_bytes)
    };

    write_to(writer, &Record::new_active_users(&listing)).await?;
    Ok(SessionAction::Continue)
}

pub(crate) async fn handle_send_to_user(
    reader: &mut OwnedReadHalf,
    writer: &SharedWriter,
    state: &mut SessionState,
    ctx: &Arc<ServerContext>,
) -> Result<SessionAction> {
    let target_rec = match strict_operand(reader, RecordType::Login).await {
        OperandOutcome::Value(r) => r,
        OperandOutcome::Abort(a) => return Ok(a),
    };
    let message_rec = match strict_operand(reader, RecordType::Message).await {
        OperandOutcome::Value(r) => r,
        OperandOutcome::Abort(a) => return Ok(a),
    };

    let (Ok(target), Ok(message)) = (target_rec.text(), message_rec.text()) else {
        return Ok(SessionAction::Close);
    };

    let Some((sender_login, sender_display)) = state
        .authenticated
        .as_ref()
        .map(|a| (a.login.clone(), a.display_name.clone()))
    else {
        send_status(writer, Status::Error).await?;
        return Ok(SessionAction::Continue);
    };

    if message.len() > MAX_MESSAGE_LEN {
        send_status(writer, Status::Error).await?;
        return Ok(SessionAction::Continue);
    }

    // Relay and history append happen under the session mutex so the three
    // records reach the recipient stream contiguously; the history mutex is
    // taken inside this region.
    let status = {
        let sessions = ctx.sessions.lock().await;
        match sessions.find_by_login(target) {
            Some(session) => {
                let mut buf = encode_record(&Record::new_login(&sender_login));
                buf.extend_from_slice(&encode_record(&Record::new_username(&sender_display)));
                buf.extend_from_slice(&encode_record(&Record::new_message(message)));

                {
                    let mut target_writer = session.writer.lock().await;
                    if let Err(e) = target_writer.write_all(&buf).await {
                        warn!(
                            target: "crier::session",
                            from = %sender_login,
                            to = target,
                            error = %e,
                            "Relay write failed"
                        );
                    }
                }

                if let Err(e) = ctx
                    .history
                    .append_direct(&sender_login, &sender_display, target, message)
                    .await
                {
                    warn!(target: "crier::session", error = %e, "History append failed");
                }

                Status::Ok
            }
            None => Status::UserNotFound,
        }
    };

    send_status(writer, status).await?;
    Ok(SessionAction::Continue)
}

pub(crate) async fn handle_get_history(
    reader: &mut OwnedReadHalf,
    writer: &SharedWriter,
    state: &mut SessionState,
    ctx: &Arc<ServerContext>,
) -> Result<SessionAction> {
    let subject_rec = match strict_operand(reader, RecordType::Login).await {
        OperandOutcome::Value(r) => r,
        OperandOutcome::Abort(a) => return Ok(a),
    };
    let count_rec = match strict_operand(reader, RecordType::Uint16).await {
        OperandOutcome::Value(r) => r,
        OperandOutcome::Abort(a) => return Ok(a),
    };

    let Ok(subject) = subject_rec.text() else {
        return Ok(SessionAction::Close);
    };
    let Ok(max_lines) = count_rec.uint16() else {
        return Ok(SessionAction::Close);
    };

    // The subject becomes a file name; refuse anything that could not be one.
    if !store::valid_file_name(subject) {
        send_status(writer, Status::Error).await?;
        return Ok(SessionAction::Continue);
    }

    // A group with this name wins; otherwise it names a direct-message peer.
    let file_name = if ctx.groups.exists(subject).await {
        subject.to_string()
    } else {
        let Some(login) = state.authenticated.as_ref().map(|a| a.login.as_str()) else {
            send_status(writer, Status::Error).await?;
            return Ok(SessionAction::Continue);
        };
        crate::store::HistoryStore::direct_file_name(login, subject)
    };

    match ctx.history.read(&file_name, max_lines).await? {
        Some(text) => write_to(writer, &Record::new_history(&text)).await?,
        None => send_status(writer, Status::Error).await?,
    }

    Ok(SessionAction::Continue)
}

pub(crate) async fn handle_create_group(
    reader: &mut OwnedReadHalf,
    writer: &SharedWriter,
    state: &mut SessionState,
    ctx: &Arc<ServerContext>,
) -> Result<SessionAction> {
    let name_rec = match lenient_operand(reader, writer, RecordType::GroupName).await? {
        OperandOutcome::Value(r) => r,
        OperandOutcome::Abort(a) => return Ok(a),
    };

    let Ok(name) = name_rec.text() else {
        send_status(writer, Status::Error).await?;
        return Ok(SessionAction::Continue);
    };

    let Some(creator) = state.authenticated.as_ref().map(|a| a.login.clone()) else {
        send_status(writer, Status::Error).await?;
        return Ok(SessionAction::Continue);
    };

    if !store::valid_file_name(name) {
        send_status(writer, Status::Error).await?;
        return Ok(SessionAction::Continue);
    }

    match ctx.groups.create(name, &creator).await {
        Ok(group) => {
            send_status(writer, Status::Ok).await?;
            write_to(writer, &Record::new_group_info(&group)).await?;
        }
        Err(e) => {
            debug!(target: "crier::session", group = name, error = %e, "Group creation rejected");
            send_status(writer, Status::Error).await?;
        }
    }

    Ok(SessionAction::Continue)
}

pub(crate) async fn handle_list_groups(
    writer: &SharedWriter,
    ctx: &Arc<ServerContext>,
) -> Result<SessionAction> {
    match ctx.groups.list(ctx.list_reply_bytes).await {
        Ok(listing) => write_to(writer, &Record::new_group_list(&listing)).await?,
        Err(e) => {
            warn!(target: "crier::session", error = %e, "Group listing failed");
            send_status(writer, Status::Error).await?;
        }
    }

    Ok(SessionAction::Continue)
}

pub(crate) async fn handle_join_group(
    reader: &mut OwnedReadHalf,
    writer: &SharedWriter,
    state: &mut SessionState,
    ctx: &Arc<ServerContext>,
) -> Result<SessionAction> {
    let name_rec = match lenient_operand(reader, writer, RecordType::GroupName).await? {
        OperandOutcome::Value(r) => r,
        OperandOutcome::Abort(a) => return Ok(a),
    };

    let Ok(name) = name_rec.text() else {
        send_status(writer, Status::Error).await?;
        return Ok(SessionAction::Continue);
    };

    let Some(login) = state.authenticated.as_ref().map(|a| a.login.clone()) else {
        send_status(writer, Status::Error).await?;
        return Ok(SessionAction::Continue);
    };

    if !store::valid_file_name(name) {
        send_status(writer, Status::GroupNotFound).await?;
        return Ok(SessionAction::Continue);
    }

    match ctx.groups.join(name, &login).await {
        Ok(JoinOutcome::Joined(group)) => {
            send_status(writer, Status::Ok).await?;
            write_to(writer, &Record::new_group_info(&group)).await?;
        }
        Ok(JoinOutcome::AlreadyMember) => {
            send_status(writer, Status::AlreadyInGroup).await?;
        }
        Ok(JoinOutcome::NotFound) => {
            send_status(writer, Status::GroupNotFound).await?;
        }
        Err(e) => {
            warn!(target: "crier::session", group = name, error = %e, "Join failed");
            send_status(writer, Status::Error).await?;
        }
    }

    Ok(SessionAction::Continue)
}

pub(crate) async fn handle_send_to_group(
    reader: &mut OwnedReadHalf,
    writer: &SharedWriter,
    state: &mut SessionState,
    ctx: &Arc<ServerContext>,
) -> Result<SessionAction> {
    let name_rec = match lenient_operand(reader, writer, RecordType::GroupName).await? {
        OperandOutcome::Value(r) => r,
        OperandOutcome::Abort(a) => return Ok(a),
    };
    let message_rec = match lenient_operand(reader, writer, RecordType::Message).await? {
        OperandOutcome::Value(r) => r,
        OperandOutcome::Abort(a) => return Ok(a),
    };

    let (Ok(name), Ok(message)) = (name_rec.text(), message_rec.text()) else {
        send_status(writer, Status::Error).await?;
        return Ok(SessionAction::Continue);
    };

    let Some((sender_login, sender_display)) = state
        .authenticated
        .as_ref()
        .map(|a| (a.login.clone(), a.display_name.clone()))
    else {
        send_status(writer, Status::Error).await?;
        return Ok(SessionAction::Continue);
    };

    if message.len() > MAX_MESSAGE_LEN || !store::valid_file_name(name) {
        send_status(writer, Status::Error).await?;
        return Ok(SessionAction::Continue);
    }

    // Group mutex is released before the datagram send and the history
    // append; no path holds it together with another lock.
    let group = match ctx.groups.membership(name, &sender_login).await {
        Ok(Some((group, true))) => group,
        Ok(Some((_, false))) => {
            send_status(writer, Status::Error).await?;
            return Ok(SessionAction::Continue);
        }
        Ok(None) => {
            send_status(writer, Status::GroupNotFound).await?;
            return Ok(SessionAction::Continue);
        }
        Err(e) => {
            warn!(target: "crier::session", group = name, error = %e, "Group lookup failed");
            send_status(writer, Status::Error).await?;
            return Ok(SessionAction::Continue);
        }
    };

    let line = groupcast::format_line(&group.name, &sender_login, &sender_display, message);
    if let Err(e) = groupcast::send(&group, &line).await {
        warn!(
            target: "crier::session",
            group = %group.name,
            error = %e,
            "Multicast send failed"
        );
    }

    if let Err(e) = ctx
        .history
        .append_group(&group.name, &sender_login, &sender_display, message)
        .await
    {
        warn!(target: "crier::session", group = %group.name, error = %e, "History append failed");
    }

    send_status(writer, Status::Ok).await?;
    Ok(SessionAction::Continue)
}
