//! TCP control connection.
//!
//! One method per protocol command, each sending the COMMAND record followed
//! by its operand sequence and reading the typed response. Server-pushed
//! direct messages arrive as a LOGIN/USERNAME/MESSAGE triple; callers that
//! expect one read it with [`ChatClient::recv_push`].

use crate::{ClientError, Result};
use crier_proto::{
    wire, Command, GroupInfo, Record, RecordType, Status,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, trace};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub addr: SocketAddr,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 6000)),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            ..Default::default()
        }
    }
}

/// A direct message relayed through the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectMessage {
    pub from_login: String,
    pub from_display: String,
    pub text: String,
}

pub struct ChatClient {
    stream: TcpStream,
    config: ClientConfig,
}

impl ChatClient {
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        debug!(addr = %config.addr, "Connecting to chat server");

        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(config.addr))
            .await
            .map_err(|_| ClientError::Timeout)?
            .map_err(ClientError::ConnectionFailed)?;

        stream.set_nodelay(true).map_err(ClientError::Io)?;

        debug!(addr = %config.addr, "Connected");
        Ok(Self { stream, config })
    }

    pub async fn connect_to(addr: &str) -> Result<Self> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| ClientError::Protocol(format!("Invalid address: {}", e)))?;
        Self::connect(ClientConfig::new(addr)).await
    }

    /// Create an account. The session does not have to be authenticated.
    pub async fn create_account(
        &mut self,
        login: &str,
        password: &str,
        username: &str,
    ) -> Result<()> {
        self.send(&Record::new_command(Command::CreateAccount)).await?;
        self.send(&Record::new_login(login)).await?;
        self.send(&Record::new_password(password)).await?;
        self.send(&Record::new_username(username)).await?;

        self.expect_ok().await
    }

    /// Authenticate this connection. On success the server follows the
    /// status with one GROUP_INFO per membership; read those with
    /// [`Self::recv_group_info`].
    pub async fn login(&mut self, login: &str, password: &str) -> Result<()> {
        self.send(&Record::new_command(Command::Login)).await?;
        self.send(&Record::new_login(login)).await?;
        self.send(&Record::new_password(password)).await?;

        self.expect_ok().await
    }

    /// Deregister this session without closing the connection.
    pub async fn logout(&mut self) -> Result<()> {
        self.send(&Record::new_command(Command::Logout)).await?;
        self.expect_ok().await
    }

    pub async fn change_password(&mut self, old: &str, new: &str) -> Result<()> {
        self.send(&Record::new_command(Command::ChangePassword)).await?;
        self.send(&Record::new_password(old)).await?;
        self.send(&Record::new_password(new)).await?;

        self.expect_ok().await
    }

    pub async fn change_username(&mut self, new: &str) -> Result<()> {
        self.send(&Record::new_command(Command::ChangeUsername)).await?;
        self.send(&Record::new_username(new)).await?;

        self.expect_ok().await
    }

    /// Raw `<login> display` listing of online users.
    pub async fn get_active_users(&mut self) -> Result<String> {
        self.send(&Record::new_command(Command::GetActiveUsers)).await?;

        let record = self.expect(RecordType::ActiveUsers).await?;
        Ok(record.text()?.to_string())
    }

    /// Send a direct message. The recipient must be online.
    pub async fn send_to_user(&mut self, target: &str, message: &str) -> Result<()> {
        self.send(&Record::new_command(Command::SendToUser)).await?;
        self.send(&Record::new_login(target)).await?;
        self.send(&Record::new_message(message)).await?;

        self.expect_ok().await
    }

    /// Fetch history with `subject` (a group name, or a peer login for the
    /// direct log). `max_lines` of 0 means the full log.
    pub async fn get_history(&mut self, subject: &str, max_lines: u16) -> Result<String> {
        self.send(&Record::new_command(Command::GetHistory)).await?;
        self.send(&Record::new_login(subject)).await?;
        self.send(&Record::new_uint16(max_lines)).await?;

        let record = self.recv().await?;
        match record.kind() {
            Some(RecordType::History) => Ok(record.text()?.to_string()),
            Some(RecordType::Status) => Err(ClientError::Server(record.status()?)),
            _ => Err(ClientError::UnexpectedRecord(format!(
                "expected HISTORY, got type {}",
                record.record_type
            ))),
        }
    }

    pub async fn create_group(&mut self, name: &str) -> Result<GroupInfo> {
        self.send(&Record::new_command(Command::CreateGroup)).await?;
        self.send(&Record::new_group_name(name)).await?;

        self.expect_ok().await?;
        self.recv_group_info().await
    }

    pub async fn list_groups(&mut self) -> Result<Vec<String>> {
        self.send(&Record::new_command(Command::ListGroups)).await?;

        let record = self.expect(RecordType::GroupList).await?;
        Ok(record.text()?.lines().map(str::to_string).collect())
    }

    /// Join a group. The returned descriptor carries the multicast endpoint
    /// to pass to [`crate::join_group_socket`].
    pub async fn join_group(&mut self, name: &str) -> Result<GroupInfo> {
        self.send(&Record::new_command(Command::JoinGroup)).await?;
        self.send(&Record::new_group_name(name)).await?;

        self.expect_ok().await?;
        self.recv_group_info().await
    }

    /// Send a message to a group the session belongs to.
    pub async fn send_to_group(&mut self, name: &str, message: &str) -> Result<()> {
        self.send(&Record::new_command(Command::SendToGroup)).await?;
        self.send(&Record::new_group_name(name)).await?;
        self.send(&Record::new_message(message)).await?;

        self.expect_ok().await
    }

    /// Read one GROUP_INFO record, e.g. the membership records following a
    /// successful login.
    pub async fn recv_group_info(&mut self) -> Result<GroupInfo> {
        let record = self.expect(RecordType::GroupInfo).await?;
        Ok(record.group_info()?)
    }

    /// Read one server-pushed direct message (LOGIN, USERNAME, MESSAGE in
    /// order).
    pub async fn recv_push(&mut self) -> Result<DirectMessage> {
        let from_login = self.expect(RecordType::Login).await?.text()?.to_string();
        let from_display = self.expect(RecordType::Username).await?.text()?.to_string();
        let text = self.expect(RecordType::Message).await?.text()?.to_string();

        Ok(DirectMessage {
            from_login,
            from_display,
            text,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn close(mut self) -> Result<()> {
        use tokio::io::AsyncWriteExt;
        self.stream.shutdown().await.map_err(ClientError::Io)?;
        Ok(())
    }

    async fn send(&mut self, record: &Record) -> Result<()> {
        trace!(record_type = record.record_type, "Sending record");
        tokio::time::timeout(
            self.config.write_timeout,
            wire::write_record(&mut self.stream, record),
        )
        .await
        .map_err(|_| ClientError::Timeout)??;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Record> {
        let record = tokio::time::timeout(
            self.config.read_timeout,
            wire::read_record(&mut self.stream),
        )
        .await
        .map_err(|_| ClientError::Timeout)??;
        trace!(record_type = record.record_type, "Received record");
        Ok(record)
    }

    async fn expect(&mut self, expected: RecordType) -> Result<Record> {
        let record = self.recv().await?;
        if record.is(expected) {
            Ok(record)
        } else {
            Err(ClientError::UnexpectedRecord(format!(
                "expected {:?}, got type {}",
                expected, record.record_type
            )))
        }
    }

    /// Read a STATUS record and require OK.
    async fn expect_ok(&mut self) -> Result<()> {
        let record = self.expect(RecordType::Status).await?;
        match record.status()? {
            Status::Ok => Ok(()),
            status => Err(ClientError::Server(status)),
        }
    }
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("addr", &self.config.addr)
            .finish()
    }
}
