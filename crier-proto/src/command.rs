/// Command codes carried in a COMMAND record.
///
/// Codes are fixed for wire compatibility. The code travels as a 32-bit
/// big-endian integer, consistent with the rest of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Command {
    Login = 1,
    Logout = 2,
    CreateAccount = 3,
    ChangeUsername = 4,
    ChangePassword = 5,
    GetActiveUsers = 6,
    SendToUser = 7,
    SendToGroup = 8,
    CreateGroup = 9,
    ListGroups = 10,
    JoinGroup = 11,
    GetHistory = 12,
}

impl Command {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Login),
            2 => Some(Self::Logout),
            3 => Some(Self::CreateAccount),
            4 => Some(Self::ChangeUsername),
            5 => Some(Self::ChangePassword),
            6 => Some(Self::GetActiveUsers),
            7 => Some(Self::SendToUser),
            8 => Some(Self::SendToGroup),
            9 => Some(Self::CreateGroup),
            10 => Some(Self::ListGroups),
            11 => Some(Self::JoinGroup),
            12 => Some(Self::GetHistory),
            _ => None,
        }
    }
}

/// Status codes carried in a STATUS record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Status {
    /// Operation succeeded
    Ok = 0,
    /// Generic failure: malformed input, I/O error, duplicate group
    Error = 1,
    /// Bad login/password or wrong old password
    AuthenticationError = 2,
    /// Another session is active for this login
    AlreadyLoggedIn = 3,
    /// Direct-message target not currently online
    UserNotFound = 4,
    /// Join attempted while already a member
    AlreadyInGroup = 5,
    /// No group with that name
    GroupNotFound = 6,
}

impl Status {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Ok),
            1 => Some(Self::Error),
            2 => Some(Self::AuthenticationError),
            3 => Some(Self::AlreadyLoggedIn),
            4 => Some(Self::UserNotFound),
            5 => Some(Self::AlreadyInGroup),
            6 => Some(Self::GroupNotFound),
            _ => None,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::AuthenticationError => "authentication error",
            Self::AlreadyLoggedIn => "already logged in",
            Self::UserNotFound => "user not found",
            Self::AlreadyInGroup => "already in group",
            Self::GroupNotFound => "group not found",
        };
        f.write_str(text)
    }
}
