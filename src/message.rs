//! Message protocol definitions
//!
//! Line-oriented text protocol. Every message in either direction is one
//! `\n`-terminated line:
//!
//! | Direction | Line                  | Meaning                   |
//! |-----------|-----------------------|---------------------------|
//! | C → S     | `/username <name>`    | claim a display name      |
//! | C → S     | anything else         | chat line                 |
//! | S → C     | `OK`                  | name accepted             |
//! | S → C     | `101` / `102` / `103` | see [`ErrorCode`]         |
//! | S → C     | `<name>: <text>`      | chat line from `<name>`   |

use crate::error::AppError;

/// Registration command prefix
pub const REGISTER_COMMAND: &str = "/username";

/// Registration acknowledgment
pub const ACK: &str = "OK";

/// Client → Server message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Claim a display name (may be empty, the handler rejects that)
    Register { name: String },
    /// Chat line to broadcast
    Chat { text: String },
}

impl ClientMessage {
    /// Interpret one trimmed line
    pub fn parse(line: &str) -> Self {
        if let Some(rest) = line.strip_prefix(REGISTER_COMMAND) {
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                return ClientMessage::Register {
                    name: rest.trim().to_string(),
                };
            }
        }
        ClientMessage::Chat {
            text: line.to_string(),
        }
    }

    /// Encode as a wire line
    pub fn to_line(&self) -> String {
        match self {
            ClientMessage::Register { name } => format!("{} {}\n", REGISTER_COMMAND, name),
            ClientMessage::Chat { text } => format!("{}\n", text),
        }
    }
}

/// Server → Client message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Username accepted
    Registered,
    /// Chat line from another client
    Chat { from: String, text: String },
    /// Request rejected
    Error { code: ErrorCode },
}

impl ServerMessage {
    /// Encode as a newline-terminated wire line
    pub fn to_line(&self) -> String {
        match self {
            ServerMessage::Registered => format!("{}\n", ACK),
            ServerMessage::Chat { from, text } => format!("{}: {}\n", from, text),
            ServerMessage::Error { code } => format!("{}\n", code.as_u16()),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_line().into_bytes()
    }

    /// Decode one line received from the server (terminator already removed)
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line == ACK {
            return Some(ServerMessage::Registered);
        }
        if let Some(code) = line.parse::<u16>().ok().and_then(ErrorCode::from_u16) {
            return Some(ServerMessage::Error { code });
        }
        line.split_once(": ").map(|(from, text)| ServerMessage::Chat {
            from: from.to_string(),
            text: text.to_string(),
        })
    }
}

/// Error codes for ServerMessage::Error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Name already in use, pick another one
    NameTaken,
    /// Connection already has a name
    AlreadyRegistered,
    /// Name is empty or too long
    InvalidName,
}

impl ErrorCode {
    pub fn as_u16(self) -> u16 {
        match self {
            ErrorCode::NameTaken => 101,
            ErrorCode::AlreadyRegistered => 102,
            ErrorCode::InvalidName => 103,
        }
    }

    pub fn from_u16(code: u16) -> Option<Self> {
        match code {
            101 => Some(ErrorCode::NameTaken),
            102 => Some(ErrorCode::AlreadyRegistered),
            103 => Some(ErrorCode::InvalidName),
            _ => None,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ErrorCode::NameTaken => "This username is already in use",
            ErrorCode::AlreadyRegistered => "You already have a username",
            ErrorCode::InvalidName => "Username is empty or too long",
        }
    }
}

/// Convert protocol-facing AppError variants to a client reply
///
/// Transport errors have no reply: the connection is closed instead.
impl TryFrom<AppError> for ServerMessage {
    type Error = AppError;

    fn try_from(err: AppError) -> Result<Self, AppError> {
        let code = match err {
            AppError::NameConflict(_) => ErrorCode::NameTaken,
            AppError::AlreadyRegistered => ErrorCode::AlreadyRegistered,
            AppError::InvalidName => ErrorCode::InvalidName,
            other => return Err(other),
        };
        Ok(ServerMessage::Error { code })
    }
}
