//! Client-side protocol helpers
//!
//! Used by the `chat_client` binary: operator input validation, local
//! commands and server reply classification.

use crate::error::AppError;
use crate::message::{ErrorCode, ServerMessage};

/// Local command that clears the terminal, never sent to the server
pub const CLEAR_COMMAND: &str = "/clear";

/// ANSI sequence: clear screen, cursor home
pub const CLEAR_SCREEN: &str = "\x1B[2J\x1B[1;1H";

/// Operator input typed while chatting
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Clear the local screen
    Clear,
    /// Send this line to the server
    Send(String),
    /// Blank line, nothing to do
    Empty,
}

impl Input {
    pub fn classify(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            Input::Empty
        } else if line.starts_with(CLEAR_COMMAND) {
            Input::Clear
        } else {
            Input::Send(line.to_string())
        }
    }
}

/// Check a name typed by the operator before sending it
pub fn validate_name(input: &str, max_len: usize) -> Result<&str, AppError> {
    let name = input.trim();
    if name.is_empty() || name.len() > max_len {
        return Err(AppError::InvalidName);
    }
    Ok(name)
}

/// How the server answered a registration attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationReply {
    Accepted,
    /// Prompt the operator again
    Retry(ErrorCode),
    /// Some other line arrived first
    Other(String),
}

impl RegistrationReply {
    pub fn from_line(line: &str) -> Self {
        match ServerMessage::parse(line) {
            Some(ServerMessage::Registered) => RegistrationReply::Accepted,
            Some(ServerMessage::Error { code }) => RegistrationReply::Retry(code),
            _ => RegistrationReply::Other(line.to_string()),
        }
    }
}
