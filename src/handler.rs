//! Per-message state machine
//!
//! Decides what a resolved line does given the sender's registration
//! state. Registry and state are updated here; the event loop carries out
//! the returned [`Action`] on the sockets.

use tracing::{debug, info};

use crate::connection::ConnectionState;
use crate::error::AppError;
use crate::message::{ClientMessage, ServerMessage};
use crate::registry::NameRegistry;

/// What the event loop does with a handled message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send a line back to the sender only
    Reply(ServerMessage),
    /// Fan a line out to every other registered connection
    Broadcast(ServerMessage),
    /// Nothing to send
    Ignore,
}

/// Handle one message from a connection
pub fn handle_message(
    state: &mut ConnectionState,
    registry: &mut NameRegistry,
    msg: ClientMessage,
    max_name_len: usize,
) -> Action {
    let result = match msg {
        ClientMessage::Register { name } => {
            if matches!(state, ConnectionState::Registered { .. }) {
                Err(AppError::AlreadyRegistered)
            } else {
                register(state, registry, name, max_name_len)
            }
        }
        ClientMessage::Chat { text } => match state {
            ConnectionState::Registered { name } => Ok(Action::Broadcast(ServerMessage::Chat {
                from: name.clone(),
                text,
            })),
            ConnectionState::Unregistered => Err(AppError::NotRegistered),
        },
    };

    match result {
        Ok(action) => action,
        Err(err) => {
            debug!("Rejected message: {}", err);
            match ServerMessage::try_from(err) {
                Ok(reply) => Action::Reply(reply),
                Err(_) => Action::Ignore,
            }
        }
    }
}

/// Validate and claim a name, then move to Registered
fn register(
    state: &mut ConnectionState,
    registry: &mut NameRegistry,
    name: String,
    max_name_len: usize,
) -> Result<Action, AppError> {
    if name.is_empty() || name.len() > max_name_len {
        return Err(AppError::InvalidName);
    }
    registry.claim(&name)?;
    info!("Username '{}' registered", name);
    *state = ConnectionState::Registered { name };
    Ok(Action::Reply(ServerMessage::Registered))
}
