//! Session error types.

use std::time::Duration;

use net64_net::{DecodeError, TransportError};

use crate::auth::AuthError;
use crate::registry::UnknownPlayerUpdate;
use crate::state::ConnectionState;

/// Errors surfaced by a session, either as command results or as the reason
/// behind a `ConnectionErrorSet` event.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Connect, read or write failure. The caller may reconnect.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A frame that could not be decoded. Fatal to the connection.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The server sent something that is not valid in the current state.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// An authentication attempt was rejected locally; wait and retry.
    #[error("authentication throttled, retry in {}s", .remaining.as_secs_f32().ceil())]
    Throttled { remaining: Duration },

    /// A delta for an unregistered player. Logged and ignored.
    #[error(transparent)]
    UnknownPlayerUpdate(#[from] UnknownPlayerUpdate),

    /// A command that makes no sense in the current state.
    #[error("cannot {command} while {state}")]
    InvalidState {
        command: &'static str,
        state: ConnectionState,
    },

    /// The session loop is gone.
    #[error("session closed")]
    Closed,
}

impl SessionError {
    /// Map a local handshake rejection to a command error.
    pub(crate) fn from_auth(err: AuthError, state: &ConnectionState) -> Self {
        match err {
            AuthError::Throttled { remaining } => Self::Throttled { remaining },
            AuthError::AlreadyRequested | AuthError::AlreadyAccepted => Self::InvalidState {
                command: "send credentials",
                state: state.clone(),
            },
            AuthError::Unexpected { .. } => Self::ProtocolViolation(err.to_string()),
        }
    }

    /// Whether an automatic reconnect may follow this failure.
    pub fn is_transport_level(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_human_readable() {
        let err = SessionError::Throttled {
            remaining: Duration::from_millis(29_200),
        };
        assert_eq!(err.to_string(), "authentication throttled, retry in 30s");

        let err = SessionError::InvalidState {
            command: "send credentials",
            state: ConnectionState::Disconnected,
        };
        assert_eq!(err.to_string(), "cannot send credentials while disconnected");
    }

    #[test]
    fn test_auth_errors_map_to_session_errors() {
        let state = ConnectionState::AuthenticationPending;
        let err = SessionError::from_auth(AuthError::AlreadyRequested, &state);
        assert!(matches!(err, SessionError::InvalidState { .. }));

        let err = SessionError::from_auth(
            AuthError::Throttled {
                remaining: Duration::from_secs(3),
            },
            &state,
        );
        assert!(matches!(err, SessionError::Throttled { remaining } if remaining.as_secs() == 3));
        assert!(!err.is_transport_level());
    }
}
