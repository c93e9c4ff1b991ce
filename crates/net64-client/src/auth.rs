//! Authentication handshake and server-mandated retry throttling.
//!
//! ```text
//! Idle --begin--> Requested --accepted--> Accepted
//!   ^                 |
//!   +----denied(t)----+   (deadline = now + t)
//!   +----required-----+
//! ```
//!
//! Each [`AuthDenied`](net64_net::ServerMessage::AuthDenied) replaces the
//! previous deadline rather than extending it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use net64_net::{ClientMessage, Credentials};

use crate::clock::Clock;

/// Where the current authentication attempt stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// No attempt outstanding.
    Idle,
    /// An attempt was sent; waiting for the server's verdict.
    Requested,
    /// The server accepted. Terminal for this connection.
    Accepted,
}

/// Handshake failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Local rejection: the server's throttle has not elapsed yet.
    #[error("authentication throttled, retry in {}s", .remaining.as_secs_f32().ceil())]
    Throttled { remaining: Duration },

    /// An attempt is already waiting for the server.
    #[error("an authentication attempt is already in progress")]
    AlreadyRequested,

    #[error("already authenticated")]
    AlreadyAccepted,

    /// The server answered something that was never asked.
    #[error("unexpected {message} while handshake is {state:?}")]
    Unexpected {
        message: &'static str,
        state: HandshakeState,
    },
}

/// One server's authentication handshake.
pub struct Handshake {
    clock: Arc<dyn Clock>,
    state: HandshakeState,
    throttle_deadline: Option<Instant>,
    client_version: String,
}

impl std::fmt::Debug for Handshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handshake")
            .field("state", &self.state)
            .field("throttle_deadline", &self.throttle_deadline)
            .finish_non_exhaustive()
    }
}

impl Handshake {
    pub fn new(clock: Arc<dyn Clock>, client_version: impl Into<String>) -> Self {
        Self {
            clock,
            state: HandshakeState::Idle,
            throttle_deadline: None,
            client_version: client_version.into(),
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Start an attempt and return the message to send.
    ///
    /// Fails without side effects while throttled or when an attempt is
    /// already outstanding or accepted.
    pub fn begin(&mut self, credentials: &Credentials) -> Result<ClientMessage, AuthError> {
        match self.state {
            HandshakeState::Requested => return Err(AuthError::AlreadyRequested),
            HandshakeState::Accepted => return Err(AuthError::AlreadyAccepted),
            HandshakeState::Idle => {}
        }
        if let Some(remaining) = self.remaining_throttle() {
            return Err(AuthError::Throttled { remaining });
        }

        self.state = HandshakeState::Requested;
        tracing::debug!(username = %credentials.username, has_password = credentials.password.is_some(), "Authentication requested");
        Ok(ClientMessage::Authenticate {
            credentials: credentials.clone(),
            client_version: self.client_version.clone(),
        })
    }

    /// The server wants credentials; the outstanding attempt is spent.
    pub fn on_required(&mut self) -> Result<(), AuthError> {
        self.expect_requested("AuthRequired")?;
        self.state = HandshakeState::Idle;
        Ok(())
    }

    pub fn on_accepted(&mut self) -> Result<(), AuthError> {
        self.expect_requested("AuthAccepted")?;
        self.state = HandshakeState::Accepted;
        self.throttle_deadline = None;
        Ok(())
    }

    /// Record the rejection and its throttle. Replaces any earlier deadline.
    pub fn on_denied(&mut self, throttle_seconds: u32) -> Result<(), AuthError> {
        self.expect_requested("AuthDenied")?;
        self.state = HandshakeState::Idle;
        self.throttle_deadline =
            Some(self.clock.now() + Duration::from_secs(u64::from(throttle_seconds)));
        Ok(())
    }

    /// Time left before a new attempt is allowed, if any.
    pub fn remaining_throttle(&self) -> Option<Duration> {
        let deadline = self.throttle_deadline?;
        let remaining = deadline.saturating_duration_since(self.clock.now());
        (!remaining.is_zero()).then_some(remaining)
    }

    /// Prepare for a new connection to the same server. The throttle survives.
    pub fn reset(&mut self) {
        self.state = HandshakeState::Idle;
    }

    /// Drop the throttle, used when switching to a different server.
    pub fn forget_throttle(&mut self) {
        self.throttle_deadline = None;
    }

    fn expect_requested(&self, message: &'static str) -> Result<(), AuthError> {
        if self.state == HandshakeState::Requested {
            Ok(())
        } else {
            Err(AuthError::Unexpected {
                message,
                state: self.state,
            })
        }
    }
}
