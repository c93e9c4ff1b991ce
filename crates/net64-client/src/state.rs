//! Connection lifecycle states and their observable watch.

use std::fmt;

use tokio::sync::watch;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No transport. Initial state and the state after any clean close.
    #[default]
    Disconnected,
    /// Opening the transport.
    Connecting,
    /// Transport open, waiting for the authentication verdict or for credentials.
    AuthenticationPending,
    /// Authenticated, waiting for the initial server info or player snapshot.
    Authenticated,
    /// Fully synchronized with the server.
    Connected,
    /// Credentials rejected; still connecting, but no attempt until the throttle elapses.
    Denied { throttle_seconds: u32 },
    /// The session ended on a fatal error.
    Error(String),
}

impl ConnectionState {
    /// Whether a transport is (or is being) held in this state.
    pub fn holds_transport(&self) -> bool {
        matches!(
            self,
            Self::Connecting
                | Self::AuthenticationPending
                | Self::Authenticated
                | Self::Connected
                | Self::Denied { .. }
        )
    }

    /// Whether a new `connect` may start from here.
    pub fn can_connect(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Error(_))
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::AuthenticationPending => f.write_str("authentication pending"),
            Self::Authenticated => f.write_str("authenticated"),
            Self::Connected => f.write_str("connected"),
            Self::Denied { throttle_seconds } => write!(f, "denied (retry in {throttle_seconds}s)"),
            Self::Error(reason) => write!(f, "error: {reason}"),
        }
    }
}

/// Observable connection state backed by a [`watch`] channel.
///
/// The state machine is the only writer; any number of tasks may subscribe.
#[derive(Debug)]
pub struct ConnectionStateWatch {
    tx: watch::Sender<ConnectionState>,
}

impl Default for ConnectionStateWatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateWatch {
    /// Create a watch initialized to [`ConnectionState::Disconnected`].
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Disconnected);
        Self { tx }
    }

    pub(crate) fn set(&self, state: ConnectionState) {
        self.tx.send_replace(state);
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> ConnectionState {
        self.tx.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_starts_disconnected() {
        assert_eq!(ConnectionStateWatch::new().current(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_subscriber_receives_updates() {
        let watch = ConnectionStateWatch::new();
        let mut rx = watch.subscribe();

        watch.set(ConnectionState::Connecting);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), ConnectionState::Connecting);

        watch.set(ConnectionState::Denied { throttle_seconds: 30 });
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), ConnectionState::Denied { throttle_seconds: 30 });
    }

    #[test]
    fn test_connect_allowed_only_when_idle() {
        assert!(ConnectionState::Disconnected.can_connect());
        assert!(ConnectionState::Error("boom".into()).can_connect());
        assert!(!ConnectionState::Connected.can_connect());
        assert!(!ConnectionState::Denied { throttle_seconds: 1 }.can_connect());
    }

    #[test]
    fn test_display() {
        assert_eq!(ConnectionState::Denied { throttle_seconds: 30 }.to_string(), "denied (retry in 30s)");
        assert_eq!(ConnectionState::Error("bad frame".into()).to_string(), "error: bad frame");
    }
}
