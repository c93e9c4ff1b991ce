//! The connection state machine.
//!
//! [`ConnectionMachine`] is the only code allowed to change a session's
//! [`ConnectionState`]. It performs no I/O: each input returns the
//! [`Effect`]s the owner must carry out, in order. The session loop feeds it
//! commands, transport notifications, decoded messages and timer expiries.
//!
//! | From                  | Input                     | To                    |
//! |-----------------------|---------------------------|-----------------------|
//! | Disconnected / Error  | connect                   | Connecting            |
//! | Connecting            | transport ready           | AuthenticationPending |
//! | Connecting            | transport failed          | Error                 |
//! | AuthenticationPending | AuthAccepted              | Authenticated         |
//! | AuthenticationPending | AuthDenied(t)             | Denied(t)             |
//! | Denied                | credentials / retry due   | AuthenticationPending |
//! | Authenticated         | ServerInfo/PlayerSnapshot | Connected             |
//! | Connected             | PlayerDelta/GameMode/...  | Connected             |
//! | transport held        | Disconnect / lost / user  | Disconnected          |
//! | any                   | decode/protocol error     | Error                 |

use std::sync::Arc;
use std::time::Duration;

use net64_net::{
    ClientMessage, Credentials, DecodeError, PlayerUpdate, ReconnectState, Server, ServerMessage,
    TransportError,
};

use crate::auth::{AuthError, Handshake, HandshakeState};
use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::events::{EventEmitter, SessionEvent};
use crate::registry::{DeltaOutcome, PlayerRegistry};
use crate::state::{ConnectionState, ConnectionStateWatch};

/// Work the owner of the machine must perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Start opening a transport.
    Open { host: String, port: u16 },
    /// Encode and write a message on the current transport.
    Send(ClientMessage),
    /// Drop the transport (or cancel the pending open) and every pending timer.
    Close,
    /// Call [`ConnectionMachine::on_auth_retry_due`] after the delay.
    ScheduleAuthRetry(Duration),
    /// Call [`ConnectionMachine::on_reconnect_due`] after the delay.
    ScheduleReconnect(Duration),
}

pub struct ConnectionMachine {
    state: ConnectionStateWatch,
    handshake: Handshake,
    registry: PlayerRegistry,
    events: EventEmitter,
    credentials: Credentials,
    /// What the user asked to connect to.
    target: Option<Server>,
    /// Target merged with the metadata the server reported.
    server: Option<Server>,
    /// Endpoint the current throttle deadline belongs to.
    throttled_endpoint: Option<(String, u16)>,
    reconnect: ReconnectState,
    auto_reconnect: bool,
    retry_after_denied: bool,
}

impl std::fmt::Debug for ConnectionMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionMachine")
            .field("state", &self.state.current())
            .field("handshake", &self.handshake)
            .field("players", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl ConnectionMachine {
    pub fn new(config: &SessionConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: ConnectionStateWatch::new(),
            handshake: Handshake::new(clock, config.client_version.clone()),
            registry: PlayerRegistry::new(),
            events: EventEmitter::new(),
            credentials: config.credentials.clone(),
            target: None,
            server: None,
            throttled_endpoint: None,
            reconnect: ReconnectState::new(config.reconnect.clone()),
            auto_reconnect: config.auto_reconnect,
            retry_after_denied: config.retry_after_denied,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.current()
    }

    pub fn state_watch(&self) -> &ConnectionStateWatch {
        &self.state
    }

    pub fn registry(&self) -> &PlayerRegistry {
        &self.registry
    }

    pub fn events_mut(&mut self) -> &mut EventEmitter {
        &mut self.events
    }

    /// Current server, with server-reported metadata once known.
    pub fn server(&self) -> Option<&Server> {
        self.server.as_ref()
    }

    /// Whether an authentication attempt is waiting for the server's verdict.
    pub fn awaiting_auth_reply(&self) -> bool {
        self.state.current() == ConnectionState::AuthenticationPending
            && self.handshake.state() == HandshakeState::Requested
    }

    // --- Commands ---

    /// Start a session with `server`. Only valid from `Disconnected` or `Error`.
    pub fn connect(&mut self, server: Server) -> Result<Vec<Effect>, SessionError> {
        let state = self.state.current();
        if !state.can_connect() {
            return Err(SessionError::InvalidState {
                command: "connect",
                state,
            });
        }
        self.reconnect.reset();
        // Unread events from an earlier session are stale now. Reconnect
        // attempts keep them: they belong to the same session.
        self.events.clear_backlog();
        Ok(self.start_connect(server))
    }

    /// Present new credentials. Valid while waiting for them or while denied.
    pub fn send_credentials(&mut self, credentials: Credentials) -> Result<Vec<Effect>, SessionError> {
        let state = self.state.current();
        if !matches!(
            state,
            ConnectionState::AuthenticationPending | ConnectionState::Denied { .. }
        ) {
            return Err(SessionError::InvalidState {
                command: "send credentials",
                state,
            });
        }

        let msg = self
            .handshake
            .begin(&credentials)
            .map_err(|e| SessionError::from_auth(e, &state))?;
        self.credentials = credentials;
        self.transition(ConnectionState::AuthenticationPending);
        Ok(vec![Effect::Send(msg)])
    }

    /// Close the session on the user's request.
    pub fn disconnect(&mut self) -> Result<Vec<Effect>, SessionError> {
        let state = self.state.current();
        match state {
            ConnectionState::Disconnected => Err(SessionError::InvalidState {
                command: "disconnect",
                state,
            }),
            ConnectionState::Error(_) => {
                // Already reported; just settle and cancel any pending reconnect.
                self.transition(ConnectionState::Disconnected);
                Ok(vec![Effect::Close])
            }
            ConnectionState::Connecting => Ok(self.close_session("disconnected by user", false)),
            _ => {
                let mut effects = vec![Effect::Send(ClientMessage::Goodbye)];
                effects.extend(self.close_session("disconnected by user", false));
                Ok(effects)
            }
        }
    }

    // --- Transport ---

    pub fn on_transport_ready(&mut self) -> Vec<Effect> {
        if self.state.current() != ConnectionState::Connecting {
            tracing::warn!(state = %self.state.current(), "Ignoring stale transport");
            return Vec::new();
        }
        tracing::info!("Transport ready, authenticating");
        self.transition(ConnectionState::AuthenticationPending);
        self.begin_auth()
    }

    /// Opening the transport failed or timed out.
    pub fn on_transport_failed(&mut self, err: TransportError) -> Vec<Effect> {
        if self.state.current() != ConnectionState::Connecting {
            return self.on_transport_lost(err);
        }
        self.fail(SessionError::Transport(err))
    }

    /// An established transport broke or was closed by the peer.
    pub fn on_transport_lost(&mut self, err: TransportError) -> Vec<Effect> {
        match self.state.current() {
            ConnectionState::Connecting => self.fail(SessionError::Transport(err)),
            state if state.holds_transport() => {
                tracing::warn!(error = %err, "Transport lost");
                self.close_session(&err.to_string(), true)
            }
            _ => Vec::new(),
        }
    }

    pub fn on_decode_error(&mut self, err: DecodeError) -> Vec<Effect> {
        if !self.state.current().holds_transport() {
            return Vec::new();
        }
        self.fail(SessionError::Decode(err))
    }

    // --- Timers ---

    /// The server did not answer an authentication attempt in time.
    pub fn on_auth_timeout(&mut self, waited: Duration) -> Vec<Effect> {
        if !self.awaiting_auth_reply() {
            return Vec::new();
        }
        self.fail(SessionError::Transport(TransportError::ResponseTimeout(waited)))
    }

    pub fn on_auth_retry_due(&mut self) -> Vec<Effect> {
        if !matches!(self.state.current(), ConnectionState::Denied { .. }) {
            return Vec::new();
        }
        tracing::info!("Throttle elapsed, retrying authentication");
        self.begin_auth()
    }

    pub fn on_reconnect_due(&mut self) -> Vec<Effect> {
        if !self.state.current().can_connect() {
            return Vec::new();
        }
        match self.target.clone() {
            Some(target) => {
                tracing::info!(attempt = self.reconnect.attempts(), host = target.host(), "Reconnecting");
                self.start_connect(target)
            }
            None => Vec::new(),
        }
    }

    // --- Messages ---

    pub fn on_message(&mut self, msg: ServerMessage) -> Vec<Effect> {
        let state = self.state.current();
        tracing::debug!(kind = msg.kind(), %state, "Received message");

        match (msg, &state) {
            (ServerMessage::Disconnect { reason }, s) if s.holds_transport() => {
                tracing::info!(%reason, "Server closed the session");
                self.close_session(&reason, false)
            }

            (ServerMessage::AuthRequired, _) => match self.handshake.on_required() {
                Ok(()) => {
                    self.events.emit(SessionEvent::AuthRequired);
                    Vec::new()
                }
                Err(e) => self.violation(e),
            },
            (ServerMessage::AuthAccepted, _) => match self.handshake.on_accepted() {
                Ok(()) => {
                    self.throttled_endpoint = None;
                    self.transition(ConnectionState::Authenticated);
                    self.events.emit(SessionEvent::AuthAccepted);
                    Vec::new()
                }
                Err(e) => self.violation(e),
            },
            (ServerMessage::AuthDenied { throttle_seconds }, _) => {
                match self.handshake.on_denied(throttle_seconds) {
                    Ok(()) => {
                        tracing::warn!(throttle_seconds, "Authentication denied");
                        self.throttled_endpoint = self.target.as_ref().map(Server::endpoint);
                        self.enter_denied(throttle_seconds, Duration::from_secs(u64::from(throttle_seconds)))
                    }
                    Err(e) => self.violation(e),
                }
            }

            (
                ServerMessage::ServerInfo(info),
                ConnectionState::Authenticated | ConnectionState::Connected,
            ) => {
                let base = self.target.clone().unwrap_or_default();
                let server = base.with_info(&info);
                self.server = Some(server.clone());
                self.events.emit(SessionEvent::ServerSet(server));
                self.mark_connected();
                Vec::new()
            }
            (
                ServerMessage::PlayerSnapshot(players),
                ConnectionState::Authenticated | ConnectionState::Connected,
            ) => {
                let batch = self.registry.apply_snapshot(players);
                self.events.emit(SessionEvent::PlayersUpdated(batch));
                self.mark_connected();
                Vec::new()
            }
            (ServerMessage::PlayerDelta(updates), ConnectionState::Connected) => {
                self.apply_deltas(updates);
                Vec::new()
            }
            (ServerMessage::GameModeChanged { mode }, ConnectionState::Connected) => {
                if let Some(server) = self.server.as_mut() {
                    server.game_mode = mode;
                }
                self.events.emit(SessionEvent::GameModeSet(mode));
                Vec::new()
            }

            (msg, state) => {
                let reason = format!("unexpected {} while {state}", msg.kind());
                self.fail(SessionError::ProtocolViolation(reason))
            }
        }
    }

    // --- Internals ---

    fn start_connect(&mut self, server: Server) -> Vec<Effect> {
        let (host, port) = server.endpoint();
        if self.throttled_endpoint.as_ref() != Some(&(host.clone(), port)) {
            self.handshake.forget_throttle();
            self.throttled_endpoint = None;
        }
        self.handshake.reset();
        self.registry.clear();
        self.target = Some(server.clone());
        self.server = Some(server.clone());

        tracing::info!(%host, port, "Connecting");
        self.transition(ConnectionState::Connecting);
        self.events.emit(SessionEvent::ServerSet(server));
        vec![Effect::Open { host, port }]
    }

    fn begin_auth(&mut self) -> Vec<Effect> {
        match self.handshake.begin(&self.credentials) {
            Ok(msg) => {
                self.transition(ConnectionState::AuthenticationPending);
                vec![Effect::Send(msg)]
            }
            Err(AuthError::Throttled { remaining }) => {
                let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
                let throttle_seconds = u32::try_from(secs).unwrap_or(u32::MAX);
                tracing::info!(throttle_seconds, "Authentication still throttled");
                self.enter_denied(throttle_seconds, remaining)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Authentication not started");
                Vec::new()
            }
        }
    }

    fn enter_denied(&mut self, throttle_seconds: u32, wait: Duration) -> Vec<Effect> {
        self.transition(ConnectionState::Denied { throttle_seconds });
        self.events.emit(SessionEvent::AuthDenied { throttle_seconds });
        if self.retry_after_denied {
            vec![Effect::ScheduleAuthRetry(wait)]
        } else {
            Vec::new()
        }
    }

    fn apply_deltas(&mut self, updates: Vec<PlayerUpdate>) {
        let mut applied = Vec::with_capacity(updates.len());
        let mut changed = Vec::new();
        for update in updates {
            match self.registry.apply_delta(&update) {
                Ok(DeltaOutcome::Joined(player) | DeltaOutcome::Changed(player)) => {
                    changed.push(player);
                    applied.push(update);
                }
                Ok(DeltaOutcome::Left(_)) => applied.push(update),
                Err(unknown) => tracing::debug!(error = %unknown, "Delta dropped"),
            }
        }

        if !applied.is_empty() {
            self.events.emit(SessionEvent::PlayersUpdated(applied));
        }
        for player in changed {
            self.events.emit(SessionEvent::PlayerSet {
                player_id: player.id,
                player,
            });
        }
    }

    fn mark_connected(&mut self) {
        if self.state.current() == ConnectionState::Connected {
            return;
        }
        self.reconnect.reset();
        self.transition(ConnectionState::Connected);
        tracing::info!(players = self.registry.len(), "Session connected");
    }

    fn violation(&mut self, err: AuthError) -> Vec<Effect> {
        self.fail(SessionError::ProtocolViolation(err.to_string()))
    }

    /// End the session on a fatal error: one `ConnectionErrorSet`, state `Error`.
    fn fail(&mut self, err: SessionError) -> Vec<Effect> {
        let reason = err.to_string();
        tracing::error!(%reason, state = %self.state.current(), "Session failed");

        self.registry.clear();
        self.handshake.reset();
        self.transition(ConnectionState::Error(reason.clone()));
        self.events.emit(SessionEvent::ConnectionErrorSet(reason));

        let mut effects = vec![Effect::Close];
        if err.is_transport_level() {
            effects.extend(self.schedule_reconnect());
        }
        effects
    }

    /// End the session cleanly: one `Disconnected`, state `Disconnected`.
    fn close_session(&mut self, reason: &str, reconnect: bool) -> Vec<Effect> {
        self.registry.clear();
        self.handshake.reset();
        self.transition(ConnectionState::Disconnected);
        self.events.emit(SessionEvent::Disconnected {
            reason: reason.to_string(),
        });

        let mut effects = vec![Effect::Close];
        if reconnect {
            effects.extend(self.schedule_reconnect());
        }
        effects
    }

    fn schedule_reconnect(&mut self) -> Vec<Effect> {
        if !self.auto_reconnect || self.target.is_none() {
            return Vec::new();
        }
        let floor = self.handshake.remaining_throttle().unwrap_or_default();
        match self.reconnect.next_delay_at_least(floor) {
            Some(delay) => {
                tracing::info!(attempt = self.reconnect.attempts(), ?delay, "Scheduling reconnect");
                vec![Effect::ScheduleReconnect(delay)]
            }
            None => {
                tracing::warn!(attempts = self.reconnect.attempts(), "Giving up on reconnecting");
                Vec::new()
            }
        }
    }

    fn transition(&mut self, to: ConnectionState) {
        let from = self.state.current();
        if from != to {
            tracing::debug!(%from, %to, "Connection state changed");
            self.state.set(to);
        }
    }
}
