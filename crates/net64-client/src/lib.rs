//! Client side of a Net64 session.
//!
//! A session connects to one server at a time, authenticates, mirrors the
//! server's player list, and reports everything that happens as
//! [`SessionEvent`]s. [`SessionHandle`] drives a session running on the
//! tokio runtime; [`ConnectionMachine`] is the pure state machine underneath
//! and can be driven directly.

pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod machine;
pub mod registry;
pub mod session;
pub mod state;

pub use auth::{AuthError, Handshake, HandshakeState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CLIENT_VERSION, SessionConfig, configured_server};
pub use error::SessionError;
pub use events::{EventEmitter, SessionEvent};
pub use machine::{ConnectionMachine, Effect};
pub use registry::{DeltaOutcome, PlayerMap, PlayerRegistry, UnknownPlayerUpdate};
pub use session::SessionHandle;
pub use state::{ConnectionState, ConnectionStateWatch};

pub use net64_net::{
    Connector, Credentials, MemoryConnector, Player, PlayerId, PlayerPatch, PlayerUpdate, Server,
    ServerInfo, TcpConnector, TransportError,
};
