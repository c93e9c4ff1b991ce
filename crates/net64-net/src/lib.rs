//! Wire layer for Net64 clients: data model, message codec, framing,
//! transports, and reconnection backoff.

pub mod codec;
pub mod framing;
pub mod model;
pub mod reconnection;
pub mod transport;

pub use codec::{
    ClientMessage, DecodeError, EncodeError, MessageDecoder, PROTOCOL_VERSION, ServerMessage,
    decode_client, decode_server, encode_client, encode_server, frame_server,
};
pub use framing::{FrameConfig, FrameDecoder, FrameError, encode_frame, read_frame, write_frame};
pub use model::{Credentials, Player, PlayerId, PlayerPatch, PlayerUpdate, Server, ServerInfo};
pub use reconnection::{ReconnectConfig, ReconnectState};
pub use transport::{
    Connector, MemoryConnector, TcpConnector, TransportError, connect_with_timeout,
};
