//! Wire messages and their binary encoding.
//!
//! Every payload is a protocol version byte followed by a [`postcard`] body:
//! `[version: u8] [postcard-encoded message]`. Payloads travel inside frames
//! (see [`crate::framing`]); [`MessageDecoder`] combines the two.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::framing::{FrameConfig, FrameDecoder, FrameError, encode_frame};
use crate::model::{Credentials, Player, PlayerUpdate, ServerInfo};

/// Current wire-protocol version. Prepended to every payload.
pub const PROTOCOL_VERSION: u8 = 1;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Everything a server can send to a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ServerMessage {
    /// Server metadata, sent once authentication succeeds and again on change.
    ServerInfo(ServerInfo),
    /// Full player list replacing whatever the client had.
    PlayerSnapshot(Vec<Player>),
    /// Ordered batch of per-player deltas.
    PlayerDelta(Vec<PlayerUpdate>),
    /// The server wants (new) credentials.
    AuthRequired,
    AuthAccepted,
    /// Credentials rejected; no new attempt before `throttle_seconds` elapse.
    AuthDenied { throttle_seconds: u32 },
    GameModeChanged { mode: u32 },
    /// The server is closing the session.
    Disconnect { reason: String },
}

/// Everything a client can send to a server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ClientMessage {
    /// One authentication attempt.
    Authenticate {
        credentials: Credentials,
        client_version: String,
    },
    /// Polite close before dropping the transport.
    Goodbye,
}

impl ServerMessage {
    /// Short name used in logs and protocol-violation messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ServerInfo(_) => "ServerInfo",
            Self::PlayerSnapshot(_) => "PlayerSnapshot",
            Self::PlayerDelta(_) => "PlayerDelta",
            Self::AuthRequired => "AuthRequired",
            Self::AuthAccepted => "AuthAccepted",
            Self::AuthDenied { .. } => "AuthDenied",
            Self::GameModeChanged { .. } => "GameModeChanged",
            Self::Disconnect { .. } => "Disconnect",
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A payload or frame that cannot be turned into a message.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("empty payload, no version byte")]
    EmptyPayload,

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Unknown variant tag, truncated body, or invalid field encoding.
    #[error("malformed message: {0}")]
    Malformed(#[from] postcard::Error),

    #[error("{0} unexpected trailing bytes after message")]
    TrailingBytes(usize),

    /// The body decodes but is not the encoding this message re-encodes to,
    /// e.g. an overlong varint.
    #[error("non-canonical encoding of {0}")]
    NonCanonical(&'static str),

    /// The frame itself is unusable; the stream cannot be realigned.
    #[error("bad frame: {0}")]
    Frame(#[from] FrameError),
}

/// Failure to turn a message into bytes.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("serialization error: {0}")]
    Postcard(#[from] postcard::Error),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

fn encode_payload<T: Serialize>(msg: &T) -> Result<Vec<u8>, postcard::Error> {
    let body = postcard::to_allocvec(msg)?;
    let mut out = Vec::with_capacity(1 + body.len());
    out.push(PROTOCOL_VERSION);
    out.extend_from_slice(&body);
    Ok(out)
}

fn decode_payload<T: Serialize + DeserializeOwned>(data: &[u8]) -> Result<T, DecodeError> {
    let (&version, body) = data.split_first().ok_or(DecodeError::EmptyPayload)?;
    if version != PROTOCOL_VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }

    let (msg, rest) = postcard::take_from_bytes(body)?;
    if !rest.is_empty() {
        return Err(DecodeError::TrailingBytes(rest.len()));
    }
    // One message, one byte sequence: encode(decode(x)) == x.
    if postcard::to_allocvec(&msg)? != body {
        return Err(DecodeError::NonCanonical(std::any::type_name::<T>()));
    }
    Ok(msg)
}

/// Encode a server message into a versioned payload.
pub fn encode_server(msg: &ServerMessage) -> Result<Vec<u8>, EncodeError> {
    Ok(encode_payload(msg)?)
}

/// Decode a versioned payload into a server message. Pure.
pub fn decode_server(data: &[u8]) -> Result<ServerMessage, DecodeError> {
    decode_payload(data)
}

/// Encode a client message into a versioned payload.
pub fn encode_client(msg: &ClientMessage) -> Result<Vec<u8>, EncodeError> {
    Ok(encode_payload(msg)?)
}

/// Decode a versioned payload into a client message. Pure.
pub fn decode_client(data: &[u8]) -> Result<ClientMessage, DecodeError> {
    decode_payload(data)
}

/// Encode a server message and wrap it in a length-prefixed frame.
pub fn frame_server(msg: &ServerMessage, config: &FrameConfig) -> Result<Vec<u8>, EncodeError> {
    Ok(encode_frame(&encode_server(msg)?, config)?)
}

// ---------------------------------------------------------------------------
// Stream decoding
// ---------------------------------------------------------------------------

/// Turns a raw byte stream from the server into messages, in receipt order.
#[derive(Debug, Default)]
pub struct MessageDecoder {
    frames: FrameDecoder,
}

impl MessageDecoder {
    pub fn new(config: FrameConfig) -> Self {
        Self {
            frames: FrameDecoder::new(config),
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.frames.extend(bytes);
    }

    /// Next message, `Ok(None)` if more bytes are needed.
    ///
    /// A bad payload consumes exactly its own frame, so later frames still
    /// decode. Only [`DecodeError::Frame`] leaves the stream misaligned.
    pub fn next_message(&mut self) -> Result<Option<ServerMessage>, DecodeError> {
        match self.frames.next_frame()? {
            Some(payload) => decode_server(&payload).map(Some),
            None => Ok(None),
        }
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}
