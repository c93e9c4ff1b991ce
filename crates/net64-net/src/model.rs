//! Data carried over the wire: servers, players, and partial player updates.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Identifier assigned to a player by the server. Stable for a session.
pub type PlayerId = u32;

/// A connection target plus the display metadata the server advertises.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Server {
    /// Server-list identifier, if the server came from a listing.
    pub id: Option<String>,
    /// Hostname to dial instead of `ip` when present.
    pub domain: Option<String>,
    /// IP address of the server.
    pub ip: String,
    /// TCP port of the server.
    pub port: u16,
    /// Display name.
    pub name: Option<String>,
    /// Free-form description.
    pub description: Option<String>,
    /// ISO country code used for flags in server lists.
    pub country_code: Option<String>,
    /// Server software version.
    pub version: Option<String>,
    /// `Some(true)` / `Some(false)` when known, `None` when the server never said.
    pub password_required: Option<bool>,
    /// Whether this is a dedicated (headless) server.
    pub is_dedicated: bool,
    /// Active game mode id.
    pub game_mode: u32,
    /// Players advertised before connecting.
    pub players: BTreeMap<PlayerId, Player>,
}

impl Server {
    /// Create a target with only an address.
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
            ..Default::default()
        }
    }

    /// Host to dial: the domain if set, otherwise the IP.
    pub fn host(&self) -> &str {
        self.domain.as_deref().unwrap_or(&self.ip)
    }

    /// `(host, port)` pair identifying the endpoint.
    pub fn endpoint(&self) -> (String, u16) {
        (self.host().to_string(), self.port)
    }

    /// Replace the display metadata with what the server reported, keeping the
    /// dialed endpoint and listing id.
    pub fn with_info(&self, info: &ServerInfo) -> Self {
        Self {
            id: self.id.clone(),
            domain: self.domain.clone(),
            ip: self.ip.clone(),
            port: self.port,
            name: info.name.clone(),
            description: info.description.clone(),
            country_code: info.country_code.clone(),
            version: info.version.clone(),
            password_required: info.password_required,
            is_dedicated: info.is_dedicated,
            game_mode: info.game_mode,
            players: self.players.clone(),
        }
    }
}

/// Server metadata sent after a successful authentication.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerInfo {
    pub name: Option<String>,
    pub description: Option<String>,
    pub country_code: Option<String>,
    pub version: Option<String>,
    pub password_required: Option<bool>,
    pub is_dedicated: bool,
    pub game_mode: u32,
}

/// One participant in the shared session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Player {
    pub id: PlayerId,
    pub username: String,
    pub character_id: u32,
    /// Game-specific state, opaque to the network layer.
    pub state: Vec<u8>,
}

impl Player {
    pub fn new(id: PlayerId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            character_id: 0,
            state: Vec::new(),
        }
    }
}

/// Changed fields of a player. `None` means "unchanged".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerPatch {
    pub username: Option<String>,
    pub character_id: Option<u32>,
    pub state: Option<Vec<u8>>,
}

impl PlayerPatch {
    /// A patch carrying every identifying field, enough to create a player.
    pub fn is_complete(&self) -> bool {
        self.username.is_some() && self.character_id.is_some()
    }

    /// Merge the changed fields into `player`.
    pub fn apply_to(&self, player: &mut Player) {
        if let Some(ref username) = self.username {
            player.username = username.clone();
        }
        if let Some(character_id) = self.character_id {
            player.character_id = character_id;
        }
        if let Some(ref state) = self.state {
            player.state = state.clone();
        }
    }

    /// Build a new player from a complete patch.
    pub fn to_player(&self, id: PlayerId) -> Option<Player> {
        let username = self.username.clone()?;
        let character_id = self.character_id?;
        Some(Player {
            id,
            username,
            character_id,
            state: self.state.clone().unwrap_or_default(),
        })
    }
}

impl From<&Player> for PlayerPatch {
    fn from(player: &Player) -> Self {
        Self {
            username: Some(player.username.clone()),
            character_id: Some(player.character_id),
            state: Some(player.state.clone()),
        }
    }
}

/// A delta for one player. A missing patch means the player left.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerUpdate {
    pub player_id: PlayerId,
    pub patch: Option<PlayerPatch>,
}

impl PlayerUpdate {
    /// Update that removes `player_id`.
    pub fn removed(player_id: PlayerId) -> Self {
        Self {
            player_id,
            patch: None,
        }
    }

    /// Update carrying every field of `player`.
    pub fn full(player: &Player) -> Self {
        Self {
            player_id: player.id,
            patch: Some(PlayerPatch::from(player)),
        }
    }

    /// Update carrying only the given fields.
    pub fn changed(player_id: PlayerId, patch: PlayerPatch) -> Self {
        Self {
            player_id,
            patch: Some(patch),
        }
    }

    pub fn is_removal(&self) -> bool {
        self.patch.is_none()
    }
}

/// What the client presents when authenticating.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub character_id: u32,
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, character_id: u32) -> Self {
        Self {
            username: username.into(),
            character_id,
            password: None,
        }
    }

    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}
