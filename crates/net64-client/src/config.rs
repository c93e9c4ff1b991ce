//! Runtime settings for one session.

use std::time::Duration;

use net64_config::Config;
use net64_net::{Credentials, FrameConfig, ReconnectConfig, Server};

/// Version string sent with every authentication attempt.
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Everything a session needs besides its connector and clock.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Credentials for the first attempt and automatic retries.
    pub credentials: Credentials,
    pub client_version: String,
    pub connect_timeout: Duration,
    /// How long the server may take to answer an authentication attempt.
    pub auth_timeout: Duration,
    pub write_timeout: Duration,
    pub frame: FrameConfig,
    /// Reconnect after transport failures.
    pub auto_reconnect: bool,
    /// Re-send stored credentials once an auth throttle elapses.
    pub retry_after_denied: bool,
    pub reconnect: ReconnectConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for SessionConfig {
    fn from(config: &Config) -> Self {
        let player = &config.player;
        let reconnect = &config.reconnect;
        Self {
            credentials: Credentials {
                username: player.username.clone(),
                character_id: player.character_id,
                password: player.password.clone(),
            },
            client_version: CLIENT_VERSION.to_string(),
            connect_timeout: config.network.connect_timeout(),
            auth_timeout: config.network.auth_timeout(),
            write_timeout: config.network.write_timeout(),
            frame: FrameConfig {
                max_payload_size: config.network.max_frame_size,
            },
            auto_reconnect: reconnect.enabled,
            retry_after_denied: reconnect.retry_after_denied,
            reconnect: ReconnectConfig {
                initial_delay: reconnect.initial_delay(),
                backoff_multiplier: reconnect.backoff_multiplier,
                max_delay: reconnect.max_delay(),
                max_attempts: reconnect.max_attempts,
                jitter: reconnect.jitter,
            },
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    #[must_use]
    pub fn with_retry_after_denied(mut self, enabled: bool) -> Self {
        self.retry_after_denied = enabled;
        self
    }

    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }
}

/// The server named by the `network` section.
pub fn configured_server(config: &Config) -> Server {
    let mut server = Server::new(config.network.server_address.clone(), config.network.server_port);
    server.domain = config.network.server_domain.clone();
    server
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_built_from_config_file_settings() {
        let mut config = Config::default();
        config.player.username = "Yoshi".to_string();
        config.player.password = Some("egg".to_string());
        config.network.auth_timeout_seconds = 3;
        config.reconnect.enabled = false;
        config.reconnect.max_attempts = 9;

        let session = SessionConfig::from(&config);
        assert_eq!(session.credentials, Credentials::new("Yoshi", 0).with_password("egg"));
        assert_eq!(session.auth_timeout, Duration::from_secs(3));
        assert!(!session.auto_reconnect);
        assert_eq!(session.reconnect.max_attempts, 9);
        assert_eq!(session.frame.max_payload_size, 1_048_576);
    }

    #[test]
    fn test_configured_server_uses_domain() {
        let mut config = Config::default();
        config.network.server_domain = Some("net64.example.org".to_string());
        let server = configured_server(&config);
        assert_eq!(server.endpoint(), ("net64.example.org".to_string(), 3678));
    }
}
