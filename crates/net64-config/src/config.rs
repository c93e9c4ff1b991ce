//! Configuration structs with defaults and RON persistence.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const CONFIG_FILE: &str = "config.ron";

/// Top-level client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Server target and transport limits.
    pub network: NetworkConfig,
    /// Identity presented when authenticating.
    pub player: PlayerConfig,
    /// Automatic reconnect policy.
    pub reconnect: ReconnectSettings,
    pub debug: DebugConfig,
}

/// Server target, timeouts and framing limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    pub server_address: String,
    pub server_port: u16,
    /// Hostname dialed instead of `server_address` when set.
    pub server_domain: Option<String>,
    /// Upper bound for opening the transport.
    pub connect_timeout_seconds: u32,
    /// Upper bound for the server to answer an authentication attempt.
    pub auth_timeout_seconds: u32,
    pub write_timeout_seconds: u32,
    /// Largest frame payload accepted or sent, in bytes.
    pub max_frame_size: u32,
}

/// Who the client claims to be.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlayerConfig {
    pub username: String,
    pub character_id: u32,
    /// Password sent with the first attempt, for password-protected servers.
    pub password: Option<String>,
}

/// Automatic reconnect behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconnectSettings {
    /// Reconnect after transport failures.
    pub enabled: bool,
    /// Re-send stored credentials once an auth throttle elapses.
    pub retry_after_denied: bool,
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// ± fraction applied to each delay.
    pub jitter: f64,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log filter (e.g. "debug", "info,net64_client=trace").
    pub log_level: String,
}

// --- Default implementations ---

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1".to_string(),
            server_port: 3678,
            server_domain: None,
            connect_timeout_seconds: 10,
            auth_timeout_seconds: 15,
            write_timeout_seconds: 10,
            max_frame_size: 1_048_576,
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            username: "Player".to_string(),
            character_id: 0,
            password: None,
        }
    }
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            retry_after_denied: true,
            max_attempts: 5,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl NetworkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.connect_timeout_seconds))
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.auth_timeout_seconds))
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.write_timeout_seconds))
    }
}

impl ReconnectSettings {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(invalid(
                "reconnect.backoff_multiplier",
                format!("must be a finite number >= 1.0, got {}", self.backoff_multiplier),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(invalid(
                "reconnect.jitter",
                format!("must be within 0.0..=1.0, got {}", self.jitter),
            ));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(invalid(
                "reconnect.max_delay_ms",
                format!("{} is below initial_delay_ms {}", self.max_delay_ms, self.initial_delay_ms),
            ));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: String) -> ConfigError {
    ConfigError::InvalidValue { field, reason }
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            config.validate()?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Reject values that parse but cannot drive a session.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.max_frame_size == 0 {
            return Err(invalid("network.max_frame_size", "must be non-zero".to_string()));
        }
        self.reconnect.validate()
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);
        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(config_dir.join(CONFIG_FILE), serialized).map_err(ConfigError::WriteError)
    }

    /// Re-read the file: `Some(new_config)` if it differs from `self`.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let contents = std::fs::read_to_string(config_dir.join(CONFIG_FILE))
            .map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
        new_config.validate()?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_serializes() {
        let ron_str =
            ron::ser::to_string_pretty(&Config::default(), ron::ser::PrettyConfig::new()).unwrap();
        assert!(ron_str.contains("server_port: 3678"));
        assert!(ron_str.contains("username: \"Player\""));
    }

    #[test]
    fn test_missing_section_uses_default() {
        let config: Config = ron::from_str("(network: (server_port: 4000))").unwrap();
        assert_eq!(config.network.server_port, 4000);
        assert_eq!(config.network.server_address, "127.0.0.1");
        assert_eq!(config.reconnect, ReconnectSettings::default());
        assert_eq!(config.player, PlayerConfig::default());
    }

    #[test]
    fn test_extra_field_ignored() {
        let result: Result<Config, _> = ron::from_str("(emulator_path: \"/tmp/mupen\")");
        assert!(result.is_ok());
    }

    #[test]
    fn test_password_is_optional() {
        let config: Config =
            ron::from_str("(player: (username: \"Mario\", password: Some(\"hunter2\")))").unwrap();
        assert_eq!(config.player.username, "Mario");
        assert_eq!(config.player.password.as_deref(), Some("hunter2"));
        assert_eq!(Config::default().player.password, None);
    }

    #[test]
    fn test_durations() {
        let config = Config::default();
        assert_eq!(config.network.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.network.auth_timeout(), Duration::from_secs(15));
        assert_eq!(config.reconnect.initial_delay(), Duration::from_secs(1));
        assert_eq!(config.reconnect.max_delay(), Duration::from_secs(30));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.network.server_address = "10.0.0.1".to_string();
        config.network.server_domain = Some("net64.example.org".to_string());
        config.player.password = Some("secret".to_string());
        config.reconnect.enabled = false;

        config.save(dir.path()).unwrap();
        let loaded = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_load_or_create_writes_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert!(dir.path().join(CONFIG_FILE).exists());
    }

    #[test]
    fn test_reload_detects_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();
        assert!(config.reload(dir.path()).unwrap().is_none());

        let mut modified = config.clone();
        modified.network.server_port = 4000;
        modified.save(dir.path()).unwrap();

        let reloaded = config.reload(dir.path()).unwrap().unwrap();
        assert_eq!(reloaded.network.server_port, 4000);
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_unusable_backoff_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "(reconnect: (backoff_multiplier: -2.0))",
        )
        .unwrap();
        let result = Config::load_or_create(dir.path());
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { field: "reconnect.backoff_multiplier", .. })
        ));
    }

    #[test]
    fn test_out_of_range_reconnect_values_rejected() {
        let mut config = Config::default();
        config.reconnect.jitter = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "reconnect.jitter", .. })
        ));

        let mut config = Config::default();
        config.reconnect.max_delay_ms = 10;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "reconnect.max_delay_ms", .. })
        ));

        let mut config = Config::default();
        config.reconnect.backoff_multiplier = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reload_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        std::fs::write(dir.path().join(CONFIG_FILE), "(network: (max_frame_size: 0))").unwrap();
        assert!(matches!(
            config.reload(dir.path()),
            Err(ConfigError::InvalidValue { field: "network.max_frame_size", .. })
        ));
    }

    #[test]
    fn test_invalid_ron_produces_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{{not valid}}").unwrap();
        let result = Config::load_or_create(dir.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }
}
