//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Net64 client command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "net64", about = "Net64 multiplayer client")]
pub struct CliArgs {
    /// Server IP address.
    #[arg(long)]
    pub server: Option<String>,

    /// Server port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Server hostname, dialed instead of the IP.
    #[arg(long)]
    pub domain: Option<String>,

    #[arg(long)]
    pub username: Option<String>,

    /// Character id to play as.
    #[arg(long)]
    pub character: Option<u32>,

    /// Server password.
    #[arg(long)]
    pub password: Option<String>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Disable automatic reconnects.
    #[arg(long)]
    pub no_reconnect: bool,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref addr) = args.server {
            self.network.server_address = addr.clone();
        }
        if let Some(port) = args.port {
            self.network.server_port = port;
        }
        if let Some(ref domain) = args.domain {
            self.network.server_domain = Some(domain.clone());
        }
        if let Some(ref name) = args.username {
            self.player.username = name.clone();
        }
        if let Some(character) = args.character {
            self.player.character_id = character;
        }
        if let Some(ref password) = args.password {
            self.player.password = Some(password.clone());
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
        if args.no_reconnect {
            self.reconnect.enabled = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs::parse_from([
            "net64",
            "--server",
            "192.168.1.1",
            "--username",
            "Wario",
            "--password",
            "pw",
            "--no-reconnect",
        ]);
        config.apply_cli_overrides(&args);

        assert_eq!(config.network.server_address, "192.168.1.1");
        assert_eq!(config.player.username, "Wario");
        assert_eq!(config.player.password.as_deref(), Some("pw"));
        assert!(!config.reconnect.enabled);
        // Non-overridden fields retain defaults
        assert_eq!(config.network.server_port, 3678);
        assert_eq!(config.player.character_id, 0);
    }

    #[test]
    fn test_cli_no_override() {
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, Config::default());
    }
}
