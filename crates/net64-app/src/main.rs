//! `net64`: connect to a Net64 server from the command line.
//!
//! Loads `config.ron`, applies CLI overrides, joins the configured server and
//! logs everything the session reports until Ctrl-C.
//!
//! Run with: `cargo run -p net64-app -- --server 10.0.0.5 --username Mario`

mod platform;

use std::process::ExitCode;

use clap::Parser;
use net64_client::{Credentials, SessionConfig, SessionEvent, SessionHandle, configured_server};
use net64_config::{CliArgs, Config};
use tracing::{error, info, warn};

use crate::platform::PlatformDirs;

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    let dirs = match args.config.as_deref() {
        Some(root) => PlatformDirs::with_root(root),
        None => match PlatformDirs::resolve() {
            Ok(dirs) => dirs,
            Err(e) => {
                eprintln!("net64: {e}");
                return ExitCode::FAILURE;
            }
        },
    };
    if let Err(e) = dirs.create_dirs() {
        eprintln!("net64: {e}");
        return ExitCode::FAILURE;
    }

    let mut config = Config::load_or_create(&dirs.config_dir).unwrap_or_else(|e| {
        eprintln!("net64: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    net64_log::init_logging(Some(&dirs.log_dir), cfg!(debug_assertions), Some(&config));
    info!(config_dir = %dirs.config_dir.display(), "Net64 client {}", net64_client::CLIENT_VERSION);

    run(config).await
}

async fn run(config: Config) -> ExitCode {
    let server = configured_server(&config);
    let session = SessionHandle::spawn_tcp(SessionConfig::from(&config));
    let mut events = session.subscribe();

    info!(
        "Joining {}:{} as {} (character {})",
        server.host(),
        server.port,
        config.player.username,
        config.player.character_id
    );
    if let Err(e) = session.connect(server).await {
        error!(error = %e, "Could not start session");
        return ExitCode::FAILURE;
    }

    let mut code = ExitCode::SUCCESS;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, disconnecting");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                match on_event(&session, &config, event).await {
                    Flow::Continue => {}
                    Flow::Exit(exit) => {
                        code = exit;
                        break;
                    }
                }
            }
        }
    }

    session.shutdown().await;
    code
}

enum Flow {
    Continue,
    Exit(ExitCode),
}

async fn on_event(session: &SessionHandle, config: &Config, event: SessionEvent) -> Flow {
    match event {
        SessionEvent::ServerSet(server) => match server.name {
            Some(name) => info!(
                %name,
                version = server.version.as_deref().unwrap_or("?"),
                dedicated = server.is_dedicated,
                game_mode = server.game_mode,
                "Server info"
            ),
            None => info!("Connecting to {}:{}", server.host(), server.port),
        },
        SessionEvent::AuthRequired => {
            let Some(ref password) = config.player.password else {
                error!("Server requires a password, pass one with --password");
                return Flow::Exit(ExitCode::FAILURE);
            };
            let credentials = Credentials::new(config.player.username.clone(), config.player.character_id)
                .with_password(password.clone());
            if let Err(e) = session.send_credentials(credentials).await {
                warn!(error = %e, "Could not send credentials");
            }
        }
        SessionEvent::AuthAccepted => info!("Authenticated"),
        SessionEvent::AuthDenied { throttle_seconds } => {
            warn!("Authentication denied, retry allowed in {throttle_seconds}s");
            if !config.reconnect.retry_after_denied {
                return Flow::Exit(ExitCode::FAILURE);
            }
        }
        SessionEvent::PlayersUpdated(batch) => {
            let players = session.players().borrow().len();
            info!(changes = batch.len(), players, "Players updated");
        }
        SessionEvent::PlayerSet { player_id, player } => info!(
            player_id,
            username = %player.username,
            character = player.character_id,
            "Player"
        ),
        SessionEvent::GameModeSet(mode) => info!(mode, "Game mode changed"),
        SessionEvent::ConnectionErrorSet(reason) => {
            error!(%reason, "Connection error");
            if !config.reconnect.enabled {
                return Flow::Exit(ExitCode::FAILURE);
            }
        }
        SessionEvent::Disconnected { reason } => {
            info!(%reason, "Disconnected");
            if !config.reconnect.enabled {
                return Flow::Exit(ExitCode::SUCCESS);
            }
        }
    }
    Flow::Continue
}
