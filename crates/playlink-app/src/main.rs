//! Playlink server binary.
//!
//! Loads `config.ron`, applies command-line overrides, starts the enabled
//! transports with an in-memory demo player and runs until Ctrl-C.
//!
//! Run with: `cargo run -p playlink-app -- --port 34271`

mod demo;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use playlink_config::{CliArgs, Config, ConfigError, default_config_dir};
use playlink_server::{
    BluetoothSettings, Server, ServerConfig, ServerError, SocketConfig, SyncHandle, TcpSettings,
};
use tracing::info;

use crate::demo::DemoPlayer;

#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error("failed to start the async runtime: {0}")]
    Runtime(std::io::Error),
}

fn main() -> ExitCode {
    let args = CliArgs::parse();

    let config_dir = args.config.clone().or_else(default_config_dir);
    let mut config = match &config_dir {
        Some(dir) => match Config::load_or_create(dir) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("playlink: {}", AppError::from(e));
                return ExitCode::FAILURE;
            }
        },
        None => Config::default(),
    };
    config.apply_cli_overrides(&args);

    let log_dir = config_dir.as_ref().map(|d| d.join("logs"));
    playlink_log::init_logging(log_dir.as_deref(), cfg!(debug_assertions), Some(&config));

    info!("Playlink {}", env!("CARGO_PKG_VERSION"));

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: Config) -> Result<(), AppError> {
    let server_config = server_config(&config)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(AppError::Runtime)?;

    runtime.block_on(async move {
        let (sync, events) = SyncHandle::channel();
        let player = Arc::new(DemoPlayer::new(config.player.name.clone(), sync.clone()));
        let mut server = Server::new(server_config, player, sync, events)
            .start()
            .await?;

        if let Some(addr) = server.tcp_addr() {
            info!("Listening on {addr}");
        }

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::warn!("Cannot listen for Ctrl-C: {e}");
                }
            }
            () = server.stopped() => {
                tracing::warn!("All listeners stopped");
            }
        }

        server.shutdown().await;
        Ok::<(), AppError>(())
    })
}

/// Translate the persisted config into server settings.
fn server_config(config: &Config) -> Result<ServerConfig, ConfigError> {
    let tcp = if config.wifi.enabled {
        let socket = &config.socket;
        Some(TcpSettings {
            bind_addr: config.wifi.socket_addr()?,
            socket: SocketConfig {
                tcp_nodelay: socket.tcp_nodelay,
                keepalive_enabled: socket.keepalive_enabled,
                keepalive_idle: Duration::from_secs(socket.keepalive_idle_secs),
                keepalive_interval: Duration::from_secs(socket.keepalive_interval_secs),
                keepalive_retries: socket.keepalive_retries,
                ..SocketConfig::default()
            },
        })
    } else {
        None
    };

    let bluetooth = config.bluetooth.enabled.then(|| BluetoothSettings {
        service_uuid: config.bluetooth.service_uuid.clone(),
        service_name: config.bluetooth.service_name.clone(),
    });

    Ok(ServerConfig {
        tcp,
        bluetooth,
        max_connections: config.server.max_connections,
    })
}
