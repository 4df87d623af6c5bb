//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Playlink command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "playlink", about = "Remote-control sync server for media players")]
pub struct CliArgs {
    /// TCP port to listen on.
    #[arg(long)]
    pub port: Option<u16>,

    /// Address to bind the TCP listener to.
    #[arg(long)]
    pub bind: Option<String>,

    /// Disable the TCP listener.
    #[arg(long)]
    pub no_wifi: bool,

    /// Enable the Bluetooth RFCOMM listener.
    #[arg(long)]
    pub bluetooth: bool,

    /// Player name announced to clients.
    #[arg(long)]
    pub player_name: Option<String>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(port) = args.port {
            self.wifi.port = port;
        }
        if let Some(ref bind) = args.bind {
            self.wifi.bind_address = bind.clone();
        }
        if args.no_wifi {
            self.wifi.enabled = false;
        }
        if args.bluetooth {
            self.bluetooth.enabled = true;
        }
        if let Some(ref name) = args.player_name {
            self.player.name = name.clone();
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs {
            port: Some(5000),
            no_wifi: true,
            bluetooth: true,
            player_name: Some("Den".to_string()),
            ..CliArgs::default()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.wifi.port, 5000);
        assert!(!config.wifi.enabled);
        assert!(config.bluetooth.enabled);
        assert_eq!(config.player.name, "Den");
        // Non-overridden fields retain defaults
        assert_eq!(config.wifi.bind_address, "::");
        assert_eq!(config.debug.log_level, "info");
    }

    #[test]
    fn test_cli_no_override() {
        let original = Config::default();
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, original);
    }

    #[test]
    fn test_parse_flags() {
        let args = CliArgs::parse_from([
            "playlink",
            "--port",
            "4100",
            "--bind",
            "0.0.0.0",
            "--log-level",
            "debug",
        ]);
        assert_eq!(args.port, Some(4100));
        assert_eq!(args.bind.as_deref(), Some("0.0.0.0"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(!args.no_wifi);
    }
}
