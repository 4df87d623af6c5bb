//! Configuration structs with defaults and RON persistence.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const CONFIG_FILE: &str = "config.ron";

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// TCP listener.
    pub wifi: WifiConfig,
    /// Bluetooth RFCOMM listener.
    pub bluetooth: BluetoothConfig,
    /// TCP socket options.
    pub socket: SocketConfig,
    /// Connection limits.
    pub server: ServerConfig,
    /// Player adapter settings.
    pub player: PlayerConfig,
    /// Logging.
    pub debug: DebugConfig,
}

/// TCP ("WiFi") listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WifiConfig {
    pub enabled: bool,
    /// Address to bind. `::` listens dual-stack on every interface.
    pub bind_address: String,
    pub port: u16,
}

/// Bluetooth listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BluetoothConfig {
    pub enabled: bool,
    /// UUID advertised over SDP. Clients search for it.
    pub service_uuid: String,
    pub service_name: String,
}

/// TCP socket options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SocketConfig {
    pub tcp_nodelay: bool,
    pub keepalive_enabled: bool,
    /// Seconds of idleness before the first keepalive probe.
    pub keepalive_idle_secs: u64,
    /// Seconds between keepalive probes.
    pub keepalive_interval_secs: u64,
    pub keepalive_retries: u32,
}

/// Connection limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Connections beyond this are closed right after accept.
    pub max_connections: usize,
}

/// Player adapter settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlayerConfig {
    /// Name announced to clients.
    pub name: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log filter (error, warn, info, debug, trace, or a full filter string).
    pub log_level: String,
    /// Also write JSON logs to the log directory in debug builds.
    pub log_to_file: bool,
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "::".to_string(),
            port: 34271,
        }
    }
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            service_uuid: "025fe2ae-0762-4bed-90f2-d8d778f020fe".to_string(),
            service_name: "Playlink".to_string(),
        }
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            tcp_nodelay: true,
            keepalive_enabled: true,
            keepalive_idle_secs: 60,
            keepalive_interval_secs: 10,
            keepalive_retries: 3,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: 32,
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            name: "Playlink".to_string(),
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_to_file: true,
        }
    }
}

impl WifiConfig {
    /// Address and port to bind.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .bind_address
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                field: "wifi.bind_address",
                value: self.bind_address.clone(),
            })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Platform config directory for Playlink (`~/.config/playlink` on Linux).
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("playlink"))
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(2)
            .enumerate_arrays(false);
        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(config_dir.join(CONFIG_FILE), serialized).map_err(ConfigError::WriteError)
    }

    /// Re-read the file. Returns `Some(new_config)` if it changed.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let contents = std::fs::read_to_string(config_dir.join(CONFIG_FILE))
            .map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;

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
        assert!(ron_str.contains("port: 34271"));
        assert!(ron_str.contains("max_connections: 32"));
        assert!(ron_str.contains("025fe2ae-0762-4bed-90f2-d8d778f020fe"));
    }

    #[test]
    fn test_missing_section_uses_default() {
        let config: Config = ron::from_str("(wifi: (port: 4000))").unwrap();
        assert_eq!(config.wifi.port, 4000);
        assert!(config.wifi.enabled);
        assert_eq!(config.bluetooth, BluetoothConfig::default());
    }

    #[test]
    fn test_extra_field_ignored() {
        let result: Result<Config, _> = ron::from_str("(future_setting: true)");
        assert!(result.is_ok());
    }

    #[test]
    fn test_socket_addr() {
        let wifi = WifiConfig {
            bind_address: "127.0.0.1".to_string(),
            port: 9000,
            ..WifiConfig::default()
        };
        assert_eq!(wifi.socket_addr().unwrap(), "127.0.0.1:9000".parse().unwrap());
        assert!(WifiConfig::default().socket_addr().unwrap().is_ipv6());
    }

    #[test]
    fn test_bad_bind_address_is_rejected() {
        let wifi = WifiConfig {
            bind_address: "localhost:80".to_string(),
            ..WifiConfig::default()
        };
        assert!(matches!(
            wifi.socket_addr(),
            Err(ConfigError::InvalidValue { field: "wifi.bind_address", .. })
        ));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.wifi.port = 40000;
        config.bluetooth.enabled = true;
        config.player.name = "Kitchen".to_string();

        config.save(dir.path()).unwrap();
        let loaded = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_load_creates_default_file() {
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
        modified.server.max_connections = 4;
        modified.save(dir.path()).unwrap();

        let reloaded = config.reload(dir.path()).unwrap().unwrap();
        assert_eq!(reloaded.server.max_connections, 4);
    }

    #[test]
    fn test_invalid_ron_produces_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{{not valid}}").unwrap();
        assert!(matches!(
            Config::load_or_create(dir.path()),
            Err(ConfigError::ParseError(_))
        ));
    }
}
