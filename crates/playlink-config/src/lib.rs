//! Configuration for the Playlink server.
//!
//! Settings persist to disk as a RON file (`config.ron`). Missing sections and
//! fields fall back to defaults, unknown fields are ignored, and command-line
//! arguments override whatever the file says.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{
    BluetoothConfig, Config, DebugConfig, PlayerConfig, ServerConfig, SocketConfig, WifiConfig,
    default_config_dir,
};
pub use error::ConfigError;
