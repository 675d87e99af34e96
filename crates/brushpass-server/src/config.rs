//! Server configuration from the environment.

use brushpass_core::{GameConfig, GameError};
use std::net::SocketAddr;
use thiserror::Error;

/// Default bind address.
pub const DEFAULT_ADDR: &str = "0.0.0.0:3030";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid bind address {0}: {1}")]
    Addr(String, std::net::AddrParseError),
    #[error("Cannot read config file {0}: {1}")]
    Read(String, std::io::Error),
    #[error("Invalid game config: {0}")]
    Game(#[from] GameError),
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub game: GameConfig,
}

impl ServerConfig {
    /// Read `BRUSHPASS_ADDR` and the optional JSON file named by
    /// `BRUSHPASS_CONFIG`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(
            std::env::var("BRUSHPASS_ADDR").ok(),
            std::env::var("BRUSHPASS_CONFIG").ok(),
        )
    }

    fn from_vars(addr: Option<String>, config_path: Option<String>) -> Result<Self, ConfigError> {
        let addr = addr.unwrap_or_else(|| DEFAULT_ADDR.to_string());
        let addr: SocketAddr = addr.parse().map_err(|e| ConfigError::Addr(addr.clone(), e))?;

        let game = match config_path {
            Some(path) => {
                let json = std::fs::read_to_string(&path).map_err(|e| ConfigError::Read(path, e))?;
                GameConfig::from_json(&json)?
            }
            None => GameConfig::default(),
        };
        Ok(Self { addr, game })
    }
}
