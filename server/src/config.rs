use std::path::PathBuf;
use std::time::Duration;

use presence_shared::config::WorldConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid world config: {0}")]
    World(String),
    #[error("{0}")]
    Invalid(&'static str),
    #[error("environment variable {var} is not valid unicode")]
    Env { var: &'static str },
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Directory served for every non-websocket path
    pub static_dir: PathBuf,
    pub world: WorldConfig,
    pub max_connections: usize,
    /// Text frames larger than this close the connection
    pub max_message_bytes: usize,
    /// Unparseable frames tolerated before the connection is closed
    pub max_parse_errors: u32,
    pub max_name_chars: usize,
    /// Queue depth from connections to the hub
    pub command_capacity: usize,
    /// Deliveries a slow connection may fall behind before it starts skipping
    pub broadcast_capacity: usize,
    /// How often the hub logs who is connected
    pub housekeeping_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_string(),
            static_dir: PathBuf::from("public"),
            world: WorldConfig::default(),
            max_connections: 256,
            max_message_bytes: 4096,
            max_parse_errors: 5,
            max_name_chars: 32,
            command_capacity: 1024,
            broadcast_capacity: 1024,
            housekeeping_interval: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    pub const ENV_LISTEN_ADDR: &'static str = "PRESENCE_LISTEN_ADDR";
    pub const ENV_STATIC_DIR: &'static str = "PRESENCE_STATIC_DIR";

    /// Defaults, overridden by `PRESENCE_LISTEN_ADDR` / `PRESENCE_STATIC_DIR`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(addr) = read_env(Self::ENV_LISTEN_ADDR)? {
            config.listen_addr = addr;
        }
        if let Some(dir) = read_env(Self::ENV_STATIC_DIR)? {
            config.static_dir = PathBuf::from(dir);
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.world.validate().map_err(ConfigError::World)?;
        if self.listen_addr.trim().is_empty() {
            return Err(ConfigError::Invalid("listen_addr must not be empty"));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid("max_connections must be > 0"));
        }
        if self.max_message_bytes < 64 {
            return Err(ConfigError::Invalid("max_message_bytes must be >= 64"));
        }
        if self.max_name_chars == 0 {
            return Err(ConfigError::Invalid("max_name_chars must be > 0"));
        }
        if self.command_capacity == 0 || self.broadcast_capacity == 0 {
            return Err(ConfigError::Invalid("channel capacities must be > 0"));
        }
        if self.housekeeping_interval.is_zero() {
            return Err(ConfigError::Invalid("housekeeping_interval must be > 0"));
        }
        Ok(())
    }
}

fn read_env(var: &'static str) -> Result<Option<String>, ConfigError> {
    match std::env::var(var) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => Ok(Some(value)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::Env { var }),
    }
}
