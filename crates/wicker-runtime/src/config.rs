//! Server configuration.
//!
//! Defaults merged with `WICKER_`-prefixed environment variables
//! (`WICKER_HOST`, `WICKER_PORT`, `WICKER_ROOT`, `WICKER_GRACE`).

use figment::Figment;
use figment::providers::{Env, Serialized};
use serde::{Deserialize, Serialize};

use wicker_core::{ProcessError, ProcessResult};

/// Listener and shutdown settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Path prefix every API group mounts under.
    pub root: String,
    /// Graceful-shutdown window in seconds.
    pub grace: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5099,
            root: String::new(),
            grace: 5,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `WICKER_*` environment variables.
    pub fn from_env() -> ProcessResult<Self> {
        Figment::from(Serialized::defaults(ServerConfig::default()))
            .merge(Env::prefixed("WICKER_"))
            .extract()
            .map_err(|e| ProcessError::load(format!("invalid server config: {e}")))
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
