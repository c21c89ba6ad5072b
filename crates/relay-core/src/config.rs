//! Centralized configuration for the relay engine.
//!
//! Constant tables live on unit structs; the per-session settings that a
//! broker host reads from disk live in [`SessionConfig`].

use crate::{RelayError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Wire and threading limits for the RPC engine.
pub struct RpcConfig;

impl RpcConfig {
    pub const INITIAL_BLOCK_CAPACITY: usize = 1000;
    pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024; // 64MB
    pub const WORKER_THREAD_PREFIX: &'static str = "relay-call";
    /// How long a host waits for a session to finish tearing down.
    pub const DISCONNECT_WAIT: Duration = Duration::from_secs(10);
}

/// Identity of the broker inside a session.
pub struct BrokerConfig;

impl BrokerConfig {
    pub const MODULE_NAME: &'static str = "BROKER";
    pub const SERVICE_NAME: &'static str = "BROKER";
    pub const SERVICE_DISPLAY_NAME: &'static str = "Broker";
    pub const SERVICE_CATEGORY: &'static str = "/Broker";
    pub const SERVICE_ID: i32 = 0;
    pub const VERSION: &'static str = env!("CARGO_PKG_VERSION");
}

/// Settings for one broker session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    /// Gate registry-mutating and filesystem operations from remote callers.
    pub secure: bool,
    /// Where the module registry is persisted. `None` keeps it in memory.
    pub registry_path: Option<PathBuf>,
    pub module_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            secure: true,
            registry_path: None,
            module_name: BrokerConfig::MODULE_NAME.to_string(),
        }
    }
}

impl SessionConfig {
    /// Load settings from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading session config from {}", path.display());
        let text = std::fs::read_to_string(path).map_err(|err| RelayError::Io {
            message: err.to_string(),
            path: Some(path.to_path_buf()),
            source: Some(err),
        })?;
        let config: SessionConfig = serde_json::from_str(&text)?;
        if config.module_name.trim().is_empty() {
            return Err(RelayError::Config {
                message: "moduleName must not be empty".to_string(),
            });
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_is_secure() {
        let config = SessionConfig::default();
        assert!(config.secure);
        assert_eq!(config.module_name, "BROKER");
        assert!(config.registry_path.is_none());
    }

    #[test]
    fn test_load_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, r#"{ "secure": false }"#).unwrap();

        let config = SessionConfig::load(&path).unwrap();
        assert!(!config.secure);
        assert_eq!(config.module_name, "BROKER");
    }

    #[test]
    fn test_load_rejects_empty_name() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, r#"{ "moduleName": "  " }"#).unwrap();

        assert!(matches!(
            SessionConfig::load(&path),
            Err(RelayError::Config { .. })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = SessionConfig::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, RelayError::Io { path: Some(_), .. }));
    }
}
