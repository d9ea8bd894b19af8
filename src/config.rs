use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::audit::DEFAULT_LOG_CAPACITY;
use crate::session::SessionRegistry;

/// Server settings, loaded from TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP service listens on.
    pub bind: SocketAddr,
    /// Title given to windows created without one.
    pub default_title: String,
    /// Origin of the map frontend, allowed by CORS when set.
    pub frontend_url: Option<String>,
    /// Cap on concurrently open windows. `None` means unlimited.
    pub max_sessions: Option<usize>,
    /// Entries kept in each window's channel and callback logs.
    pub log_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 5000)),
            default_title: "HSC Map".to_string(),
            frontend_url: None,
            max_sessions: Some(SessionRegistry::DEFAULT_MAX_SESSIONS),
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

impl ServerConfig {
    /// Load config from a TOML file path. Returns None if file doesn't exist.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        config.validate(path)?;
        Ok(Some(config))
    }

    fn validate(&self, path: &Path) -> Result<(), ConfigError> {
        if self.default_title.trim().is_empty() {
            return Err(ConfigError::Invalid(
                path.to_path_buf(),
                "default_title must not be empty".into(),
            ));
        }
        if self.max_sessions == Some(0) {
            return Err(ConfigError::Invalid(
                path.to_path_buf(),
                "max_sessions must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Errors that can occur when loading config.
#[derive(Debug)]
pub enum ConfigError {
    ReadFailed(PathBuf, std::io::Error),
    ParseFailed(PathBuf, toml::de::Error),
    Invalid(PathBuf, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadFailed(path, e) => {
                write!(f, "Failed to read config {}: {}", path.display(), e)
            }
            Self::ParseFailed(path, e) => {
                write!(f, "Failed to parse config {}: {}", path.display(), e)
            }
            Self::Invalid(path, reason) => {
                write!(f, "Invalid config {}: {}", path.display(), reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
