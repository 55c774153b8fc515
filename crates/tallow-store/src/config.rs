//! Configuration: TOML file with environment overrides
//!
//! Precedence, lowest to highest: built-in defaults, `config.toml` in the
//! data dir, then the environment variables `RELAY_URL`, `STUN_SERVERS`
//! (comma-separated), `TURN_URL`, `TURN_USERNAME`, `TURN_CREDENTIAL`,
//! `APP_URL`, and `DATA_DIR`.

use crate::error::Result;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default public STUN servers used for NAT classification
const DEFAULT_STUN_SERVERS: &[&str] = &[
    "stun.l.google.com:19302",
    "stun.cloudflare.com:3478",
];

/// Runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Relay server address
    pub relay_url: String,
    /// STUN servers for NAT classification (at least two recommended)
    pub stun_servers: Vec<String>,
    /// TURN server, if available
    pub turn_url: Option<String>,
    /// TURN credentials
    pub turn_username: Option<String>,
    /// TURN credentials
    pub turn_credential: Option<String>,
    /// Application/signaling base URL
    pub app_url: Option<String>,
    /// Data directory (records, identity, partial payloads)
    pub data_dir: PathBuf,
    /// Privacy mode: only relay candidates, no host/reflexive exposure
    pub privacy_mode: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay_url: "relay.tallow.app:4433".to_string(),
            stun_servers: DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect(),
            turn_url: None,
            turn_username: None,
            turn_credential: None,
            app_url: None,
            data_dir: paths::data_dir(),
            privacy_mode: false,
        }
    }
}

impl Config {
    /// Load configuration with full precedence
    pub fn load() -> Result<Self> {
        let data_dir = paths::data_dir();
        let mut config = Self::load_file(&paths::config_file(&data_dir))?;
        config.data_dir = data_dir;
        config.apply_env();
        Ok(config)
    }

    /// Load a specific config file, falling back to defaults if absent
    pub fn load_file(path: &Path) -> Result<Self> {
        if path.exists() {
            let text = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&text)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Overlay environment variables
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("RELAY_URL") {
            if !v.is_empty() {
                self.relay_url = v;
            }
        }
        if let Ok(v) = std::env::var("STUN_SERVERS") {
            let servers: Vec<String> = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !servers.is_empty() {
                self.stun_servers = servers;
            }
        }
        if let Ok(v) = std::env::var("TURN_URL") {
            if !v.is_empty() {
                self.turn_url = Some(v);
            }
        }
        if let Ok(v) = std::env::var("TURN_USERNAME") {
            if !v.is_empty() {
                self.turn_username = Some(v);
            }
        }
        if let Ok(v) = std::env::var("TURN_CREDENTIAL") {
            if !v.is_empty() {
                self.turn_credential = Some(v);
            }
        }
        if let Ok(v) = std::env::var("APP_URL") {
            if !v.is_empty() {
                self.app_url = Some(v);
            }
        }
        if let Ok(v) = std::env::var("DATA_DIR") {
            if !v.is_empty() {
                self.data_dir = PathBuf::from(v);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_have_two_stun_servers() {
        let config = Config::default();
        assert!(config.stun_servers.len() >= 2);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = Config::load_file(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.relay_url, Config::default().relay_url);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "relay_url = \"relay.example.net:4433\"").unwrap();
        writeln!(f, "privacy_mode = true").unwrap();

        let config = Config::load_file(&path).unwrap();
        assert_eq!(config.relay_url, "relay.example.net:4433");
        assert!(config.privacy_mode);
        // Unlisted fields keep their defaults
        assert!(!config.stun_servers.is_empty());
    }

    #[test]
    fn test_malformed_file_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "relay_url = [not valid").unwrap();
        assert!(Config::load_file(&path).is_err());
    }
}
