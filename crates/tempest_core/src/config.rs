use anyhow::{Context, Result};
use mod_h2_peer::PeerConfig;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempest_net::ConnectOptions;

/// Environment variable naming a JSON config file.
pub const CONFIG_ENV: &str = "TEMPEST_CONFIG";

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// Abusive streams the peer tolerates before closing; `null` disables its defense.
    pub peer_reset_limit: Option<usize>,
    pub peer_bind: SocketAddr,
    /// Global bound on a run. Reaching it means the peer never defended itself.
    pub run_timeout_ms: u64,
    pub nodelay: bool,
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            peer_reset_limit: Some(100),
            peer_bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            run_timeout_ms: 30_000,
            nodelay: true,
            log_dir: None,
        }
    }
}

impl Config {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("invalid config")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_json(&raw)
    }

    /// Loads the file named by `TEMPEST_CONFIG`, or the defaults when unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_millis(self.run_timeout_ms)
    }

    pub fn peer_config(&self) -> PeerConfig {
        PeerConfig {
            bind: self.peer_bind,
            reset_limit: self.peer_reset_limit,
        }
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            nodelay: self.nodelay,
            local_addr: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let config = Config::from_json("{}").unwrap();
        assert_eq!(config.peer_reset_limit, Some(100));
        assert_eq!(config.run_timeout(), Duration::from_secs(30));
        assert!(config.nodelay);
        assert!(config.peer_bind.ip().is_loopback());
        assert_eq!(config.peer_bind.port(), 0);
    }

    #[test]
    fn partial_override() {
        let config =
            Config::from_json(r#"{"peer_reset_limit": 25, "run_timeout_ms": 500, "nodelay": false}"#)
                .unwrap();
        assert_eq!(config.peer_config().reset_limit, Some(25));
        assert_eq!(config.run_timeout(), Duration::from_millis(500));
        assert!(!config.connect_options().nodelay);
    }

    #[test]
    fn null_limit_disables_peer_defense() {
        let config = Config::from_json(r#"{"peer_reset_limit": null}"#).unwrap();
        assert_eq!(config.peer_config().reset_limit, None);
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(Config::from_json("{\"run_timeout_ms\": \"soon\"}").is_err());
    }

    #[test]
    fn load_reports_missing_file() {
        let err = Config::load(Path::new("/nonexistent/tempest.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/tempest.json"));
    }
}
