//! Configuration loading: defaults, overlaid with an optional TOML file,
//! overlaid with `SPRINT_`-prefixed environment variables. See
//! SPEC_FULL.md §4.10 / §6.

use crate::error::ConfigError;
use serde::Deserialize;
use std::path::Path;

const ENV_PREFIX: &str = "SPRINT_";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub rpc_nodes: Vec<String>,
    #[serde(default)]
    pub rpc_user: Option<String>,
    #[serde(default)]
    pub rpc_pass: Option<String>,
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
    #[serde(default)]
    pub turbo_mode: bool,
    #[serde(default)]
    pub metrics_url: Option<String>,
    #[serde(default)]
    pub peers: Vec<String>,
    #[serde(default)]
    pub log_level: Option<String>,
}

fn default_poll_interval_seconds() -> u64 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc_nodes: Vec::new(),
            rpc_user: None,
            rpc_pass: None,
            poll_interval_seconds: default_poll_interval_seconds(),
            turbo_mode: false,
            metrics_url: None,
            peers: Vec::new(),
            log_level: None,
        }
    }
}

impl Config {
    /// Load defaults, overlay an optional TOML file, overlay environment
    /// overrides, then validate. Returns a fatal `ConfigError` on any
    /// problem — there is no partially-valid `Config`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Some(path) = path {
            let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
            cfg = toml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        }

        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}RPC_NODES")) {
            self.rpc_nodes = v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}RPC_USER")) {
            self.rpc_user = Some(v);
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}RPC_PASS")) {
            self.rpc_pass = Some(v);
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}POLL_INTERVAL_SECONDS")) {
            if let Ok(parsed) = v.parse() {
                self.poll_interval_seconds = parsed;
            }
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}TURBO_MODE")) {
            self.turbo_mode = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}METRICS__URL")) {
            self.metrics_url = Some(v);
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}PEERS")) {
            self.peers = v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }
        if let Ok(v) = std::env::var(format!("{ENV_PREFIX}LOG_LEVEL")) {
            self.log_level = Some(v);
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.rpc_nodes.is_empty() {
            return Err(ConfigError::Invalid("rpc_nodes must not be empty".into()));
        }
        for url in &self.rpc_nodes {
            if url.parse::<reqwest::Url>().is_err() {
                return Err(ConfigError::Invalid(format!("invalid rpc_nodes url: {url}")));
            }
        }
        if self.poll_interval_seconds == 0 {
            return Err(ConfigError::Invalid("poll_interval_seconds must be > 0".into()));
        }
        if let Some(url) = &self.metrics_url {
            if url.parse::<reqwest::Url>().is_err() {
                return Err(ConfigError::Invalid(format!("invalid metrics_url: {url}")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_rpc_nodes_is_fatal() {
        let cfg = Config::default();
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn defaults_pass_once_a_source_is_present() {
        let mut cfg = Config::default();
        cfg.rpc_nodes.push("http://rpc:8332".into());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let mut cfg = Config::default();
        cfg.rpc_nodes.push("http://rpc:8332".into());
        cfg.poll_interval_seconds = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_overrides_apply_on_top_of_file_defaults() {
        std::env::set_var("SPRINT_TURBO_MODE", "true");
        std::env::set_var("SPRINT_RPC_NODES", "http://a:8332, http://b:8332");
        let mut cfg = Config::default();
        cfg.apply_env_overrides();
        assert!(cfg.turbo_mode);
        assert_eq!(cfg.rpc_nodes, vec!["http://a:8332", "http://b:8332"]);
        std::env::remove_var("SPRINT_TURBO_MODE");
        std::env::remove_var("SPRINT_RPC_NODES");
    }
}
