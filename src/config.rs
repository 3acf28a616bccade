//! Runtime configuration: the serving port, model mapping tables, the
//! upstream proxy, and the on-disk account store location.

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub allow_lan_access: bool,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_api_key")]
    pub api_key: String,

    #[serde(default)]
    pub anthropic_mapping: HashMap<String, String>,

    #[serde(default)]
    pub openai_mapping: HashMap<String, String>,

    #[serde(default)]
    pub custom_mapping: HashMap<String, String>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    #[serde(default)]
    pub upstream_proxy: UpstreamProxyConfig,

    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_context_window_ceiling")]
    pub context_window_ceiling: f64,

    #[serde(default = "default_load_balancer_strategy")]
    pub load_balancer_strategy: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpstreamProxyConfig {
    pub enabled: bool,
    pub url: String,
}

fn default_port() -> u16 {
    8045
}

fn default_api_key() -> String {
    format!("sk-{}", uuid::Uuid::new_v4().simple())
}

fn default_request_timeout() -> u64 {
    120
}

/// The data directory used when none is given explicitly, e.g. by the
/// CLI entry point before a config file exists to read one from.
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".antigravity-bridge")
}

fn default_context_window_ceiling() -> f64 {
    180_000.0
}

fn default_load_balancer_strategy() -> String {
    "round_robin".to_string()
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            allow_lan_access: false,
            port: default_port(),
            api_key: default_api_key(),
            anthropic_mapping: HashMap::new(),
            openai_mapping: HashMap::new(),
            custom_mapping: HashMap::new(),
            request_timeout: default_request_timeout(),
            upstream_proxy: UpstreamProxyConfig::default(),
            data_dir: default_data_dir(),
            context_window_ceiling: default_context_window_ceiling(),
            load_balancer_strategy: default_load_balancer_strategy(),
        }
    }
}

impl ProxyConfig {
    pub fn get_bind_address(&self) -> &str {
        if self.allow_lan_access {
            "0.0.0.0"
        } else {
            "127.0.0.1"
        }
    }

    fn config_path(data_dir: &PathBuf) -> PathBuf {
        data_dir.join("config.json")
    }

    /// Load configuration from `<data_dir>/config.json`, falling back to
    /// defaults (and writing them out) when the file is absent.
    pub fn load(data_dir: PathBuf) -> AppResult<Self> {
        std::fs::create_dir_all(&data_dir)?;
        let path = Self::config_path(&data_dir);
        if !path.exists() {
            let mut config = Self::default();
            config.data_dir = data_dir;
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&path)?;
        let mut config: ProxyConfig = serde_json::from_str(&content)
            .map_err(|e| AppError::Config(format!("failed to parse config.json: {e}")))?;
        config.data_dir = data_dir;
        Ok(config)
    }

    /// Persist configuration via a write-to-temp-then-rename, matching the
    /// account store's atomic write pattern.
    pub fn save(&self) -> AppResult<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        let path = Self::config_path(&self.data_dir);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}
