//! Client configuration
//!
//! Layered: built-in defaults, then `~/.dossier/config.toml`, then
//! environment variables. The CLI applies its flags on top.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{ClientError, ClientResult};

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub const ENV_SERVER_URL: &str = "DOSSIER_SERVER_URL";
pub const ENV_RECONNECT_DELAY_MS: &str = "DOSSIER_RECONNECT_DELAY_MS";

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// HTTP base of the backend; the stream URL is derived from it
    pub server_url: String,
    /// Constant delay between stream reconnect attempts
    pub reconnect_delay: Duration,
    pub request_timeout: Duration,
    /// Speak the final assistant message when a generation finishes
    pub speak_responses: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            speak_responses: false,
        }
    }
}

/// On-disk shape of `config.toml`; every key optional
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    server_url: Option<String>,
    reconnect_delay_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
    speak_responses: Option<bool>,
}

/// `~/.dossier`
pub fn dossier_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".dossier")
}

impl ClientConfig {
    pub fn default_path() -> PathBuf {
        dossier_dir().join("config.toml")
    }

    /// Defaults, then the default config file if present, then the process environment
    pub fn load() -> ClientResult<Self> {
        let mut config = Self::default();
        let path = Self::default_path();
        if path.exists() {
            config.apply_file(&path)?;
        }
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn apply_file(&mut self, path: &Path) -> ClientResult<()> {
        let raw = std::fs::read_to_string(path)?;
        let file: ConfigFile = toml::from_str(&raw)?;
        debug!(
            component = "config",
            event = "config.file_loaded",
            path = %path.display(),
        );

        if let Some(url) = file.server_url {
            self.server_url = url;
        }
        if let Some(ms) = file.reconnect_delay_ms {
            self.reconnect_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = file.request_timeout_ms {
            self.request_timeout = Duration::from_millis(ms);
        }
        if let Some(speak) = file.speak_responses {
            self.speak_responses = speak;
        }
        Ok(())
    }

    /// Apply environment overrides through `lookup` (the process env in production)
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_SERVER_URL).filter(|v| !v.trim().is_empty()) {
            self.server_url = url;
        }
        if let Some(ms) = lookup(ENV_RECONNECT_DELAY_MS).and_then(|v| v.trim().parse().ok()) {
            self.reconnect_delay = Duration::from_millis(ms);
        }
    }

    /// HTTP base without a trailing slash
    pub fn http_base(&self) -> ClientResult<String> {
        let trimmed = self.server_url.trim().trim_end_matches('/');
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            Ok(trimmed.to_string())
        } else {
            Err(ClientError::InvalidUrl(self.server_url.clone()))
        }
    }

    /// Stream base: `http` → `ws`, `https` → `wss`
    pub fn ws_base(&self) -> ClientResult<String> {
        let http = self.http_base()?;
        if let Some(rest) = http.strip_prefix("https://") {
            Ok(format!("wss://{rest}"))
        } else if let Some(rest) = http.strip_prefix("http://") {
            Ok(format!("ws://{rest}"))
        } else {
            Err(ClientError::InvalidUrl(self.server_url.clone()))
        }
    }
}
