//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.advisor/config.json`) and environment.
//! Every field has a default, so a missing file or an empty `{}` yields a working client
//! against a local backend.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// REST API settings (advisor endpoint, timeout, bearer token).
    #[serde(default)]
    pub api: ApiConfig,

    /// Realtime (STOMP over WebSocket) settings.
    #[serde(default)]
    pub realtime: RealtimeConfig,

    /// Local persistence settings.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// REST API base URL, request timeout, and token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    /// Base URL including the `/api` prefix (default "http://localhost:8080/api").
    #[serde(default = "default_api_base_url")]
    pub base_url: String,

    /// Upper bound for one HTTP request in milliseconds (default 95000).
    #[serde(default = "default_api_timeout_ms")]
    pub timeout_ms: u64,

    /// Bearer token sent with every request. Overridden by ADVISOR_API_TOKEN env.
    pub token: Option<String>,
}

/// Realtime transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeConfig {
    /// WebSocket URL of the STOMP endpoint (default "ws://localhost:8080/ws/websocket").
    #[serde(default = "default_realtime_url")]
    pub url: String,

    /// Fixed delay between reconnect attempts in milliseconds (default 5000).
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Heart-beat we offer to send, in milliseconds; 0 disables (default 4000).
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_outgoing_ms: u64,

    /// Heart-beat we want to receive, in milliseconds; 0 disables (default 4000).
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_incoming_ms: u64,

    /// When set, a turn still loading after this many milliseconds ends with an error message.
    /// Unset means wait for the response or error event indefinitely.
    #[serde(default)]
    pub response_timeout_ms: Option<u64>,
}

/// Storage location for session id and conversation history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Override the storage directory. Relative paths are resolved against the config file's parent.
    /// Omit to use the `storage` subdirectory next to the config file.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

fn default_api_base_url() -> String {
    "http://localhost:8080/api".to_string()
}

fn default_api_timeout_ms() -> u64 {
    95_000
}

fn default_realtime_url() -> String {
    "ws://localhost:8080/ws/websocket".to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    5_000
}

fn default_heartbeat_ms() -> u64 {
    4_000
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            timeout_ms: default_api_timeout_ms(),
            token: None,
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: default_realtime_url(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            heartbeat_outgoing_ms: default_heartbeat_ms(),
            heartbeat_incoming_ms: default_heartbeat_ms(),
            response_timeout_ms: None,
        }
    }
}

impl RealtimeConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn response_timeout(&self) -> Option<Duration> {
        self.response_timeout_ms.map(Duration::from_millis)
    }
}

/// Resolve the API token: env ADVISOR_API_TOKEN overrides config.
pub fn resolve_api_token(config: &Config) -> Option<String> {
    std::env::var("ADVISOR_API_TOKEN")
        .ok()
        .and_then(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .or_else(|| {
            config
                .api
                .token
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("ADVISOR_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".advisor").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path (or ADVISOR_CONFIG_PATH / default). Missing file => default config.
/// Returns the config and the path that was used (for resolving the config directory).
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

/// Default storage directory: `storage` subdirectory of the config file's parent.
pub fn storage_dir(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .join("storage")
}

/// Resolve the storage directory: `config.storage.directory` if set (relative paths resolved
/// against the config file's parent), otherwise the default `storage` subdirectory.
pub fn resolve_storage_dir(config: &Config, config_path: &Path) -> PathBuf {
    let config_parent = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    match &config.storage.directory {
        Some(d) if !d.as_os_str().is_empty() => {
            if d.is_absolute() {
                d.clone()
            } else {
                config_parent.join(d)
            }
        }
        _ => storage_dir(config_path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_local_backend() {
        let config = Config::default();
        assert_eq!(config.api.base_url, "http://localhost:8080/api");
        assert_eq!(config.api.timeout(), Duration::from_secs(95));
        assert_eq!(config.realtime.url, "ws://localhost:8080/ws/websocket");
        assert_eq!(config.realtime.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(config.realtime.heartbeat_outgoing_ms, 4000);
        assert_eq!(config.realtime.heartbeat_incoming_ms, 4000);
        assert!(config.realtime.response_timeout().is_none());
    }

    #[test]
    fn empty_object_parses_to_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.realtime.reconnect_delay_ms, 5000);
        assert!(config.storage.directory.is_none());
    }

    #[test]
    fn camel_case_keys_are_read() {
        let config: Config = serde_json::from_str(
            r#"{"api":{"baseUrl":"https://advisor.example/api","timeoutMs":1000},
                "realtime":{"reconnectDelayMs":250,"responseTimeoutMs":60000}}"#,
        )
        .unwrap();
        assert_eq!(config.api.base_url, "https://advisor.example/api");
        assert_eq!(config.api.timeout_ms, 1000);
        assert_eq!(config.realtime.reconnect_delay_ms, 250);
        assert_eq!(
            config.realtime.response_timeout(),
            Some(Duration::from_secs(60))
        );
        assert_eq!(config.realtime.heartbeat_incoming_ms, 4000);
    }

    #[test]
    fn resolve_storage_dir_default() {
        let config = Config::default();
        let path = Path::new("/home/user/.advisor/config.json");
        assert_eq!(
            resolve_storage_dir(&config, path),
            PathBuf::from("/home/user/.advisor/storage")
        );
    }

    #[test]
    fn resolve_storage_dir_override_relative() {
        let mut config = Config::default();
        config.storage.directory = Some(PathBuf::from("profiles/work"));
        let path = Path::new("/home/user/.advisor/config.json");
        assert_eq!(
            resolve_storage_dir(&config, path),
            PathBuf::from("/home/user/.advisor/profiles/work")
        );
    }

    #[test]
    fn resolve_storage_dir_override_absolute() {
        let mut config = Config::default();
        config.storage.directory = Some(PathBuf::from("/var/lib/advisor"));
        let path = Path::new("/home/user/.advisor/config.json");
        assert_eq!(
            resolve_storage_dir(&config, path),
            PathBuf::from("/var/lib/advisor")
        );
    }
}
