//! Service configuration.
//!
//! Loaded with priority:
//! 1. Explicit file path from `LANWATCH_CONFIG`
//! 2. Config file (`~/.config/lanwatch/config.toml`)
//! 3. Built-in defaults
//!
//! `LANWATCH_BIND` and `LANWATCH_API_TOKEN` override the server section
//! after the file has been applied.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an explicit config file
pub const ENV_CONFIG_PATH: &str = "LANWATCH_CONFIG";
/// Environment variable overriding `server.bind`
pub const ENV_BIND: &str = "LANWATCH_BIND";
/// Environment variable overriding `server.api_token`
pub const ENV_API_TOKEN: &str = "LANWATCH_API_TOKEN";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scan: ScanConfig,
    pub retry: RetryConfig,
    pub server: ServerConfig,
    pub gateway: GatewayConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub concurrency: usize,
    /// Default per-request probe timeout
    pub timeout_ms: u64,
    pub port_scan_timeout_ms: u64,
    pub reachability_timeout_ms: u64,
    pub banner_timeout_ms: u64,
    pub hostname_timeout_ms: u64,
    pub min_scan_interval_ms: u64,
    pub max_scan_targets: usize,
    /// 0 disables scheduled scans
    pub auto_scan_interval_ms: u64,
    /// TCP fallback ports for reachability when ICMP is blocked
    pub probe_ports: Vec<u16>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            concurrency: 48,
            timeout_ms: 300,
            port_scan_timeout_ms: 250,
            reachability_timeout_ms: 350,
            banner_timeout_ms: 300,
            hostname_timeout_ms: 1000,
            min_scan_interval_ms: 60_000,
            max_scan_targets: 4096,
            auto_scan_interval_ms: 300_000,
            probe_ports: vec![80, 443, 22, 445],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            initial_delay_ms: 40,
            max_delay_ms: 200,
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Shared secret; when unset the API is open
    pub api_token: Option<String>,
    pub unauthorized_burst: f64,
    pub unauthorized_refill_per_sec: f64,
    pub scan_request_burst: f64,
    pub scan_request_refill_per_sec: f64,
    pub token_rotate_burst: f64,
    pub token_rotate_refill_per_sec: f64,
    /// How long the replaced token keeps working after a rotation
    pub token_grace_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8787".to_string(),
            api_token: None,
            unauthorized_burst: 5.0,
            unauthorized_refill_per_sec: 0.1,
            scan_request_burst: 10.0,
            scan_request_refill_per_sec: 0.5,
            // 2 per 10 minutes
            token_rotate_burst: 2.0,
            token_rotate_refill_per_sec: 2.0 / 600.0,
            token_grace_ms: 5 * 60_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub heartbeat_grace_ms: u64,
    pub sweep_interval_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            heartbeat_grace_ms: 45_000,
            sweep_interval_ms: 15_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Defaults to `<data_local_dir>/lanwatch/state.json`
    pub path: Option<PathBuf>,
    pub max_events_per_device: usize,
    pub persist: bool,
    /// How often pending changes are written to the state file; 0 writes
    /// only at scan end and shutdown
    pub flush_interval_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_events_per_device: 4000,
            persist: true,
            flush_interval_ms: 30_000,
        }
    }
}

impl ScanConfig {
    pub fn port_scan_timeout(&self) -> Duration {
        Duration::from_millis(self.port_scan_timeout_ms)
    }

    pub fn reachability_timeout(&self) -> Duration {
        Duration::from_millis(self.reachability_timeout_ms)
    }

    pub fn banner_timeout(&self) -> Duration {
        Duration::from_millis(self.banner_timeout_ms)
    }

    pub fn hostname_timeout(&self) -> Duration {
        Duration::from_millis(self.hostname_timeout_ms)
    }
}

/// Where the configuration came from
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    /// Using default hardcoded values
    Default,
    /// Loaded from the file named by `LANWATCH_CONFIG`
    Environment,
    /// Loaded from the user config file
    ConfigFile,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::ConfigFile => write!(f, "config file"),
        }
    }
}

/// Configuration plus the place it was read from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub source: ConfigSource,
    pub path: Option<PathBuf>,
}

/// Get the path to the user configuration file
pub fn get_config_file_path() -> Option<PathBuf> {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .map(|p| p.join("lanwatch").join("config.toml"))
}

/// Get the path to the config file for documentation purposes
pub fn get_config_file_path_string() -> String {
    get_config_file_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "~/.config/lanwatch/config.toml".to_string())
}

/// Default location of the persisted state file
pub fn default_state_path() -> Option<PathBuf> {
    dirs::data_local_dir()
        .or_else(dirs::data_dir)
        .map(|p| p.join("lanwatch").join("state.json"))
}

/// Read and parse one config file. Unreadable or unparseable files log a
/// warning and yield `None`.
pub fn load_config_file(path: &Path) -> Option<Config> {
    if !path.exists() {
        return None;
    }

    match fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::debug!("Loaded config from {:?}", path);
                Some(config)
            }
            Err(e) => {
                tracing::warn!("Failed to parse config file {:?}: {}", path, e);
                None
            }
        },
        Err(e) => {
            tracing::warn!("Failed to read config file {:?}: {}", path, e);
            None
        }
    }
}

/// Load configuration from the environment and config files.
pub fn load_config() -> LoadedConfig {
    let explicit = std::env::var(ENV_CONFIG_PATH)
        .ok()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .map(PathBuf::from);

    let mut loaded = resolve(explicit, get_config_file_path());
    apply_env_overrides(
        &mut loaded.config,
        std::env::var(ENV_BIND).ok(),
        std::env::var(ENV_API_TOKEN).ok(),
    );
    loaded
}

fn resolve(explicit: Option<PathBuf>, user_file: Option<PathBuf>) -> LoadedConfig {
    // Priority 1: file named by the environment
    if let Some(path) = explicit {
        if let Some(config) = load_config_file(&path) {
            tracing::info!("Using config from {}: {:?}", ENV_CONFIG_PATH, path);
            return LoadedConfig {
                config,
                source: ConfigSource::Environment,
                path: Some(path),
            };
        }
        tracing::warn!(
            "{} points at {:?} but it could not be loaded",
            ENV_CONFIG_PATH,
            path
        );
    }

    // Priority 2: user config file
    if let Some(path) = user_file {
        if let Some(config) = load_config_file(&path) {
            tracing::info!("Using config file: {:?}", path);
            return LoadedConfig {
                config,
                source: ConfigSource::ConfigFile,
                path: Some(path),
            };
        }
    }

    // Priority 3: defaults
    tracing::debug!("Using default configuration");
    LoadedConfig {
        config: Config::default(),
        source: ConfigSource::Default,
        path: None,
    }
}

fn apply_env_overrides(config: &mut Config, bind: Option<String>, token: Option<String>) {
    if let Some(bind) = bind.map(|b| b.trim().to_string()).filter(|b| !b.is_empty()) {
        tracing::info!("Using bind address from {}: {}", ENV_BIND, bind);
        config.server.bind = bind;
    }
    if let Some(token) = token.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()) {
        tracing::info!("Using API token from {}", ENV_API_TOKEN);
        config.server.api_token = Some(token);
    }
}

/// Generate example config file content
pub fn generate_example_config() -> String {
    r#"# Lanwatch Configuration
# Place this file at: ~/.config/lanwatch/config.toml

[scan]
# concurrency = 48
# timeout_ms = 300
# port_scan_timeout_ms = 250
# reachability_timeout_ms = 350
# min_scan_interval_ms = 60000
# max_scan_targets = 4096
# Set to 0 to disable scheduled scans
# auto_scan_interval_ms = 300000

[retry]
# max_attempts = 2
# initial_delay_ms = 40
# max_delay_ms = 200

[server]
# bind = "127.0.0.1:8787"
# Require "Authorization: Bearer <token>" or "X-Api-Token: <token>"
# api_token = "change-me"
# Old token stays valid this long after POST /system/token/rotate
# token_grace_ms = 300000

[gateway]
# heartbeat_grace_ms = 45000

[storage]
# path = "/var/lib/lanwatch/state.json"
# max_events_per_device = 4000
# flush_interval_ms = 30000
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.scan.concurrency, 48);
        assert_eq!(config.scan.max_scan_targets, 4096);
        assert_eq!(config.scan.min_scan_interval_ms, 60_000);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.server.bind, "127.0.0.1:8787");
        assert_eq!(config.storage.max_events_per_device, 4000);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [scan]
            concurrency = 8

            [server]
            api_token = "secret"
            "#,
        )
        .unwrap();
        assert_eq!(config.scan.concurrency, 8);
        assert_eq!(config.scan.port_scan_timeout_ms, 250);
        assert_eq!(config.server.api_token.as_deref(), Some("secret"));
        assert_eq!(config.server.bind, "127.0.0.1:8787");
    }

    #[test]
    fn test_example_config_parses() {
        let config: Config = toml::from_str(&generate_example_config()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_resolve_priority() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("explicit.toml");
        let user = dir.path().join("user.toml");
        fs::write(&explicit, "[scan]\nconcurrency = 4\n").unwrap();
        fs::write(&user, "[scan]\nconcurrency = 16\n").unwrap();

        let loaded = resolve(Some(explicit.clone()), Some(user.clone()));
        assert_eq!(loaded.source, ConfigSource::Environment);
        assert_eq!(loaded.config.scan.concurrency, 4);

        let loaded = resolve(Some(dir.path().join("missing.toml")), Some(user));
        assert_eq!(loaded.source, ConfigSource::ConfigFile);
        assert_eq!(loaded.config.scan.concurrency, 16);

        let loaded = resolve(None, None);
        assert_eq!(loaded.source, ConfigSource::Default);
    }

    #[test]
    fn test_unparseable_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("broken.toml");
        fs::write(&broken, "[scan\nconcurrency = ").unwrap();

        let loaded = resolve(None, Some(broken));
        assert_eq!(loaded.source, ConfigSource::Default);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        apply_env_overrides(
            &mut config,
            Some(" 0.0.0.0:9000 ".to_string()),
            Some("".to_string()),
        );
        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.server.api_token, None);
    }
}
