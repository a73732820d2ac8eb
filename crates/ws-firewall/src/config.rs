use std::path::{Path, PathBuf};
use std::time::Duration;

use firewall_policy::config::{DEFAULT_API_KEY_HEADER, DEFAULT_BASE_URL};
use firewall_policy::{ConfigError, DetectorConfig, FailureMode};
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub detector: DetectorSettings,
}

#[derive(Debug, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_listen")]
    pub listen_addr: String,
    #[serde(default = "default_upstream")]
    pub upstream_url: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen(),
            upstream_url: default_upstream(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_audit_path")]
    pub audit_log_path: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            audit_log_path: default_audit_path(),
        }
    }
}

/// Non-secret detector settings. The configuration id and API key come from
/// the environment only.
#[derive(Debug, Deserialize)]
pub struct DetectorSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub failure_mode: FailureMode,
    #[serde(default)]
    pub surface_warnings: bool,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_header: default_api_key_header(),
            timeout_secs: default_timeout_secs(),
            failure_mode: FailureMode::default(),
            surface_warnings: false,
        }
    }
}

impl DetectorSettings {
    /// Merge these settings with the secrets from the process environment.
    pub fn resolve(&self) -> Result<DetectorConfig, ConfigError> {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    pub fn resolve_with<F>(&self, lookup: F) -> Result<DetectorConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = DetectorConfig::from_lookup(lookup)?
            .with_base_url(self.base_url.clone())
            .with_api_key_header(self.api_key_header.clone())
            .with_timeout(Duration::from_secs(self.timeout_secs))
            .with_failure_mode(self.failure_mode)
            .with_surface_warnings(self.surface_warnings);
        config.validate()?;
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Default-value functions used by serde
// ---------------------------------------------------------------------------

fn default_listen() -> String {
    "127.0.0.1:18789".to_string()
}

fn default_upstream() -> String {
    "ws://127.0.0.1:18790".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_audit_path() -> PathBuf {
    PathBuf::from("audit.jsonl")
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_api_key_header() -> String {
    DEFAULT_API_KEY_HEADER.to_string()
}

fn default_timeout_secs() -> u64 {
    5
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Where the running configuration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    File,
    Defaults,
}

impl ConfigSource {
    /// Report the source once logging is up. Config is loaded before the
    /// subscriber exists, so this cannot happen inside [`load`].
    pub fn log(self, path: &Path) {
        match self {
            Self::File => debug!(path = %path.display(), "configuration loaded"),
            Self::Defaults => warn!(
                path = %path.display(),
                "configuration file not found; using defaults"
            ),
        }
    }
}

/// Load configuration from a YAML file.
///
/// If the file does not exist a default configuration is returned with
/// [`ConfigSource::Defaults`].
pub fn load(path: &Path) -> anyhow::Result<(Config, ConfigSource)> {
    if !path.exists() {
        return Ok((Config::default(), ConfigSource::Defaults));
    }

    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

    let config = parse(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))?;
    Ok((config, ConfigSource::File))
}

fn parse(yaml: &str) -> Result<Config, serde_yml::Error> {
    serde_yml::from_str(yaml)
}
