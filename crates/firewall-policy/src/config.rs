//! Detector configuration, validated once at startup.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable holding the detector configuration id.
pub const CONFIG_ID_ENV: &str = "AI_FIREWALL_CONFIG_ID";
/// Environment variable holding the detector API key.
pub const API_KEY_ENV: &str = "AI_FIREWALL_KEY";

pub const DEFAULT_BASE_URL: &str = "https://aisec.akamai.com";
pub const DEFAULT_API_KEY_HEADER: &str = "Fai-Api-Key";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// What to do with a message when the detector cannot be consulted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    /// Forward the original message unchanged.
    #[default]
    Open,
    /// Drop the message and tell the sender it could not be checked.
    Closed,
}

/// Everything the detection client and policy need to reach the detector.
///
/// Only the configuration id and API key are secrets; they are read from
/// the environment. The rest has defaults and may be overridden from the
/// config file.
#[derive(Clone)]
pub struct DetectorConfig {
    pub base_url: String,
    pub config_id: String,
    pub api_key: String,
    pub api_key_header: String,
    pub timeout: Duration,
    pub failure_mode: FailureMode,
    pub surface_warnings: bool,
}

impl fmt::Debug for DetectorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetectorConfig")
            .field("base_url", &self.base_url)
            .field("config_id", &self.config_id)
            .field("api_key", &"<redacted>")
            .field("api_key_header", &self.api_key_header)
            .field("timeout", &self.timeout)
            .field("failure_mode", &self.failure_mode)
            .field("surface_warnings", &self.surface_warnings)
            .finish()
    }
}

impl DetectorConfig {
    /// Config with default endpoint settings and the given secrets.
    pub fn new(config_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            config_id: config_id.into(),
            api_key: api_key.into(),
            api_key_header: DEFAULT_API_KEY_HEADER.to_string(),
            timeout: DEFAULT_TIMEOUT,
            failure_mode: FailureMode::default(),
            surface_warnings: false,
        }
    }

    /// Read the secrets from the process environment and validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env) but with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config_id = lookup(CONFIG_ID_ENV).ok_or(ConfigError::Missing {
            name: CONFIG_ID_ENV,
        })?;
        let api_key = lookup(API_KEY_ENV).ok_or(ConfigError::Missing { name: API_KEY_ENV })?;

        let config = Self::new(config_id.trim(), api_key.trim());
        config.validate()?;
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_api_key_header(mut self, header: impl Into<String>) -> Self {
        self.api_key_header = header.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    pub fn with_surface_warnings(mut self, surface: bool) -> Self {
        self.surface_warnings = surface;
        self
    }

    /// Reject configurations that could never produce a working client.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.config_id.trim().is_empty() {
            return Err(ConfigError::Empty {
                name: CONFIG_ID_ENV,
            });
        }
        let dot_segment = matches!(self.config_id.as_str(), "." | "..");
        if dot_segment || !self.config_id.bytes().all(is_path_safe) {
            return Err(ConfigError::InvalidConfigId {
                name: CONFIG_ID_ENV,
                id: self.config_id.clone(),
            });
        }
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::Empty { name: API_KEY_ENV });
        }
        if reqwest::header::HeaderValue::from_str(&self.api_key).is_err() {
            return Err(ConfigError::InvalidApiKey { name: API_KEY_ENV });
        }
        if !(self.base_url.starts_with("https://") || self.base_url.starts_with("http://")) {
            return Err(ConfigError::InvalidBaseUrl {
                url: self.base_url.clone(),
            });
        }
        if reqwest::header::HeaderName::from_bytes(self.api_key_header.as_bytes()).is_err() {
            return Err(ConfigError::InvalidHeaderName(self.api_key_header.clone()));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    /// Detection endpoint for the configured detector configuration.
    ///
    /// `config_id` is inserted as a single path segment; [`validate`] keeps
    /// it to unreserved URL characters.
    ///
    /// [`validate`]: DetectorConfig::validate
    pub fn detect_url(&self) -> String {
        format!(
            "{}/fai/v1/fai-configurations/{}/detect",
            self.base_url.trim_end_matches('/'),
            self.config_id
        )
    }
}

/// RFC 3986 unreserved characters, which need no escaping in a path segment.
fn is_path_safe(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~')
}
