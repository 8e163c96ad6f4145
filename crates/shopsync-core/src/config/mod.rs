//! Sync configuration.
//!
//! Settings are read from a JSON file; every field is optional and falls back
//! to the defaults below. The auth token is never printed by `Debug`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::EntityType;
use crate::sync::{ConflictPolicy, HttpTransport, PolicyTable, RetryPolicy, SessionOptions};

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
const DEFAULT_PERIODIC_INTERVAL_SECS: u64 = 300;
const DEFAULT_BATCH_SIZE: usize = 100;
const DEFAULT_CHECKPOINT_SKEW_MS: i64 = 5_000;
const DEFAULT_BACKOFF_BASE_SECS: u64 = 30;
const DEFAULT_BACKOFF_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Device sync settings
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSettings {
    pub api_base_url: Option<String>,
    pub auth_token: Option<String>,
    pub request_timeout_secs: u64,
    pub periodic_interval_secs: u64,
    pub batch_size: usize,
    pub checkpoint_skew_ms: i64,
    pub backoff_base_secs: u64,
    pub backoff_max_attempts: u32,
    /// Per-type conflict policy overrides
    pub policies: BTreeMap<EntityType, ConflictPolicy>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            api_base_url: None,
            auth_token: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            periodic_interval_secs: DEFAULT_PERIODIC_INTERVAL_SECS,
            batch_size: DEFAULT_BATCH_SIZE,
            checkpoint_skew_ms: DEFAULT_CHECKPOINT_SKEW_MS,
            backoff_base_secs: DEFAULT_BACKOFF_BASE_SECS,
            backoff_max_attempts: DEFAULT_BACKOFF_MAX_ATTEMPTS,
            policies: BTreeMap::new(),
        }
    }
}

impl std::fmt::Debug for SyncSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSettings")
            .field("api_base_url", &self.api_base_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("periodic_interval_secs", &self.periodic_interval_secs)
            .field("batch_size", &self.batch_size)
            .field("checkpoint_skew_ms", &self.checkpoint_skew_ms)
            .field("backoff_base_secs", &self.backoff_base_secs)
            .field("backoff_max_attempts", &self.backoff_max_attempts)
            .field("policies", &self.policies)
            .finish()
    }
}

impl SyncSettings {
    /// Parse and validate settings from JSON
    pub fn from_json(payload: &str) -> Result<Self, ConfigError> {
        let settings: Self = serde_json::from_str(payload)?;
        settings.normalized()
    }

    /// Load settings from a JSON file
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let payload = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&payload)
    }

    /// Load settings from `path`, or defaults when the file does not exist
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load_from_path(path)
        } else {
            Self::default().normalized()
        }
    }

    /// Replace endpoint and token with values from the environment, when set
    pub fn with_overrides(
        mut self,
        api_base_url: Option<String>,
        auth_token: Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(url) = non_blank(api_base_url) {
            self.api_base_url = Some(url);
        }
        if let Some(token) = non_blank(auth_token) {
            self.auth_token = Some(token);
        }
        self.normalized()
    }

    /// Trim text values and check ranges
    pub fn normalized(mut self) -> Result<Self, ConfigError> {
        self.api_base_url = non_blank(self.api_base_url)
            .map(|url| validate_base_url(&url))
            .transpose()?;
        self.auth_token = non_blank(self.auth_token);

        if self.request_timeout_secs == 0 {
            return Err(invalid("request_timeout_secs must be greater than zero"));
        }
        if self.periodic_interval_secs == 0 {
            return Err(invalid("periodic_interval_secs must be greater than zero"));
        }
        if self.batch_size == 0 {
            return Err(invalid("batch_size must be greater than zero"));
        }
        if self.checkpoint_skew_ms < 0 {
            return Err(invalid("checkpoint_skew_ms must not be negative"));
        }
        if self.backoff_base_secs == 0 {
            return Err(invalid("backoff_base_secs must be greater than zero"));
        }
        if self.backoff_max_attempts == 0 {
            return Err(invalid("backoff_max_attempts must be greater than zero"));
        }

        Ok(self)
    }

    /// Copy safe to print
    #[must_use]
    pub fn redacted(&self) -> Self {
        Self {
            auth_token: self.auth_token.as_ref().map(|_| "[REDACTED]".to_string()),
            ..self.clone()
        }
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub const fn periodic_interval(&self) -> Duration {
        Duration::from_secs(self.periodic_interval_secs)
    }

    pub const fn session_options(&self) -> SessionOptions {
        SessionOptions {
            batch_size: self.batch_size,
            checkpoint_skew_ms: self.checkpoint_skew_ms,
        }
    }

    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_secs(self.backoff_base_secs),
            max_attempts: self.backoff_max_attempts,
        }
    }

    pub fn policy_table(&self) -> PolicyTable {
        PolicyTable::new(self.policies.clone())
    }

    /// HTTP transport for the configured endpoint
    pub fn transport(&self) -> crate::Result<HttpTransport> {
        let base_url = self.api_base_url.clone().ok_or_else(|| {
            crate::Error::Config(
                "api_base_url is not configured (set it in the config file or SHOPSYNC_API_URL)"
                    .to_string(),
            )
        })?;
        HttpTransport::new(base_url, self.auth_token.clone(), self.request_timeout())
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid(message.to_string())
}

/// Trim a text option; blank values become `None`
pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Trimmed http(s) base URL without a trailing slash
pub(crate) fn validate_base_url(raw: &str) -> Result<String, ConfigError> {
    let url = raw.trim().trim_end_matches('/');
    if url.is_empty() {
        return Err(invalid("api_base_url must not be empty"));
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(url.to_string())
    } else {
        Err(invalid("api_base_url must include http:// or https://"))
    }
}
