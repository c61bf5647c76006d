//! Configuration types for the Lariat collector

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{LariatError, Result};

/// Main configuration, read once at initialization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LariatConfig {
    /// Bearer token for the ingestion backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Backend base URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Project the traces belong to (sent as `X-Project-ID`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    /// Environment name copied onto every trace summary
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Global tags merged into every trace summary
    #[serde(default)]
    pub tags: HashMap<String, String>,

    /// Batch dispatch configuration
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Chat session defaults
    #[serde(default)]
    pub sessions: SessionConfig,
}

fn default_endpoint() -> String {
    "http://localhost:8000".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

impl Default for LariatConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: default_endpoint(),
            project_id: None,
            environment: default_environment(),
            tags: HashMap::new(),
            dispatch: DispatchConfig::default(),
            sessions: SessionConfig::default(),
        }
    }
}

/// Batch dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Per-attempt timeout for the batch POST
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Timeout for the identity lookup
    #[serde(with = "humantime_serde")]
    pub identity_timeout: Duration,

    /// Attempts per batch (1 = send once, drop on failure)
    pub max_attempts: usize,

    /// Backoff before the first retry
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            identity_timeout: Duration::from_secs(10),
            max_attempts: 1,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

/// Chat session defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Minutes of inactivity before a session times out
    pub timeout_minutes: i64,

    /// Maximum session duration in minutes
    pub max_duration_minutes: i64,

    /// Default session type
    pub session_type: String,

    /// Period of the background expiry sweep
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: 30,
            max_duration_minutes: 240,
            session_type: "chat".to_string(),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Builder for LariatConfig
pub struct ConfigBuilder {
    config: LariatConfig,
}

impl ConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self {
            config: LariatConfig::default(),
        }
    }

    /// Set the API key
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.config.api_key = Some(api_key.into());
        self
    }

    /// Set the backend endpoint
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into();
        self
    }

    /// Set the project ID
    pub fn project_id(mut self, project_id: impl Into<String>) -> Self {
        self.config.project_id = Some(project_id.into());
        self
    }

    /// Set the environment name
    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.config.environment = environment.into();
        self
    }

    /// Add a global tag
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.tags.insert(key.into(), value.into());
        self
    }

    /// Set dispatch configuration
    pub fn dispatch(mut self, config: DispatchConfig) -> Self {
        self.config.dispatch = config;
        self
    }

    /// Set session defaults
    pub fn sessions(mut self, config: SessionConfig) -> Self {
        self.config.sessions = config;
        self
    }

    /// Build the configuration
    pub fn build(self) -> LariatConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LariatConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. `lariat.toml` in the working directory
    /// 3. The file named by `LARIAT_CONFIG_PATH`, if set
    /// 4. `LARIAT_`-prefixed environment variables (`__` separates nested keys,
    ///    e.g. `LARIAT_DISPATCH__MAX_ATTEMPTS=3`)
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file is invalid or validation fails.
    pub fn load() -> Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml},
        };

        let mut figment = Figment::from(Serialized::defaults(LariatConfig::default()))
            .merge(Toml::file("lariat.toml"));

        if let Ok(path) = std::env::var("LARIAT_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        let config: LariatConfig = figment
            .merge(Env::prefixed("LARIAT_").ignore(&["CONFIG_PATH"]).split("__"))
            .extract()
            .map_err(|e| {
                LariatError::Configuration(format!("Failed to load configuration: {}", e))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Serialized, Toml},
        };

        let config: LariatConfig = Figment::from(Serialized::defaults(LariatConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .extract()
            .map_err(|e| {
                LariatError::Configuration(format!("Failed to load configuration file: {}", e))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// URL of the batch ingestion endpoint
    pub fn batch_url(&self) -> String {
        format!("{}/api/v1/traces/batch", self.endpoint.trim_end_matches('/'))
    }

    /// URL of the identity lookup endpoint
    pub fn whoami_url(&self) -> String {
        format!("{}/api/v1/auth/whoami", self.endpoint.trim_end_matches('/'))
    }

    /// Copy of this configuration with the API key masked, for display
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if let Some(key) = copy.api_key.as_mut() {
            let visible: String = key.chars().take(4).collect();
            *key = format!("{}****", visible);
        }
        copy
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(LariatError::Configuration(
                "endpoint must not be empty".to_string(),
            ));
        }
        if self.dispatch.max_attempts == 0 {
            return Err(LariatError::Configuration(
                "dispatch.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.sessions.timeout_minutes <= 0 || self.sessions.max_duration_minutes <= 0 {
            return Err(LariatError::Configuration(
                "session timeouts must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
