//! Server configuration: TOML file with per-field defaults, validated at startup.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::registry::RegistryLimits;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Model used when a request does not name one.
    #[serde(default = "default_model_name")]
    pub default_model: String,

    /// Hard cap on simultaneously open inference sessions.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Idle time after which a session expires. Refreshed on every use.
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,

    /// Period of the background sweep that releases expired sessions.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Upper bound on waiting for a busy session. Unset means wait indefinitely.
    #[serde(default)]
    pub lock_timeout_secs: Option<u64>,

    /// `max_length` for sessions opened without one.
    #[serde(default = "default_session_max_length")]
    pub default_max_length: usize,

    #[serde(default = "default_models")]
    pub models: Vec<ModelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    /// Base vocabulary for the word tokenizer; the built-in list when absent.
    #[serde(default)]
    pub vocabulary: Option<Vec<String>>,
    /// Simulated per-token latency.
    #[serde(default)]
    pub step_delay_ms: u64,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5000))
}

fn default_model_name() -> String {
    "toy".into()
}

fn default_max_sessions() -> usize {
    100
}

fn default_step_timeout_secs() -> u64 {
    300
}

fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_session_max_length() -> usize {
    1024
}

fn default_models() -> Vec<ModelConfig> {
    vec![ModelConfig {
        name: default_model_name(),
        vocabulary: None,
        step_delay_ms: 0,
    }]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            default_model: default_model_name(),
            max_sessions: default_max_sessions(),
            step_timeout_secs: default_step_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            lock_timeout_secs: None,
            default_max_length: default_session_max_length(),
            models: default_models(),
        }
    }
}

impl ServerConfig {
    /// Read `path` if given, otherwise start from defaults. Not validated; call
    /// [`ServerConfig::validate`] after applying overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_sessions == 0 {
            return Err(ConfigError::Invalid("max_sessions must be at least 1".into()));
        }
        if self.step_timeout_secs == 0 {
            return Err(ConfigError::Invalid("step_timeout_secs must be positive".into()));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid("sweep_interval_secs must be positive".into()));
        }
        if self.lock_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid("lock_timeout_secs must be positive".into()));
        }
        if self.default_max_length == 0 {
            return Err(ConfigError::Invalid("default_max_length must be positive".into()));
        }
        if self.models.is_empty() {
            return Err(ConfigError::Invalid("at least one model must be configured".into()));
        }

        let mut seen = HashSet::new();
        for model in &self.models {
            if model.name.trim().is_empty() {
                return Err(ConfigError::Invalid("model names must not be empty".into()));
            }
            if !seen.insert(model.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "model {:?} is configured twice",
                    model.name
                )));
            }
            if model.vocabulary.as_ref().is_some_and(|v| v.is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "model {:?} has an empty vocabulary",
                    model.name
                )));
            }
        }
        if !seen.contains(self.default_model.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "default_model {:?} is not among the configured models",
                self.default_model
            )));
        }
        Ok(())
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn registry_limits(&self) -> RegistryLimits {
        RegistryLimits {
            max_sessions: self.max_sessions,
            step_timeout: self.step_timeout(),
            lock_timeout: self.lock_timeout_secs.map(Duration::from_secs),
        }
    }
}
