//! Typed engine configuration.
//!
//! Two keys are known ahead of time (`agent.primary` and the retry/circuit
//! tunables); everything else an embedding application or agent adapter
//! defines lives in `extra` so it survives a round trip without the engine
//! needing to understand it.

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Name of the agent adapter to use when a step's action is
    /// `agent.<task>` and no per-call override is given.
    pub primary: String,
}

/// Engine-wide configuration: the retry ceiling, circuit breaker
/// thresholds, which agent is primary, and a forward-compatible bag for
/// anything else a particular adapter or deployment needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub agent: AgentConfig,
    pub retry: RetryPolicy,
    pub circuit_breaker: CircuitBreakerConfig,
    /// Root directory for state-store files and execution logs.
    pub state_dir: String,
    /// Keys not recognized by this struct, preserved but not inspected.
    pub extra: HashMap<String, serde_json::Value>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            agent: AgentConfig {
                primary: "default".to_string(),
            },
            retry: RetryPolicy::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            state_dir: ".conductor/state".to_string(),
            extra: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file, falling back to defaults for anything absent.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(toml::from_str(&contents)?)
    }

    /// Load from a YAML file, matching the format workflows themselves are
    /// typically authored in.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_yaml::from_str(&contents)?)
    }
}
