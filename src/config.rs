// Skein Engine Configuration
// Limits and feature switches, loadable from JSON

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config file `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid engine config: {0}")]
    Json(#[from] serde_json::Error),
}

/// Engine configuration (skein.json)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Value stack items per thread (and per inline call)
    pub max_stack_depth: usize,
    /// Nested inline calls per thread
    pub max_inline_depth: usize,
    /// Reuse compiled programs for identical source
    pub cache_scripts: bool,
    /// Start every thread with per-action tracing on
    pub trace_by_default: bool,
    /// Install the standard host functions and constants
    pub builtins: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_stack_depth: 4096,
            max_inline_depth: 256,
            cache_scripts: true,
            trace_by_default: false,
            builtins: true,
        }
    }
}

impl EngineConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = EngineConfig::from_json(r#"{ "max_inline_depth": 16, "builtins": false }"#).unwrap();
        assert_eq!(config.max_inline_depth, 16);
        assert!(!config.builtins);
        assert_eq!(config.max_stack_depth, 4096);
        assert!(config.cache_scripts);
    }

    #[test]
    fn test_bad_json() {
        let err = EngineConfig::from_json("{ max_stack_depth: }").unwrap_err();
        assert!(err.to_string().starts_with("Invalid engine config"));
    }

    #[test]
    fn test_roundtrip() {
        let config = EngineConfig {
            trace_by_default: true,
            ..EngineConfig::default()
        };
        assert_eq!(EngineConfig::from_json(&config.to_json()).unwrap(), config);
    }
}
