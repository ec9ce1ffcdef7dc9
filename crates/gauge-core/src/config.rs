//! Engine configuration and execution budgets
//!
//! Limits bound every invocation so a script cannot hang or exhaust the
//! host. All fields have defaults; a JSON config file only needs the keys
//! it changes:
//!
//! ```json
//! { "limits": { "max_steps": 20000, "timeout_ms": 500 } }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Limits for one script invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionLimits {
    /// Statements and loop iterations executed (prevents infinite loops)
    pub max_steps: u64,
    /// Wall-clock budget in milliseconds
    pub timeout_ms: u64,
    /// Nested user function calls
    pub max_call_depth: usize,
    /// Elements in any list, tuple, dict or materialised range
    pub max_collection_len: usize,
    /// Bytes in any string the script builds
    pub max_string_len: usize,
    /// Bytes of printed output
    pub max_output_bytes: usize,
    /// Capability (data lookup) calls
    pub max_capability_calls: u64,
    /// Bytes of strings and collection slots built over the whole run
    pub max_memory_bytes: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_steps: 100_000,
            timeout_ms: 1_000,
            max_call_depth: 32,
            max_collection_len: 10_000,
            max_string_len: 1_000_000,
            max_output_bytes: 65_536,
            max_capability_calls: 1_000,
            max_memory_bytes: 64 * 1024 * 1024,
        }
    }
}

impl ExecutionLimits {
    /// Create new limits with all defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Tight limits for high-volume evaluation (e.g. many days per request)
    pub fn strict() -> Self {
        Self {
            max_steps: 10_000,
            timeout_ms: 250,
            max_call_depth: 16,
            max_collection_len: 1_000,
            max_string_len: 100_000,
            max_output_bytes: 16_384,
            max_capability_calls: 100,
            max_memory_bytes: 16 * 1024 * 1024,
        }
    }

    /// Generous limits for offline or administrative runs
    pub fn relaxed() -> Self {
        Self {
            max_steps: 1_000_000,
            timeout_ms: 5_000,
            max_call_depth: 64,
            max_collection_len: 100_000,
            max_string_len: 10_000_000,
            max_output_bytes: 1_048_576,
            max_capability_calls: 10_000,
            max_memory_bytes: 512 * 1024 * 1024,
        }
    }

    /// Builder: set max steps
    pub fn with_max_steps(mut self, max: u64) -> Self {
        self.max_steps = max;
        self
    }

    /// Builder: set timeout
    pub fn with_timeout_ms(mut self, timeout: u64) -> Self {
        self.timeout_ms = timeout;
        self
    }

    /// Builder: set max call depth
    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    /// Builder: set max collection length
    pub fn with_max_collection_len(mut self, len: usize) -> Self {
        self.max_collection_len = len;
        self
    }

    /// Builder: set max string length
    pub fn with_max_string_len(mut self, len: usize) -> Self {
        self.max_string_len = len;
        self
    }

    /// Builder: set max output bytes
    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    /// Builder: set max capability calls
    pub fn with_max_capability_calls(mut self, max: u64) -> Self {
        self.max_capability_calls = max;
        self
    }

    /// Builder: set the allocation budget
    pub fn with_max_memory_bytes(mut self, bytes: usize) -> Self {
        self.max_memory_bytes = bytes;
        self
    }

    /// Reject limits that would make every script fail
    pub fn validate(&self) -> Result<()> {
        let zero = [
            ("max_steps", self.max_steps == 0),
            ("timeout_ms", self.timeout_ms == 0),
            ("max_call_depth", self.max_call_depth == 0),
            ("max_collection_len", self.max_collection_len == 0),
            ("max_string_len", self.max_string_len == 0),
            ("max_memory_bytes", self.max_memory_bytes == 0),
        ];
        match zero.iter().find(|(_, is_zero)| *is_zero) {
            Some((name, _)) => Err(Error::Config(format!("{} must be greater than zero", name))),
            None => Ok(()),
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub limits: ExecutionLimits,
}

impl EngineConfig {
    pub fn with_limits(limits: ExecutionLimits) -> Self {
        EngineConfig { limits }
    }

    /// Parse and validate a JSON configuration document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("invalid config: {}", e)))?;
        config.limits.validate()?;
        Ok(config)
    }

    /// Read a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config = Self::from_json(&text)?;
        tracing::debug!(path = %path.display(), "loaded engine config");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = ExecutionLimits::default();
        assert_eq!(limits.max_steps, 100_000);
        assert_eq!(limits.timeout_ms, 1_000);
        assert_eq!(limits.max_output_bytes, 65_536);
        assert_eq!(limits.max_memory_bytes, 64 * 1024 * 1024);
        assert!(limits.validate().is_ok());
    }

    #[test]
    fn test_presets() {
        assert!(ExecutionLimits::strict().max_steps < ExecutionLimits::default().max_steps);
        assert!(ExecutionLimits::relaxed().max_steps > ExecutionLimits::default().max_steps);
        assert!(ExecutionLimits::strict().validate().is_ok());
        assert!(ExecutionLimits::relaxed().validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let limits = ExecutionLimits::default()
            .with_max_steps(500)
            .with_timeout_ms(50)
            .with_max_capability_calls(3)
            .with_max_memory_bytes(4096);
        assert_eq!(limits.max_steps, 500);
        assert_eq!(limits.max_memory_bytes, 4096);
        assert_eq!(limits.timeout_ms, 50);
        assert_eq!(limits.max_capability_calls, 3);
    }

    #[test]
    fn test_validate_rejects_zero() {
        let err = ExecutionLimits::default().with_max_steps(0).validate().unwrap_err();
        assert_eq!(err.to_string(), "Configuration error: max_steps must be greater than zero");
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = EngineConfig::from_json(r#"{"limits": {"max_steps": 42}}"#).unwrap();
        assert_eq!(config.limits.max_steps, 42);
        assert_eq!(config.limits.timeout_ms, 1_000);
        let empty = EngineConfig::from_json("{}").unwrap();
        assert_eq!(empty, EngineConfig::default());
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        assert!(matches!(EngineConfig::from_json("{"), Err(Error::Config(_))));
        assert!(matches!(
            EngineConfig::from_json(r#"{"limits": {"timeout_ms": 0}}"#),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let err = EngineConfig::load("/nonexistent/gauge.json").unwrap_err();
        assert!(err.to_string().contains("cannot read"));
    }
}
