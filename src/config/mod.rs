//! JIT configuration
//!
//! Parameters can come from defaults, a JSON file, or the `--jit` parameter
//! string syntax (`threshold=3,trace_eagerness=2`).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Tunable JIT parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JitConfig {
    /// Whether tracing happens at all
    pub enabled: bool,
    /// Merge-point hits for one key before a loop is traced
    pub threshold: u32,
    /// Guard failures before a bridge is traced from that guard
    pub trace_eagerness: u32,
    /// Maximum recorded operations before the trace aborts as too long
    pub trace_limit: usize,
    /// Fold quasi-immutable reads into guarded constants
    pub enable_quasi_immut: bool,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 1039,
            trace_eagerness: 200,
            trace_limit: 6000,
            enable_quasi_immut: true,
        }
    }
}

/// Names accepted by [`JitConfig::apply_param`]
pub const PARAM_NAMES: &[&str] = &[
    "threshold",
    "trace_eagerness",
    "trace_limit",
    "enable_quasi_immut",
];

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::invalid_param(name, format!("expected an integer, got {:?}", value)))
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim() {
        "1" | "true" | "on" => Ok(true),
        "0" | "false" | "off" => Ok(false),
        other => Err(Error::invalid_param(name, format!("expected a boolean, got {:?}", other))),
    }
}

impl JitConfig {
    /// Small thresholds so tests and demos reach the compiler quickly
    pub fn for_tests() -> Self {
        Self {
            threshold: 3,
            trace_eagerness: 2,
            ..Self::default()
        }
    }

    /// Set one parameter by name
    pub fn apply_param(&mut self, name: &str, value: &str) -> Result<()> {
        match name.trim() {
            "threshold" => self.threshold = parse_number(name, value)?,
            "trace_eagerness" => self.trace_eagerness = parse_number(name, value)?,
            "trace_limit" => self.trace_limit = parse_number(name, value)?,
            "enable_quasi_immut" => self.enable_quasi_immut = parse_flag(name, value)?,
            other => {
                return Err(Error::invalid_param(
                    other,
                    format!("unknown parameter (expected one of {})", PARAM_NAMES.join(", ")),
                ))
            }
        }
        Ok(())
    }

    /// Apply a comma-separated parameter string on top of `self`.
    ///
    /// `off` disables the JIT, `default` resets every parameter.
    pub fn apply_params(&mut self, params: &str) -> Result<()> {
        for item in params.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match item {
                "off" => self.enabled = false,
                "default" => *self = Self::default(),
                _ => {
                    let (name, value) = item
                        .split_once('=')
                        .ok_or_else(|| Error::invalid_param(item, "expected name=value"))?;
                    self.apply_param(name, value)?;
                }
            }
        }
        self.validate()
    }

    /// Defaults with a parameter string applied
    pub fn from_params(params: &str) -> Result<Self> {
        let mut config = Self::default();
        config.apply_params(params)?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.threshold == 0 {
            return Err(Error::ConfigError("threshold must be at least 1".to_string()));
        }
        if self.trace_eagerness == 0 {
            return Err(Error::ConfigError("trace_eagerness must be at least 1".to_string()));
        }
        if self.trace_limit == 0 {
            return Err(Error::ConfigError("trace_limit must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = JitConfig::default();
        assert!(config.enabled);
        assert_eq!(config.threshold, 1039);
        assert_eq!(config.trace_eagerness, 200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_params() {
        let config = JitConfig::from_params("threshold=3, trace_eagerness=2,trace_limit=50").unwrap();
        assert_eq!(config.threshold, 3);
        assert_eq!(config.trace_eagerness, 2);
        assert_eq!(config.trace_limit, 50);
        assert_eq!(JitConfig::for_tests().threshold, 3);
    }

    #[test]
    fn test_params_off_and_default() {
        let config = JitConfig::from_params("threshold=5,off").unwrap();
        assert!(!config.enabled);
        assert_eq!(config.threshold, 5);

        let config = JitConfig::from_params("threshold=5,default").unwrap();
        assert_eq!(config, JitConfig::default());
    }

    #[test]
    fn test_bad_params() {
        assert!(matches!(
            JitConfig::from_params("threshold=abc"),
            Err(Error::InvalidParam { .. })
        ));
        assert!(matches!(
            JitConfig::from_params("no_such_thing=1"),
            Err(Error::InvalidParam { .. })
        ));
        assert!(matches!(JitConfig::from_params("threshold"), Err(Error::InvalidParam { .. })));
        assert!(matches!(JitConfig::from_params("threshold=0"), Err(Error::ConfigError(_))));
        assert!(matches!(
            JitConfig::from_params("enable_quasi_immut=maybe"),
            Err(Error::InvalidParam { .. })
        ));
    }

    #[test]
    fn test_json_partial() {
        let config = JitConfig::from_json(r#"{"threshold": 7, "enable_quasi_immut": false}"#).unwrap();
        assert_eq!(config.threshold, 7);
        assert!(!config.enable_quasi_immut);
        assert_eq!(config.trace_limit, 6000);
    }

    #[test]
    fn test_json_invalid() {
        assert!(matches!(JitConfig::from_json("{"), Err(Error::JsonError { .. })));
        assert!(matches!(
            JitConfig::from_json(r#"{"trace_limit": 0}"#),
            Err(Error::ConfigError(_))
        ));
    }
}
