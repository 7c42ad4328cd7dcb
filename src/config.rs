//! Runtime configuration.
//!
//! Loaded from YAML (every field optional) and then adjusted from the
//! environment:
//!
//! | Variable | Field |
//! |---|---|
//! | `TANGIBLE_REPLACE_POLICY` | `model.replace_policy` (`remove_then_add` / `recompute`) |
//! | `TANGIBLE_MAX_CASCADE` | `model.max_cascade` |
//! | `TANGIBLE_WRITE_TIMEOUT_MS` | `peripheral.write_timeout_ms` (`0` or empty disables) |

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// YAML parsing failed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// File I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A setting had an unusable value.
    #[error("Invalid value for {name}: {value}")]
    Invalid { name: String, value: String },
}

/// How gates see a component that is replaced while present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplacePolicy {
    /// Dependent gates are torn down and then re-activated with the new value.
    #[default]
    RemoveThenAdd,
    /// Dependent gates stay active and their activation callback runs again.
    Recompute,
}

impl FromStr for ReplacePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "remove_then_add" | "remove-then-add" => Ok(ReplacePolicy::RemoveThenAdd),
            "recompute" => Ok(ReplacePolicy::Recompute),
            other => Err(ConfigError::Invalid {
                name: "replace_policy".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for ReplacePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplacePolicy::RemoveThenAdd => write!(f, "remove_then_add"),
            ReplacePolicy::Recompute => write!(f, "recompute"),
        }
    }
}

/// Model store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub replace_policy: ReplacePolicy,
    /// Maximum number of queued mutations drained by one outermost call.
    pub max_cascade: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            replace_policy: ReplacePolicy::default(),
            max_cascade: 10_000,
        }
    }
}

/// Peripheral manager settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeripheralConfig {
    /// Upper bound on one hardware write; `None` waits indefinitely.
    pub write_timeout_ms: Option<u64>,
}

impl PeripheralConfig {
    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout_ms.map(Duration::from_millis)
    }
}

/// Top-level configuration for a surface.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub model: ModelConfig,
    pub peripheral: PeripheralConfig,
}

impl RuntimeConfig {
    /// Parse from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Parse from a YAML file on disk.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Apply `TANGIBLE_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(policy) = lookup("TANGIBLE_REPLACE_POLICY") {
            self.model.replace_policy = policy.parse()?;
        }
        if let Some(limit) = lookup("TANGIBLE_MAX_CASCADE") {
            self.model.max_cascade = match limit.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => return Err(invalid("TANGIBLE_MAX_CASCADE", &limit)),
            };
        }
        if let Some(timeout) = lookup("TANGIBLE_WRITE_TIMEOUT_MS") {
            self.peripheral.write_timeout_ms = match timeout.trim() {
                "" | "0" => None,
                ms => Some(
                    ms.parse::<u64>()
                        .map_err(|_| invalid("TANGIBLE_WRITE_TIMEOUT_MS", &timeout))?,
                ),
            };
        }
        log::debug!("[Config] effective configuration: {:?}", self);
        Ok(())
    }
}

fn invalid(name: &str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        name: name.to_string(),
        value: value.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.model.replace_policy, ReplacePolicy::RemoveThenAdd);
        assert_eq!(config.model.max_cascade, 10_000);
        assert!(config.peripheral.write_timeout().is_none());
    }

    #[test]
    fn test_from_yaml_partial() {
        let config = RuntimeConfig::from_yaml("model:\n  replace_policy: recompute\n").unwrap();
        assert_eq!(config.model.replace_policy, ReplacePolicy::Recompute);
        assert_eq!(config.model.max_cascade, 10_000);

        let empty = RuntimeConfig::from_yaml("{}").unwrap();
        assert_eq!(empty, RuntimeConfig::default());
    }

    #[test]
    fn test_from_yaml_rejects_unknown_policy() {
        let err = RuntimeConfig::from_yaml("model:\n  replace_policy: sometimes\n").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "peripheral:\n  write_timeout_ms: 250").unwrap();
        let config = RuntimeConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(
            config.peripheral.write_timeout(),
            Some(Duration::from_millis(250))
        );
    }

    #[test]
    fn test_from_yaml_file_missing() {
        let err = RuntimeConfig::from_yaml_file("/nonexistent/tangible.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_overrides() {
        let mut config = RuntimeConfig::default();
        config
            .apply_overrides(lookup(&[
                ("TANGIBLE_REPLACE_POLICY", "Recompute"),
                ("TANGIBLE_MAX_CASCADE", "64"),
                ("TANGIBLE_WRITE_TIMEOUT_MS", "1500"),
            ]))
            .unwrap();
        assert_eq!(config.model.replace_policy, ReplacePolicy::Recompute);
        assert_eq!(config.model.max_cascade, 64);
        assert_eq!(config.peripheral.write_timeout_ms, Some(1500));

        config
            .apply_overrides(lookup(&[("TANGIBLE_WRITE_TIMEOUT_MS", "0")]))
            .unwrap();
        assert_eq!(config.peripheral.write_timeout_ms, None);
    }

    #[test]
    fn test_invalid_overrides() {
        let mut config = RuntimeConfig::default();
        let err = config
            .apply_overrides(lookup(&[("TANGIBLE_MAX_CASCADE", "lots")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref name, .. } if name == "TANGIBLE_MAX_CASCADE"));

        let err = config
            .apply_overrides(lookup(&[("TANGIBLE_MAX_CASCADE", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));

        let err = config
            .apply_overrides(lookup(&[("TANGIBLE_REPLACE_POLICY", "never")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        assert_eq!(config, RuntimeConfig::default());
    }
}
