//! Engine configuration, loaded from YAML.

use crate::error::{ExtractError, Result};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_max_iterations() -> usize {
    100
}

fn default_provider_timeout_ms() -> u64 {
    5000
}

/// Raw YAML shape of the engine configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfigFile {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Zero disables the timeout.
    #[serde(default = "default_provider_timeout_ms")]
    pub provider_timeout_ms: u64,
    #[serde(default)]
    pub ignore_fields: Vec<String>,
    #[serde(default)]
    pub stem_overrides: HashMap<String, String>,
}

impl Default for EngineConfigFile {
    fn default() -> Self {
        EngineConfigFile {
            max_iterations: default_max_iterations(),
            provider_timeout_ms: default_provider_timeout_ms(),
            ignore_fields: Vec::new(),
            stem_overrides: HashMap::new(),
        }
    }
}

/// Validated engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_iterations: usize,
    pub provider_timeout: Option<Duration>,
    pub ignore_fields: Vec<Regex>,
    pub stem_overrides: HashMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_iterations: default_max_iterations(),
            provider_timeout: Some(Duration::from_millis(default_provider_timeout_ms())),
            ignore_fields: Vec::new(),
            stem_overrides: HashMap::new(),
        }
    }
}

impl TryFrom<EngineConfigFile> for EngineConfig {
    type Error = ExtractError;

    fn try_from(file: EngineConfigFile) -> Result<Self> {
        if file.max_iterations == 0 {
            return Err(ExtractError::Config(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        let ignore_fields = file
            .ignore_fields
            .iter()
            .map(|p| Regex::new(p))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(EngineConfig {
            max_iterations: file.max_iterations,
            provider_timeout: (file.provider_timeout_ms > 0)
                .then(|| Duration::from_millis(file.provider_timeout_ms)),
            ignore_fields,
            stem_overrides: file.stem_overrides,
        })
    }
}

impl EngineConfig {
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let file: EngineConfigFile = serde_yaml::from_str(contents)?;
        file.try_into()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut file = File::open(path).map_err(|e| {
            ExtractError::Config(format!("Failed to open config file {:?}: {}", path, e))
        })?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        Self::from_yaml(&contents)
    }

    /// Explicit path if given, else `config/engine.yaml` when present,
    /// else built-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match find_config_file("engine.yaml") {
            Some(path) => {
                log::info!("Using engine config {}", path.display());
                Self::load(&path)
            }
            None => Ok(Self::default()),
        }
    }
}

fn find_config_file(filename: &str) -> Option<PathBuf> {
    let candidates = [
        PathBuf::from(format!("config/{}", filename)),
        PathBuf::from(format!("../config/{}", filename)),
    ];
    candidates.into_iter().find(|p| p.exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_empty() {
        let config = EngineConfig::from_yaml("{}").unwrap();
        assert_eq!(config.max_iterations, 100);
        assert_eq!(config.provider_timeout, Some(Duration::from_millis(5000)));
        assert!(config.ignore_fields.is_empty());
    }

    #[test]
    fn full_document() {
        let yaml = r#"
max_iterations: 12
provider_timeout_ms: 0
ignore_fields:
  - '^\*$'
stem_overrides:
  kaunis: kaunis-irregular
"#;
        let config = EngineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.max_iterations, 12);
        assert_eq!(config.provider_timeout, None);
        assert!(config.ignore_fields[0].is_match("*"));
        assert_eq!(config.stem_overrides["kaunis"], "kaunis-irregular");
    }

    #[test]
    fn zero_iterations_rejected() {
        assert!(matches!(
            EngineConfig::from_yaml("max_iterations: 0"),
            Err(ExtractError::Config(_))
        ));
    }

    #[test]
    fn bad_ignore_pattern_rejected() {
        assert!(matches!(
            EngineConfig::from_yaml("ignore_fields: ['(']"),
            Err(ExtractError::Pattern(_))
        ));
    }

    #[test]
    fn unknown_key_rejected() {
        assert!(matches!(
            EngineConfig::from_yaml("max_iteration: 3"),
            Err(ExtractError::Yaml(_))
        ));
    }
}
