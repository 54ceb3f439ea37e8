//! Engine configuration
//!
//! Built-in defaults, overlaid by `~/.vigil/config.json` (or an explicit
//! path), overlaid by `VIGIL_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use vigil_sandbox::SandboxConfig;

use crate::diagnostic::DEFAULT_TIMEOUT_MS;
use crate::language::Language;
use crate::screen::DEFAULT_MAX_CODE_BYTES;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid value for {var}: {value:?}")]
    Env { var: String, value: String },
}

/// One execution image per language
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub python: String,
    pub javascript: String,
    /// Must have `ts-node` on PATH
    pub typescript: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            python: Language::Python.profile().default_image.to_string(),
            javascript: Language::JavaScript.profile().default_image.to_string(),
            typescript: Language::TypeScript.profile().default_image.to_string(),
        }
    }
}

impl ImageConfig {
    pub fn image_for(&self, language: Language) -> &str {
        match language {
            Language::Python => &self.python,
            Language::JavaScript => &self.javascript,
            Language::TypeScript => &self.typescript,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub default_timeout_ms: u64,
    /// Requests asking for more are clamped to this
    pub max_timeout_ms: u64,
    pub max_code_bytes: usize,
    /// Diagnostics kept in the in-memory history
    pub history_limit: usize,
    pub images: ImageConfig,
    pub sandbox: SandboxConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            max_timeout_ms: 60_000,
            max_code_bytes: DEFAULT_MAX_CODE_BYTES,
            history_limit: 100,
            images: ImageConfig::default(),
            sandbox: SandboxConfig::default(),
        }
    }
}

impl EngineConfig {
    /// `~/.vigil/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".vigil").join("config.json"))
    }

    /// Parse a config file. The file must exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Full resolution: explicit path (must exist) or the default file
    /// (may be missing), then environment overrides.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load(&path)?,
                _ => Self::default(),
            },
        };

        config.apply_env()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_vars(|var| std::env::var(var).ok())
    }

    fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(value) = lookup("VIGIL_MEMORY_LIMIT") {
            self.sandbox.memory_limit = value;
        }
        if let Some(value) = lookup("VIGIL_CPU_LIMIT") {
            self.sandbox.cpu_limit = value;
        }
        if let Some(value) = lookup("VIGIL_SANDBOX_DIR") {
            self.sandbox.sandbox_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("VIGIL_TIMEOUT_MS") {
            self.default_timeout_ms = value.trim().parse().map_err(|_| ConfigError::Env {
                var: "VIGIL_TIMEOUT_MS".to_string(),
                value: value.clone(),
            })?;
        }
        if let Some(value) = lookup("VIGIL_NETWORK_DISABLED") {
            self.sandbox.network_disabled = parse_bool(&value).ok_or_else(|| ConfigError::Env {
                var: "VIGIL_NETWORK_DISABLED".to_string(),
                value: value.clone(),
            })?;
        }
        if let Some(value) = lookup("VIGIL_PYTHON_IMAGE") {
            self.images.python = value;
        }
        if let Some(value) = lookup("VIGIL_JAVASCRIPT_IMAGE") {
            self.images.javascript = value;
        }
        if let Some(value) = lookup("VIGIL_TYPESCRIPT_IMAGE") {
            self.images.typescript = value;
        }
        Ok(())
    }

    /// 0 / missing means the default; anything above the max is clamped
    pub fn effective_timeout_ms(&self, requested: Option<u64>) -> u64 {
        match requested {
            None | Some(0) => self.default_timeout_ms.min(self.max_timeout_ms),
            Some(ms) => ms.min(self.max_timeout_ms),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.default_timeout_ms, 10_000);
        assert_eq!(config.max_timeout_ms, 60_000);
        assert_eq!(config.max_code_bytes, 100_000);
        assert_eq!(config.images.image_for(Language::Python), "python:3.12-alpine");
        assert_eq!(config.sandbox.memory_limit, "512m");
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"default_timeout_ms": 2000, "sandbox": {{"memory_limit": "256m"}}, "images": {{"python": "python:3.11-slim"}}}}"#
        )
        .unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.default_timeout_ms, 2000);
        assert_eq!(config.sandbox.memory_limit, "256m");
        assert_eq!(config.sandbox.cpu_limit, "0.5");
        assert_eq!(config.images.python, "python:3.11-slim");
        assert_eq!(config.images.javascript, "node:20-alpine");
    }

    #[test]
    fn test_load_errors() {
        let missing = EngineConfig::load(Path::new("/definitely/not/here.json"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));

        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(
            EngineConfig::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = EngineConfig::default();
        config
            .apply_vars(vars(&[
                ("VIGIL_MEMORY_LIMIT", "1g"),
                ("VIGIL_TIMEOUT_MS", "2500"),
                ("VIGIL_NETWORK_DISABLED", "false"),
                ("VIGIL_TYPESCRIPT_IMAGE", "vigil/ts-node:20"),
            ]))
            .unwrap();

        assert_eq!(config.sandbox.memory_limit, "1g");
        assert_eq!(config.default_timeout_ms, 2500);
        assert!(!config.sandbox.network_disabled);
        assert_eq!(config.images.image_for(Language::TypeScript), "vigil/ts-node:20");
    }

    #[test]
    fn test_bad_env_value() {
        let mut config = EngineConfig::default();
        let err = config
            .apply_vars(vars(&[("VIGIL_TIMEOUT_MS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("VIGIL_TIMEOUT_MS"));
    }

    #[test]
    fn test_effective_timeout() {
        let config = EngineConfig::default();
        assert_eq!(config.effective_timeout_ms(None), 10_000);
        assert_eq!(config.effective_timeout_ms(Some(0)), 10_000);
        assert_eq!(config.effective_timeout_ms(Some(500)), 500);
        assert_eq!(config.effective_timeout_ms(Some(3_600_000)), 60_000);
    }
}
