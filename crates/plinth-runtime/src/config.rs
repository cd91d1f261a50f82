//! Runtime configuration
//!
//! Loaded from YAML, TOML or JSON (chosen by file extension). String values
//! may reference environment variables as `${VAR}` or `${VAR:-default}`.

use crate::error::{Result, RuntimeError};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Directory holding one sub-directory per plugin
    pub plugins_root: PathBuf,

    /// Start every resolved plugin right after loading
    pub auto_start: bool,

    /// When non-empty, only these plugins are enabled
    pub enabled_plugins: Vec<String>,

    /// Plugins that are disabled after resolution
    pub disabled_plugins: Vec<String>,

    /// Resource name globs (`*`, `?`) enumerated across the host boundary
    pub shared_resources: Vec<String>,

    /// Host version checked against each descriptor's `requires`
    pub system_version: Option<String>,

    /// Manifest file names searched in each plugin directory, in order
    pub manifest_names: Vec<String>,

    /// Hot reload settings
    pub hot_reload: HotReloadConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            plugins_root: PathBuf::from("plugins"),
            auto_start: true,
            enabled_plugins: Vec::new(),
            disabled_plugins: Vec::new(),
            shared_resources: Vec::new(),
            system_version: None,
            manifest_names: default_manifest_names(),
            hot_reload: HotReloadConfig::default(),
        }
    }
}

fn default_manifest_names() -> Vec<String> {
    ["plugin.toml", "plugin.yaml", "plugin.yml", "plugin.json"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Hot reload settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotReloadConfig {
    /// Watch the plugins root and reload changed plugins
    pub enabled: bool,

    /// Quiet period before a change triggers a reload
    #[serde(with = "humantime_serde")]
    pub debounce: Duration,
}

impl Default for HotReloadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            debounce: Duration::from_millis(500),
        }
    }
}

impl RuntimeConfig {
    /// Load and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = load_from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.plugins_root.as_os_str().is_empty() {
            return Err(RuntimeError::config("plugins_root must not be empty"));
        }

        if let Some(version) = &self.system_version {
            semver::Version::parse(version).map_err(|e| {
                RuntimeError::config(format!("invalid system_version '{version}': {e}"))
            })?;
        }

        if self.manifest_names.is_empty() {
            return Err(RuntimeError::config("manifest_names must not be empty"));
        }

        for pattern in &self.shared_resources {
            if pattern.is_empty() {
                return Err(RuntimeError::config("shared_resources entries must not be empty"));
            }
        }

        Ok(())
    }

    /// Parsed host version, if configured
    pub fn system_version(&self) -> Option<semver::Version> {
        self.system_version
            .as_deref()
            .and_then(|v| semver::Version::parse(v).ok())
    }
}

/// Configuration format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML format
    Yaml,
    /// TOML format
    Toml,
    /// JSON format
    Json,
}

impl ConfigFormat {
    /// Detect format from file extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .ok_or_else(|| RuntimeError::config("Unable to detect config format"))?;

        match ext {
            "yaml" | "yml" => Ok(ConfigFormat::Yaml),
            "toml" => Ok(ConfigFormat::Toml),
            "json" => Ok(ConfigFormat::Json),
            _ => Err(RuntimeError::config(format!("Unsupported config format: {ext}"))),
        }
    }
}

/// Load any deserializable document from a file
pub fn load_from_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| {
        RuntimeError::config(format!("Failed to read {}: {e}", path.display()))
    })?;
    let format = ConfigFormat::from_path(path)?;
    load_from_str(&content, format)
}

/// Load any deserializable document from a string
pub fn load_from_str<T: DeserializeOwned>(content: &str, format: ConfigFormat) -> Result<T> {
    let expanded = expand_env_vars(content)?;

    let value = match format {
        ConfigFormat::Yaml => serde_yaml::from_str(&expanded)
            .map_err(|e| RuntimeError::config(format!("Failed to parse YAML: {e}")))?,
        ConfigFormat::Toml => toml::from_str(&expanded)
            .map_err(|e| RuntimeError::config(format!("Failed to parse TOML: {e}")))?,
        ConfigFormat::Json => serde_json::from_str(&expanded)
            .map_err(|e| RuntimeError::config(format!("Failed to parse JSON: {e}")))?,
    };

    Ok(value)
}

/// Expand `${VAR}` and `${VAR:-default}` references
fn expand_env_vars(content: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(:-([^}]*))?\}")
        .map_err(|e| RuntimeError::config(format!("Invalid regex: {e}")))?;

    let mut result = String::with_capacity(content.len());
    let mut last = 0;

    for cap in re.captures_iter(content) {
        let (Some(whole), Some(name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };
        let value = match (env::var(name.as_str()), cap.get(3)) {
            (Ok(value), _) => value,
            (Err(_), Some(default)) => default.as_str().to_string(),
            (Err(_), None) => {
                return Err(RuntimeError::config(format!(
                    "Environment variable '{}' not set and no default provided",
                    name.as_str()
                )));
            }
        };

        result.push_str(&content[last..whole.start()]);
        result.push_str(&value);
        last = whole.end();
    }

    result.push_str(&content[last..]);
    Ok(result)
}
