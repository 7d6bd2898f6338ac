//! Configuration module
//!
//! Layers the config file, `TESTMUX_*` environment and defaults. CLI flags are
//! applied on top by the caller.

mod env;

pub use env::EnvConfig;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::output::OutputFormat;
use crate::supervisor::{LaunchOptions, DEFAULT_LAUNCHER};

/// Standard config file locations, searched in order
const CONFIG_LOCATIONS: &[&str] = &[
    "./testmux.yaml",
    "./.testmux.yaml",
    "~/.config/testmux/config.yaml",
];

/// Application configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Concurrent test hosts; unset or non-positive means one per logical core
    pub max_parallel_test_modules: Option<i64>,

    /// Launcher used for managed (`.dll`) modules
    pub host_launcher: String,

    /// Seconds open connections may outlive their host process
    pub drain_timeout_secs: u64,

    pub results_directory: Option<PathBuf>,

    pub diagnostic_output_directory: Option<PathBuf>,

    /// Output format (table, json, json-pretty, csv, summary)
    pub output_format: String,

    /// Extra environment variables for every test host
    pub environment: BTreeMap<String, String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_parallel_test_modules: None,
            host_launcher: DEFAULT_LAUNCHER.to_string(),
            drain_timeout_secs: 30,
            results_directory: None,
            diagnostic_output_directory: None,
            output_format: "table".to_string(),
            environment: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    /// Find configuration file: explicit path, `TESTMUX_CONFIG`, then standard locations
    pub fn find(explicit: Option<&Path>, env: &EnvConfig) -> Option<PathBuf> {
        if let Some(path) = explicit.or(env.config_file.as_deref()) {
            return Some(path.to_path_buf());
        }
        CONFIG_LOCATIONS
            .iter()
            .map(|location| expand_path(location))
            .find(|path| path.exists())
    }

    /// Resolve file and environment layers on top of the defaults
    pub fn resolve(explicit: Option<&Path>, env: &EnvConfig) -> Result<Self> {
        let mut config = match Self::find(explicit, env) {
            Some(path) => Self::load(&path)?,
            None => Self::default(),
        };
        config.apply_env(env);
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml_file(path) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    pub fn apply_env(&mut self, env: &EnvConfig) {
        if let Some(max_parallel) = env.max_parallel {
            self.max_parallel_test_modules = Some(max_parallel);
        }
        if let Some(launcher) = &env.launcher {
            self.host_launcher = launcher.clone();
        }
        if let Some(format) = &env.format {
            self.output_format = format.clone();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.host_launcher.trim().is_empty() {
            bail!("host_launcher must not be empty");
        }
        if self.drain_timeout_secs == 0 {
            bail!("drain_timeout_secs must be greater than zero");
        }
        if OutputFormat::from_str(&self.output_format).is_none() {
            bail!("Unknown output format: {}", self.output_format);
        }
        Ok(())
    }

    pub fn output_format(&self) -> OutputFormat {
        OutputFormat::from_str(&self.output_format).unwrap_or(OutputFormat::Table)
    }

    /// Launch options every supervisor of a run shares
    pub fn launch_options(&self) -> LaunchOptions {
        let mut options = LaunchOptions::default()
            .with_launcher(self.host_launcher.clone())
            .with_drain_timeout(Duration::from_secs(self.drain_timeout_secs));
        options.results_directory = self.results_directory.clone();
        options.diagnostic_output_directory = self.diagnostic_output_directory.clone();
        options.environment = self.environment.clone();
        options
    }
}

/// Default location written by `testmux config init`
pub fn default_config_path() -> PathBuf {
    expand_path(CONFIG_LOCATIONS[CONFIG_LOCATIONS.len() - 1])
}

/// Expand ~ to home directory
fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Check if file is YAML based on extension
fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}
