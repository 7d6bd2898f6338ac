//! Environment variable configuration
//!
//! Provides `TESTMUX_*` overrides for configuration.

use crate::utils::LogLevel;
use std::env;
use std::path::PathBuf;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "TESTMUX";

/// Configuration from environment variables
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnvConfig {
    /// Protocol trace file from TESTMUX_TRACE_FILE
    pub trace_file: Option<PathBuf>,
    /// Worker count from TESTMUX_MAX_PARALLEL
    pub max_parallel: Option<i64>,
    /// Host launcher from TESTMUX_LAUNCHER
    pub launcher: Option<String>,
    /// Config file from TESTMUX_CONFIG
    pub config_file: Option<PathBuf>,
    /// Output format from TESTMUX_FORMAT
    pub format: Option<String>,
    /// Verbose from TESTMUX_VERBOSE
    pub verbose: Option<bool>,
    /// Console log level from TESTMUX_LOG_LEVEL
    pub log_level: Option<LogLevel>,
}

impl EnvConfig {
    /// Load configuration from the process environment
    pub fn load() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through `lookup`, which receives full variable names
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| {
            lookup(&format!("{ENV_PREFIX}_{name}")).filter(|v| !v.trim().is_empty())
        };
        Self {
            trace_file: get("TRACE_FILE").map(PathBuf::from),
            max_parallel: get("MAX_PARALLEL").and_then(|v| v.trim().parse().ok()),
            launcher: get("LAUNCHER"),
            config_file: get("CONFIG").map(PathBuf::from),
            format: get("FORMAT"),
            verbose: get("VERBOSE").map(|v| parse_bool(&v)),
            log_level: get("LOG_LEVEL").and_then(|v| LogLevel::from_str(v.trim())),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.trace_file.is_some()
            || self.max_parallel.is_some()
            || self.launcher.is_some()
            || self.config_file.is_some()
            || self.format.is_some()
            || self.verbose.is_some()
            || self.log_level.is_some()
    }

    /// Print current environment configuration
    pub fn print_summary(&self) {
        println!("Environment Configuration:");
        println!("  {ENV_PREFIX}_TRACE_FILE:   {:?}", self.trace_file);
        println!("  {ENV_PREFIX}_MAX_PARALLEL: {:?}", self.max_parallel);
        println!("  {ENV_PREFIX}_LAUNCHER:     {:?}", self.launcher);
        println!("  {ENV_PREFIX}_CONFIG:       {:?}", self.config_file);
        println!("  {ENV_PREFIX}_FORMAT:       {:?}", self.format);
        println!("  {ENV_PREFIX}_VERBOSE:      {:?}", self.verbose);
        println!("  {ENV_PREFIX}_LOG_LEVEL:    {:?}", self.log_level);
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "1" | "true" | "yes" | "on" | "enabled"
    )
}
