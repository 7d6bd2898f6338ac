//! Logging utilities
//!
//! Console logging plus an optional protocol trace file.

use anyhow::{Context, Result};
use std::fs::File;
use std::path::Path;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Log level configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// Console filter; `RUST_LOG` overrides the level when set
fn console_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("testmux={}", level.to_tracing_level())))
}

/// Initialize logging
///
/// With `trace_file`, every event of this crate down to `trace` is also written
/// to that file, including each protocol message.
pub fn init_logging(level: LogLevel, trace_file: Option<&Path>) -> Result<()> {
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .with_filter(console_filter(level));

    let trace = match trace_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create trace file: {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_thread_ids(true)
                    .with_filter(EnvFilter::new("testmux=trace")),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(trace)
        .try_init()
        .context("Failed to initialize logging")?;
    Ok(())
}
