//! Aggregated run results
//!
//! Per-module and whole-run summaries built by the reporting sink.

use super::messages::{DiscoveredTest, FileArtifact, TestResult, TestState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Everything observed for one test module
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ModuleSummary {
    pub module_path: String,
    pub target_framework: Option<String>,
    pub architecture: Option<String>,
    pub execution_id: Option<String>,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
    pub timeouts: usize,
    pub cancelled: usize,
    pub total_duration_ms: u64,
    pub failures: Vec<TestResult>,
    pub discovered: Vec<DiscoveredTest>,
    pub artifacts: Vec<FileArtifact>,
    pub host_errors: Vec<String>,
    pub exit_code: Option<i32>,
    pub handshake_failed: bool,
    /// Captured process output, kept only when the host exited abnormally
    pub output: Vec<String>,
}

impl ModuleSummary {
    pub fn new(module_path: impl Into<String>) -> Self {
        Self {
            module_path: module_path.into(),
            ..Default::default()
        }
    }

    pub fn record(&mut self, result: &TestResult) {
        let details = result.details();
        match details.state {
            TestState::Passed => self.passed += 1,
            TestState::Skipped => self.skipped += 1,
            TestState::Failed => self.failed += 1,
            TestState::Error => self.errors += 1,
            TestState::Timeout => self.timeouts += 1,
            TestState::Cancelled => self.cancelled += 1,
        }
        self.total_duration_ms += details.duration().as_millis() as u64;
        if !details.state.is_success() {
            self.failures.push(result.clone());
        }
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped + self.errors + self.timeouts + self.cancelled
    }

    pub fn pass_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            (self.passed as f64 / total as f64) * 100.0
        }
    }

    /// A module succeeds when its host exited cleanly and reported no errors
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0) && self.host_errors.is_empty() && !self.handshake_failed
    }
}

impl fmt::Display for ModuleSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.module_path)?;
        if let Some(tfm) = &self.target_framework {
            write!(f, " ({tfm}")?;
            if let Some(arch) = &self.architecture {
                write!(f, "|{arch}")?;
            }
            write!(f, ")")?;
        }
        write!(
            f,
            " - Total: {} | Pass: {} | Fail: {} | Skip: {}",
            self.total(),
            self.passed,
            self.failed + self.errors + self.timeouts,
            self.skipped
        )
    }
}

/// Result of one complete testmux run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: i32,
    pub cancelled: bool,
    pub modules: Vec<ModuleSummary>,
}

impl RunSummary {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: None,
            exit_code: 0,
            cancelled: false,
            modules: Vec::new(),
        }
    }

    pub fn total(&self) -> usize {
        self.modules.iter().map(ModuleSummary::total).sum()
    }

    pub fn passed(&self) -> usize {
        self.modules.iter().map(|m| m.passed).sum()
    }

    pub fn failed(&self) -> usize {
        self.modules
            .iter()
            .map(|m| m.failed + m.errors + m.timeouts)
            .sum()
    }

    pub fn skipped(&self) -> usize {
        self.modules.iter().map(|m| m.skipped).sum()
    }

    pub fn discovered(&self) -> usize {
        self.modules.iter().map(|m| m.discovered.len()).sum()
    }

    pub fn duration_ms(&self) -> u64 {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds().max(0) as u64)
            .unwrap_or(0)
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}
