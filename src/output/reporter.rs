//! Reporting sink
//!
//! Receives correlated supervisor events and folds them into per-module summaries.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use tracing::warn;

use super::formatter::ResultFormatter;
use crate::models::{
    DiscoveredTest, FileArtifact, ModuleSummary, RunSummary, SessionEvent, TestResult,
};
use crate::orchestrator::ExecutionContext;
use crate::supervisor::{HostFailure, ProcessExit};

/// Receiver of correlated run events
///
/// Every call carries the execution context registered for the emitting supervisor.
pub trait Reporter: Send + Sync {
    fn assembly_run_started(&self, context: &ExecutionContext, instance_id: Option<&str>);

    fn session_event(&self, _context: &ExecutionContext, _event: &SessionEvent) {}

    fn test_discovered(&self, context: &ExecutionContext, test: &DiscoveredTest);

    fn test_completed(&self, context: &ExecutionContext, result: &TestResult);

    fn artifact_added(&self, context: &ExecutionContext, artifact: &FileArtifact);

    fn module_error(&self, context: &ExecutionContext, failure: &HostFailure);

    /// The host exited after a successful handshake
    fn assembly_run_completed(&self, context: &ExecutionContext, exit: &ProcessExit);

    /// The host exited without ever completing a handshake
    fn handshake_failure(&self, context: &ExecutionContext, exit: &ProcessExit);
}

/// Reporter that aggregates everything into a [`RunSummary`]
pub struct SummaryReporter {
    started_at: DateTime<Utc>,
    modules: Mutex<BTreeMap<String, ModuleSummary>>,
    live: Option<ResultFormatter>,
}

impl SummaryReporter {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            modules: Mutex::new(BTreeMap::new()),
            live: None,
        }
    }

    /// Print each completed test as it arrives
    pub fn with_live_output(mut self, formatter: ResultFormatter) -> Self {
        self.live = Some(formatter);
        self
    }

    fn update(&self, context: &ExecutionContext, f: impl FnOnce(&mut ModuleSummary)) {
        let mut modules = self.modules.lock().unwrap_or_else(PoisonError::into_inner);
        let summary = modules
            .entry(context.module_path.clone())
            .or_insert_with(|| ModuleSummary::new(context.module_path.clone()));
        if summary.target_framework.is_none() {
            summary.target_framework = context.target_framework.clone();
        }
        if summary.architecture.is_none() {
            summary.architecture = context.architecture.clone();
        }
        if summary.execution_id.is_none() {
            summary.execution_id = context.execution_id.clone();
        }
        f(summary);
    }

    pub fn module(&self, module_path: &str) -> Option<ModuleSummary> {
        self.modules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(module_path)
            .cloned()
    }

    /// Build the final summary; modules are ordered by path
    pub fn finish(&self, exit_code: i32, cancelled: bool) -> RunSummary {
        let modules = self.modules.lock().unwrap_or_else(PoisonError::into_inner);
        RunSummary {
            started_at: self.started_at,
            finished_at: Some(Utc::now()),
            exit_code,
            cancelled,
            modules: modules.values().cloned().collect(),
        }
    }
}

impl Default for SummaryReporter {
    fn default() -> Self {
        Self::new()
    }
}

fn captured_output(exit: &ProcessExit) -> Vec<String> {
    exit.stdout.iter().chain(&exit.stderr).cloned().collect()
}

impl Reporter for SummaryReporter {
    fn assembly_run_started(&self, context: &ExecutionContext, _instance_id: Option<&str>) {
        self.update(context, |_| {});
    }

    fn test_discovered(&self, context: &ExecutionContext, test: &DiscoveredTest) {
        self.update(context, |summary| summary.discovered.push(test.clone()));
    }

    fn test_completed(&self, context: &ExecutionContext, result: &TestResult) {
        if let Some(formatter) = &self.live {
            println!("{}", formatter.format_result(&context.module_path, result));
        }
        self.update(context, |summary| summary.record(result));
    }

    fn artifact_added(&self, context: &ExecutionContext, artifact: &FileArtifact) {
        self.update(context, |summary| summary.artifacts.push(artifact.clone()));
    }

    fn module_error(&self, context: &ExecutionContext, failure: &HostFailure) {
        warn!(module = %context.module_path, "{failure}");
        self.update(context, |summary| summary.host_errors.push(failure.to_string()));
    }

    fn assembly_run_completed(&self, context: &ExecutionContext, exit: &ProcessExit) {
        self.update(context, |summary| {
            summary.exit_code = Some(exit.exit_code);
            if exit.exit_code != 0 {
                summary.output = captured_output(exit);
            }
        });
    }

    fn handshake_failure(&self, context: &ExecutionContext, exit: &ProcessExit) {
        self.update(context, |summary| {
            summary.exit_code = Some(exit.exit_code);
            summary.handshake_failed = true;
            summary.output = captured_output(exit);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TestResultDetails, TestState};
    use crate::supervisor::FailureKind;

    fn context(path: &str) -> ExecutionContext {
        ExecutionContext {
            module_path: path.to_string(),
            target_framework: Some("net8.0".to_string()),
            architecture: Some("x64".to_string()),
            execution_id: Some("exec-1".to_string()),
        }
    }

    fn exit(code: i32) -> ProcessExit {
        ProcessExit {
            exit_code: code,
            stdout: vec!["out".to_string()],
            stderr: vec!["err".to_string()],
            handshake_received: true,
        }
    }

    #[test]
    fn test_results_grouped_by_module() {
        let reporter = SummaryReporter::new();
        let a = context("A.dll");
        let b = context("B.dll");

        reporter.assembly_run_started(&a, None);
        reporter.test_completed(
            &a,
            &TestResult::Successful(TestResultDetails::new("1", "One", TestState::Passed)),
        );
        reporter.test_completed(
            &b,
            &TestResult::Failed {
                details: TestResultDetails::new("2", "Two", TestState::Failed),
                error_message: None,
                error_stack_trace: None,
            },
        );
        reporter.assembly_run_completed(&a, &exit(0));
        reporter.assembly_run_completed(&b, &exit(2));

        let summary = reporter.finish(1, false);
        assert_eq!(summary.modules.len(), 2);
        assert_eq!(summary.passed(), 1);
        assert_eq!(summary.failed(), 1);
        assert!(summary.finished_at.is_some());

        let a = &summary.modules[0];
        assert_eq!(a.module_path, "A.dll");
        assert_eq!(a.architecture.as_deref(), Some("x64"));
        assert!(a.output.is_empty());
        assert!(a.is_success());

        let b = &summary.modules[1];
        assert_eq!(b.output, vec!["out", "err"]);
        assert!(!b.is_success());
    }

    #[test]
    fn test_handshake_failure_keeps_output() {
        let reporter = SummaryReporter::new();
        let ctx = context("Crash.dll");
        reporter.module_error(&ctx, &HostFailure::new(FailureKind::Launch, "not found"));
        reporter.handshake_failure(&ctx, &exit(1));

        let module = reporter.module("Crash.dll").unwrap();
        assert!(module.handshake_failed);
        assert_eq!(module.exit_code, Some(1));
        assert_eq!(module.host_errors, vec!["launch error: not found"]);
        assert_eq!(module.output.len(), 2);
    }

    #[test]
    fn test_discovered_and_artifacts() {
        let reporter = SummaryReporter::new();
        let ctx = context("A.dll");
        reporter.test_discovered(
            &ctx,
            &DiscoveredTest {
                uid: "t".to_string(),
                display_name: "T".to_string(),
            },
        );
        reporter.artifact_added(&ctx, &FileArtifact::new("/tmp/report.trx"));

        let summary = reporter.finish(0, false);
        assert_eq!(summary.discovered(), 1);
        assert_eq!(summary.modules[0].artifacts.len(), 1);
    }
}
