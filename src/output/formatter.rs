//! Output formatters for run results
//!
//! Provides table, summary, CSV and JSON renderings.

use crate::models::{ModuleSummary, RunSummary, TestResult, TestState};
use crate::orchestrator::{HelpOption, HelpSummary};

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
    Csv,
    Summary,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            "csv" => Some(OutputFormat::Csv),
            "summary" => Some(OutputFormat::Summary),
            _ => None,
        }
    }

    pub fn is_json(&self) -> bool {
        matches!(self, OutputFormat::Json | OutputFormat::JsonPretty)
    }
}

/// Result formatter
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    pub fn with_color(mut self, colorize: bool) -> Self {
        self.colorize = colorize;
        self
    }

    fn paint(&self, code: &str, text: &str) -> String {
        if self.colorize {
            format!("\x1b[{code}m{text}\x1b[0m")
        } else {
            text.to_string()
        }
    }

    fn json<T: serde::Serialize>(&self, value: &T) -> String {
        if self.format == OutputFormat::JsonPretty {
            serde_json::to_string_pretty(value).unwrap_or_default()
        } else {
            serde_json::to_string(value).unwrap_or_default()
        }
    }

    fn state_label(&self, state: TestState) -> String {
        let label = format!("{} {}", state.symbol(), state);
        match state {
            TestState::Passed => self.paint("32", &label),
            TestState::Skipped | TestState::Cancelled => self.paint("33", &label),
            TestState::Failed | TestState::Error | TestState::Timeout => self.paint("31", &label),
        }
    }

    /// One line for a completed test, printed while the run is in progress
    pub fn format_result(&self, module: &str, result: &TestResult) -> String {
        let details = result.details();
        let mut line = format!(
            "{} {} [{}ms] ({module})",
            self.state_label(details.state),
            details.display_name,
            details.duration().as_millis()
        );
        if let Some(message) = result.error_message() {
            line.push_str(&format!("\n    {message}"));
        }
        line
    }

    pub fn format_module(&self, module: &ModuleSummary) -> String {
        let status = if module.is_success() {
            self.paint("32", "✓")
        } else {
            self.paint("31", "✗")
        };
        let mut line = format!("{status} {module}");
        if let Some(code) = module.exit_code.filter(|&c| c != 0) {
            line.push_str(&format!(" (exit code {code})"));
        }
        line
    }

    pub fn format_run(&self, summary: &RunSummary) -> String {
        match self.format {
            OutputFormat::Table => self.format_run_table(summary),
            OutputFormat::Json | OutputFormat::JsonPretty => self.json(summary),
            OutputFormat::Csv => self.format_run_csv(summary),
            OutputFormat::Summary => self.format_run_brief(summary),
        }
    }

    fn format_run_table(&self, summary: &RunSummary) -> String {
        let mut output = String::new();

        output.push_str("\n═══════════════════════════════════════════════════════════════\n");
        output.push_str(" Test Modules\n");
        output.push_str("═══════════════════════════════════════════════════════════════\n");

        for module in &summary.modules {
            output.push_str(&format!(" {}\n", self.format_module(module)));
            for failure in &module.failures {
                output.push_str(&format!("     {}\n", self.format_result_line(failure)));
            }
            for error in &module.host_errors {
                output.push_str(&format!("     {}\n", self.paint("31", error)));
            }
            if module.handshake_failed {
                output.push_str("     Test host exited before completing the handshake\n");
            }
            for line in &module.output {
                output.push_str(&format!("     | {line}\n"));
            }
        }

        output.push_str(" ───────────────────────────────────────────────────────────\n");

        let failed = summary.failed();
        let fail_str = if failed > 0 {
            self.paint("31", &failed.to_string())
        } else {
            failed.to_string()
        };
        output.push_str(&format!(
            " Total: {} | Pass: {} | Fail: {} | Skip: {}\n",
            summary.total(),
            self.paint("32", &summary.passed().to_string()),
            fail_str,
            summary.skipped()
        ));
        output.push_str(&format!(
            " Modules: {} | Duration: {}ms | Result: {}\n",
            summary.modules.len(),
            summary.duration_ms(),
            self.outcome(summary)
        ));

        output
    }

    fn format_result_line(&self, result: &TestResult) -> String {
        let details = result.details();
        let mut line = format!("{} {}", self.state_label(details.state), details.display_name);
        if let Some(message) = result.error_message() {
            line.push_str(&format!(" - {message}"));
        }
        line
    }

    fn outcome(&self, summary: &RunSummary) -> String {
        if summary.cancelled {
            self.paint("33", "Cancelled")
        } else if summary.is_success() {
            self.paint("32", "Passed")
        } else {
            self.paint("31", "Failed")
        }
    }

    fn format_run_csv(&self, summary: &RunSummary) -> String {
        let mut output = String::new();
        output.push_str("module,target_framework,passed,failed,skipped,exit_code\n");
        for module in &summary.modules {
            output.push_str(&format!(
                "{},{},{},{},{},{}\n",
                csv_field(&module.module_path),
                csv_field(module.target_framework.as_deref().unwrap_or("")),
                module.passed,
                module.failed + module.errors + module.timeouts,
                module.skipped,
                module
                    .exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_default()
            ));
        }
        output
    }

    fn format_run_brief(&self, summary: &RunSummary) -> String {
        format!(
            "{}: {}/{} passed across {} modules in {}ms",
            self.outcome(summary),
            summary.passed(),
            summary.total(),
            summary.modules.len(),
            summary.duration_ms()
        )
    }

    /// Tests found in list-tests mode
    pub fn format_discovered(&self, summary: &RunSummary) -> String {
        if self.format.is_json() {
            let tests: Vec<_> = summary
                .modules
                .iter()
                .map(|m| (m.module_path.as_str(), &m.discovered))
                .collect();
            return self.json(&tests);
        }

        let mut output = String::new();
        for module in &summary.modules {
            output.push_str(&format!("{}\n", module.module_path));
            for test in &module.discovered {
                output.push_str(&format!("    {}\n", test.display_name));
            }
        }
        output.push_str(&format!("\n{} tests discovered\n", summary.discovered()));
        output
    }

    pub fn format_help(&self, help: &HelpSummary) -> String {
        if self.format.is_json() {
            return self.json(help);
        }

        let mut output = String::new();
        if !help.built_in.is_empty() {
            output.push_str("Built-in options:\n");
            for option in &help.built_in {
                output.push_str(&self.format_help_option(option));
            }
        }
        if !help.extension.is_empty() {
            output.push_str("\nExtension options:\n");
            for option in &help.extension {
                output.push_str(&self.format_help_option(option));
            }
        }
        output
    }

    fn format_help_option(&self, option: &HelpOption) -> String {
        let mut text = format!("  --{:30} {}\n", option.name, option.description);
        if !option.missing_from.is_empty() {
            let modules = option.missing_from.join(", ");
            text.push_str(&format!(
                "  {:32} {}\n",
                "",
                self.paint("33", &format!("(not available in: {modules})"))
            ));
        }
        text
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}

fn csv_field(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}
