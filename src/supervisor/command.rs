//! Test host command line
//!
//! Builds the argument list a host is launched with.

use crate::ipc::ChannelName;
use crate::models::Module;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;

pub const HELP_OPTION: &str = "--help";
pub const LIST_TESTS_OPTION: &str = "--list-tests";
pub const RESULTS_DIRECTORY_OPTION: &str = "--results-directory";
pub const CONFIG_FILE_OPTION: &str = "--config-file";
pub const DIAGNOSTIC_OUTPUT_DIRECTORY_OPTION: &str = "--diagnostic-output-directory";
pub const SETTINGS_OPTION: &str = "--settings";
pub const SERVER_OPTION: &str = "--server";
pub const SERVER_OPTION_VALUE: &str = "dotnettestcli";
pub const PIPE_OPTION: &str = "--dotnet-test-pipe";

pub const DEFAULT_LAUNCHER: &str = "dotnet";
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// What the host is asked to do
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionMode {
    Run,
    ListTests,
    Help,
}

impl ExecutionMode {
    pub fn name(&self) -> &'static str {
        match self {
            ExecutionMode::Run => "run",
            ExecutionMode::ListTests => "list-tests",
            ExecutionMode::Help => "help",
        }
    }
}

/// Options shared by every supervisor in a run
#[derive(Clone, Debug)]
pub struct LaunchOptions {
    /// Program used to start managed `.dll` modules
    pub launcher: String,
    pub forwarded_args: Vec<String>,
    pub results_directory: Option<PathBuf>,
    pub config_file: Option<PathBuf>,
    pub diagnostic_output_directory: Option<PathBuf>,
    /// Extra environment for every host
    pub environment: BTreeMap<String, String>,
    /// How long connection pumps may run after the host exits
    pub drain_timeout: Duration,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            launcher: DEFAULT_LAUNCHER.to_string(),
            forwarded_args: Vec::new(),
            results_directory: None,
            config_file: None,
            diagnostic_output_directory: None,
            environment: BTreeMap::new(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

impl LaunchOptions {
    pub fn with_launcher(mut self, launcher: impl Into<String>) -> Self {
        self.launcher = launcher.into();
        self
    }

    pub fn with_forwarded_args(mut self, args: Vec<String>) -> Self {
        self.forwarded_args = args;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }
}

/// Fully resolved program, arguments and environment for one host
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub working_directory: Option<PathBuf>,
    pub environment: BTreeMap<String, String>,
}

impl LaunchCommand {
    pub fn build(
        module: &Module,
        options: &LaunchOptions,
        mode: ExecutionMode,
        channel: &ChannelName,
    ) -> Self {
        let mut args: Vec<OsString> = Vec::new();

        let program = if module.is_managed() {
            args.push("exec".into());
            args.push(module.binary_path.clone().into_os_string());
            OsString::from(&options.launcher)
        } else {
            module.binary_path.clone().into_os_string()
        };

        match mode {
            ExecutionMode::Run => {}
            ExecutionMode::ListTests => args.push(LIST_TESTS_OPTION.into()),
            ExecutionMode::Help => args.push(HELP_OPTION.into()),
        }

        let paths = [
            (RESULTS_DIRECTORY_OPTION, &options.results_directory),
            (CONFIG_FILE_OPTION, &options.config_file),
            (
                DIAGNOSTIC_OUTPUT_DIRECTORY_OPTION,
                &options.diagnostic_output_directory,
            ),
            (SETTINGS_OPTION, &module.run_settings_path),
        ];
        for (option, path) in paths {
            if let Some(path) = path {
                args.push(option.into());
                args.push(path.clone().into_os_string());
            }
        }

        args.extend(options.forwarded_args.iter().map(OsString::from));

        args.push(SERVER_OPTION.into());
        args.push(SERVER_OPTION_VALUE.into());
        args.push(PIPE_OPTION.into());
        args.push(channel.as_str().into());
        args.extend(module.launch_arguments.iter().map(OsString::from));

        let mut environment = options.environment.clone();
        environment.extend(module.environment.clone());

        Self {
            program,
            args,
            working_directory: module.working_directory.clone(),
            environment,
        }
    }

    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).envs(&self.environment);
        if let Some(dir) = &self.working_directory {
            command.current_dir(dir);
        }
        command
    }
}

impl std::fmt::Display for LaunchCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}
