//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

/// Runs test modules in parallel out-of-process test hosts
#[derive(Parser, Debug)]
#[command(name = "testmux")]
#[command(author = "hephaex@gmail.com")]
#[command(version)]
#[command(about = "Supervise test hosts and aggregate their results")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (YAML or JSON)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run test modules
    Run(RunArgs),

    /// View a saved run summary
    Results(ResultsArgs),

    /// Show or create configuration
    Config(ConfigArgs),
}

/// Arguments for run command
#[derive(ClapArgs, Debug)]
pub struct RunArgs {
    /// Test module binaries to run
    #[arg(long, num_args = 1.., conflicts_with = "build_command")]
    pub test_modules: Vec<PathBuf>,

    /// Build command that reports test modules while it runs
    #[arg(long, required_unless_present = "test_modules")]
    pub build_command: Option<String>,

    /// Arguments for the build command
    #[arg(long = "build-arg", allow_hyphen_values = true, requires = "build_command")]
    pub build_args: Vec<String>,

    /// Maximum number of test hosts running at once (0 = one per logical core)
    #[arg(long)]
    pub max_parallel_test_modules: Option<i64>,

    /// List tests instead of running them
    #[arg(long, conflicts_with = "help_modules")]
    pub list_tests: bool,

    /// Show options every test module accepts
    #[arg(long)]
    pub help_modules: bool,

    /// Directory for test results
    #[arg(long)]
    pub results_directory: Option<PathBuf>,

    /// Configuration file passed on to test hosts
    #[arg(long)]
    pub config_file: Option<PathBuf>,

    /// Directory for host diagnostic output
    #[arg(long)]
    pub diagnostic_output_directory: Option<PathBuf>,

    /// Launcher for managed modules
    #[arg(long)]
    pub launcher: Option<String>,

    /// Output format (table, json, json-pretty, csv, summary)
    #[arg(short, long)]
    pub format: Option<String>,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Arguments forwarded to every test host
    #[arg(last = true)]
    pub forwarded_args: Vec<String>,
}

/// Arguments for results command
#[derive(ClapArgs, Debug)]
pub struct ResultsArgs {
    /// Summary file written under --results-directory
    pub file: PathBuf,

    /// Output format (table, json, json-pretty, csv, summary)
    #[arg(short, long, default_value = "table")]
    pub format: String,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}

/// Arguments for config command
#[derive(ClapArgs, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,

    /// Write a default configuration file
    Init {
        /// Destination (defaults to ~/.config/testmux/config.yaml)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
