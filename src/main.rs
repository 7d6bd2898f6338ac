//! testmux - parallel test host supervisor
//!
//! Launches one out-of-process test host per test module, talks to each over a
//! local channel and merges everything they report into one result stream.
//!
//! ## Usage
//!
//! ```bash
//! # Run prebuilt modules, at most 4 at a time
//! testmux run --test-modules out/A.Tests.dll out/B.Tests.dll --max-parallel-test-modules 4
//!
//! # Let a build report modules as they are built
//! testmux run --build-command ./build.sh -- --filter "Category!=Slow"
//!
//! # Show the options every module accepts
//! testmux run --test-modules out/A.Tests.dll --help-modules
//!
//! # Re-render a saved run
//! testmux results results/testmux_20240101_120000_42.json --format summary
//!
//! # Inspect configuration
//! testmux config show
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

mod cli;
mod config;
mod executor;
mod ipc;
mod models;
mod orchestrator;
mod output;
mod supervisor;
mod utils;

use cli::{Args, Command, ConfigAction, ConfigArgs, ResultsArgs, RunArgs};
use config::{AppConfig, EnvConfig};
use models::{exit_code, Module};
use orchestrator::{BuildCommand, ModuleSource, Orchestrator};
use output::{load_summary, save_summary, OutputFormat, ResultFormatter, SummaryReporter};
use supervisor::ExecutionMode;
use utils::LogLevel;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let env = EnvConfig::load();

    let level = match env.log_level {
        _ if args.verbose => LogLevel::Info,
        Some(level) => level,
        None if env.verbose == Some(true) => LogLevel::Info,
        None => LogLevel::Warn,
    };
    if let Err(e) = utils::init_logging(level, env.trace_file.as_deref()) {
        eprintln!("Error: {e:#}");
        return ExitCode::FAILURE;
    }

    let result = match args.command {
        Command::Run(run_args) => run_modules(run_args, args.config.as_deref(), &env).await,
        Command::Results(results_args) => show_results(results_args).map(|_| exit_code::SUCCESS),
        Command::Config(config_args) => manage_config(config_args, args.config.as_deref(), &env)
            .map(|_| exit_code::SUCCESS),
    };

    match result {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run_modules(args: RunArgs, config_path: Option<&Path>, env: &EnvConfig) -> Result<i32> {
    let mut config = AppConfig::resolve(config_path, env)?;
    if let Some(max_parallel) = args.max_parallel_test_modules {
        config.max_parallel_test_modules = Some(max_parallel);
    }
    if let Some(launcher) = args.launcher {
        config.host_launcher = launcher;
    }
    if let Some(format) = args.format {
        config.output_format = format;
    }
    if args.results_directory.is_some() {
        config.results_directory = args.results_directory;
    }
    if args.diagnostic_output_directory.is_some() {
        config.diagnostic_output_directory = args.diagnostic_output_directory;
    }
    config.validate()?;

    let mode = if args.help_modules {
        ExecutionMode::Help
    } else if args.list_tests {
        ExecutionMode::ListTests
    } else {
        ExecutionMode::Run
    };

    let format = config.output_format();
    let colorize = !args.no_color && std::io::stdout().is_terminal();
    let formatter = ResultFormatter::new(format).with_color(colorize);

    let mut reporter = SummaryReporter::new();
    if mode == ExecutionMode::Run && format == OutputFormat::Table {
        reporter = reporter.with_live_output(ResultFormatter::new(format).with_color(colorize));
    }
    let reporter = Arc::new(reporter);

    let mut options = config.launch_options().with_forwarded_args(args.forwarded_args);
    options.config_file = args.config_file;

    let source = match args.build_command {
        Some(program) => ModuleSource::Build(BuildCommand::new(program).with_args(args.build_args)),
        None => ModuleSource::Explicit(args.test_modules.into_iter().map(Module::new).collect()),
    };

    let orchestrator = Arc::new(
        Orchestrator::new(options, reporter.clone())
            .with_mode(mode)
            .with_max_parallel(config.max_parallel_test_modules),
    );

    let interrupts = tokio::spawn(forward_interrupts(orchestrator.clone()));
    let outcome = orchestrator.run(source).await;
    interrupts.abort();
    let outcome = outcome.context("Test run aborted")?;

    let summary = reporter.finish(outcome.exit_code, outcome.cancelled);
    match mode {
        ExecutionMode::Help => println!("{}", formatter.format_help(&orchestrator.help_summary())),
        ExecutionMode::ListTests => println!("{}", formatter.format_discovered(&summary)),
        ExecutionMode::Run => println!("{}", formatter.format_run(&summary)),
    }
    if let Some(code) = outcome.build_exit_code.filter(|&code| code != 0) {
        eprintln!("Build failed with exit code {code}");
    }

    if mode == ExecutionMode::Run {
        if let Some(dir) = &config.results_directory {
            save_summary(dir, &summary)?;
        }
    }

    Ok(outcome.exit_code)
}

/// Every Ctrl-C requests cancellation; only the first one has an effect
async fn forward_interrupts(orchestrator: Arc<Orchestrator>) {
    while tokio::signal::ctrl_c().await.is_ok() {
        if orchestrator.cancel() {
            eprintln!("Cancelling; waiting for running test hosts to exit");
        }
    }
}

fn show_results(args: ResultsArgs) -> Result<()> {
    let Some(format) = OutputFormat::from_str(&args.format) else {
        bail!("Unknown output format: {}", args.format);
    };
    let summary = load_summary(&args.file)?;
    let colorize = !args.no_color && std::io::stdout().is_terminal();
    let formatter = ResultFormatter::new(format).with_color(colorize);
    println!("{}", formatter.format_run(&summary));
    Ok(())
}

fn manage_config(args: ConfigArgs, config_path: Option<&Path>, env: &EnvConfig) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let config = AppConfig::resolve(config_path, env)?;
            match AppConfig::find(config_path, env) {
                Some(path) => println!("# Loaded from {}", path.display()),
                None => println!("# No config file found, using defaults"),
            }
            let yaml = serde_yaml::to_string(&config).context("Failed to serialize config")?;
            println!("{yaml}");
            if env.has_any() {
                env.print_summary();
            }
        }
        ConfigAction::Init { output, force } => {
            let path = output.unwrap_or_else(config::default_config_path);
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            AppConfig::default().save(&path)?;
            info!("Wrote default configuration to {}", path.display());
            println!("Wrote default configuration to {}", path.display());
        }
    }
    Ok(())
}
