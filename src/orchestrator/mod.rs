//! Run orchestration
//!
//! Discovers modules, dispatches one supervisor per module onto the worker pool,
//! correlates supervisor events with the registry and forwards them to the reporter.

mod discovery;
mod help;
mod registry;
mod state;

pub use discovery::{BuildCommand, ModuleSource, DISCOVERY_PIPE_ENV};
pub use help::{HelpAggregator, HelpOption, HelpSummary};
pub use registry::{ExecutionContext, ExecutionRegistry};
pub use state::{RunState, RunStateMachine};

use crate::executor::{DispatchError, DispatchProducer, DispatchQueue};
use crate::ipc::{ChannelName, IpcError};
use crate::models::{
    exit_code, CommandLineOptionMessages, DiscoveredTestMessages, FileArtifactMessages,
    Handshake, HandshakeProperty, Module, SessionEvent, TestResultMessages,
};
use crate::output::Reporter;
use crate::supervisor::{
    ExecutionMode, HostFailure, LaunchOptions, ProcessExit, SupervisorError, SupervisorHandler,
    SupervisorInfo, TestProcessSupervisor,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Errors that abort a whole run
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Test modules do not support the test host protocol: {}", .0.join(", "))]
    UnsupportedModules(Vec<String>),

    #[error("Failed to create discovery channel: {0}")]
    DiscoveryChannel(#[source] IpcError),

    #[error("Failed to start build {program}: {source}")]
    BuildLaunch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

/// How a completed run ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunOutcome {
    pub exit_code: i32,
    pub supervisors_completed: usize,
    pub cancelled: bool,
    pub build_exit_code: Option<i32>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.exit_code == exit_code::SUCCESS
    }
}

/// Top-level coordinator for one run
pub struct Orchestrator {
    options: Arc<LaunchOptions>,
    mode: ExecutionMode,
    max_parallel: Option<i64>,
    state: Arc<RunStateMachine>,
    registry: Arc<ExecutionRegistry>,
    help: Arc<HelpAggregator>,
    reporter: Arc<dyn Reporter>,
}

impl Orchestrator {
    pub fn new(options: LaunchOptions, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            options: Arc::new(options),
            mode: ExecutionMode::Run,
            max_parallel: None,
            state: Arc::new(RunStateMachine::new()),
            registry: Arc::new(ExecutionRegistry::new()),
            help: Arc::new(HelpAggregator::new()),
            reporter,
        }
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Non-positive or unset means one worker per logical core
    pub fn with_max_parallel(mut self, max_parallel: Option<i64>) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    pub fn state(&self) -> RunState {
        self.state.state()
    }

    /// Request cancellation; repeated requests are no-ops
    pub fn cancel(&self) -> bool {
        self.state.cancel()
    }

    pub fn help_summary(&self) -> HelpSummary {
        self.help.summarize()
    }

    /// Discover modules and run every one of them to completion
    pub async fn run(&self, source: ModuleSource) -> Result<RunOutcome, OrchestratorError> {
        let queue = DispatchQueue::new(self.max_parallel);
        info!(
            mode = self.mode.name(),
            parallelism = queue.degree_of_parallelism(),
            "starting run"
        );
        self.state.advance(RunState::Discovering);

        let handler = Arc::new(RunHandler {
            registry: self.registry.clone(),
            reporter: self.reporter.clone(),
            help: self.help.clone(),
            mode: self.mode,
            errors: AtomicBool::new(false),
            exits: AtomicUsize::new(0),
        });

        // Stops pulling queued work when discovery aborts; user cancellation flows through it too
        let dispatch = self.state.token().child_token();
        let admission = Admission {
            producer: queue.producer(),
            options: self.options.clone(),
            state: self.state.clone(),
        };

        let produce = async {
            let result = self.discover(source, &admission, &dispatch).await;
            admission.producer.complete();
            self.state.advance(RunState::Draining);
            if result.is_err() {
                dispatch.cancel();
            }
            result
        };

        let execute = {
            let handler = handler.clone();
            let cancel = self.state.token().clone();
            let abort = dispatch.clone();
            let mode = self.mode;
            move |supervisor: TestProcessSupervisor| {
                let handler: Arc<dyn SupervisorHandler> = handler.clone();
                let cancel = cancel.clone();
                let abort = abort.clone();
                async move {
                    match supervisor.run(mode, handler, &cancel).await {
                        Ok(code) => Ok(code),
                        Err(e) => {
                            // Discovery must stop producing once nothing will run
                            abort.cancel();
                            Err(OrchestratorError::from(e))
                        }
                    }
                }
            }
        };

        let (discovered, dispatched) =
            tokio::join!(produce, queue.run_to_completion(&dispatch, execute));
        let build_exit_code = discovered?;
        let any_failed = dispatched?;
        self.state.advance(RunState::Completed);

        let build_failed = build_exit_code.is_some_and(|code| code != exit_code::SUCCESS);
        let errors = handler.errors.load(Ordering::Acquire);
        let exit_code = if any_failed || errors || build_failed {
            exit_code::GENERIC_FAILURE
        } else {
            exit_code::SUCCESS
        };

        let outcome = RunOutcome {
            exit_code,
            supervisors_completed: handler.exits.load(Ordering::Acquire),
            cancelled: self.state.is_cancelled(),
            build_exit_code,
        };
        info!(
            exit_code = outcome.exit_code,
            supervisors = outcome.supervisors_completed,
            cancelled = outcome.cancelled,
            "run finished"
        );
        Ok(outcome)
    }

    async fn discover(
        &self,
        source: ModuleSource,
        admission: &Admission,
        interrupt: &CancellationToken,
    ) -> Result<Option<i32>, OrchestratorError> {
        match source {
            ModuleSource::Explicit(modules) => {
                let unsupported: Vec<String> = modules
                    .iter()
                    .filter(|m| m.is_test_project && !m.is_test_host_capable)
                    .map(Module::display_path)
                    .collect();
                if !unsupported.is_empty() {
                    return Err(OrchestratorError::UnsupportedModules(unsupported));
                }
                for module in modules {
                    admission.admit(module)?;
                }
                Ok(None)
            }
            ModuleSource::Build(build) => {
                let code = discovery::stream_modules(
                    &build,
                    ChannelName::random(),
                    interrupt,
                    |module| admission.admit(module),
                )
                .await?;
                if let Some(code) = code.filter(|&code| code != exit_code::SUCCESS) {
                    warn!(code, "build failed");
                }
                Ok(code)
            }
        }
    }
}

/// Turns discovered modules into queued supervisors
struct Admission {
    producer: DispatchProducer<TestProcessSupervisor>,
    options: Arc<LaunchOptions>,
    state: Arc<RunStateMachine>,
}

impl Admission {
    fn admit(&self, module: Module) -> Result<(), OrchestratorError> {
        if !module.is_test_project {
            debug!(module = %module, "skipping non-test project");
            return Ok(());
        }
        if !module.is_test_host_capable {
            return Err(OrchestratorError::UnsupportedModules(vec![
                module.display_path()
            ]));
        }
        if self.state.is_cancelled() {
            debug!(module = %module, "run cancelled, not dispatching");
            return Ok(());
        }
        let supervisor = TestProcessSupervisor::new(module, self.options.clone());
        debug!(supervisor = %supervisor.id(), module = %supervisor.module(), "dispatching");
        self.producer.enqueue(supervisor)?;
        self.state.advance(RunState::Dispatching);
        Ok(())
    }
}

/// Correlates supervisor events with their execution context
struct RunHandler {
    registry: Arc<ExecutionRegistry>,
    reporter: Arc<dyn Reporter>,
    help: Arc<HelpAggregator>,
    mode: ExecutionMode,
    errors: AtomicBool,
    exits: AtomicUsize,
}

impl SupervisorHandler for RunHandler {
    fn on_handshake(&self, info: &SupervisorInfo, handshake: &Handshake) {
        let context = self.registry.on_handshake(info, handshake);
        if handshake.is_test_host() {
            self.reporter
                .assembly_run_started(&context, handshake.get(HandshakeProperty::InstanceId));
        }
    }

    fn on_command_line_options(
        &self,
        info: &SupervisorInfo,
        options: &CommandLineOptionMessages,
    ) {
        if self.mode == ExecutionMode::Help {
            let context = self.registry.context(info);
            self.help.record(&context.module_path, options);
        }
    }

    fn on_discovered_tests(&self, info: &SupervisorInfo, tests: &DiscoveredTestMessages) {
        let context = self.registry.context(info);
        for test in &tests.tests {
            self.reporter.test_discovered(&context, test);
        }
    }

    fn on_test_results(&self, info: &SupervisorInfo, results: &TestResultMessages) {
        let context = self.registry.context(info);
        for result in &results.results {
            self.reporter.test_completed(&context, result);
        }
    }

    fn on_file_artifacts(&self, info: &SupervisorInfo, artifacts: &FileArtifactMessages) {
        let context = self.registry.context(info);
        for artifact in &artifacts.artifacts {
            self.reporter.artifact_added(&context, artifact);
        }
    }

    fn on_session_event(&self, info: &SupervisorInfo, event: &SessionEvent) {
        self.reporter
            .session_event(&self.registry.context(info), event);
    }

    fn on_error(&self, info: &SupervisorInfo, failure: &HostFailure) {
        self.errors.store(true, Ordering::Release);
        self.reporter
            .module_error(&self.registry.context(info), failure);
    }

    fn on_process_exit(&self, info: &SupervisorInfo, exit: &ProcessExit) {
        self.exits.fetch_add(1, Ordering::AcqRel);
        match self.registry.remove(info.id) {
            Some(context) => self.reporter.assembly_run_completed(&context, exit),
            None => self
                .reporter
                .handshake_failure(&ExecutionContext::from_module(&info.module), exit),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::ipc::{connect, ClientStream, Connection, Message};
    use crate::models::{
        CommandLineOption, DiscoveredTest, TestResult, TestResultDetails, TestState,
        PROTOCOL_VERSION,
    };
    use crate::output::SummaryReporter;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_test::assert_ok;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn orchestrator(reporter: Arc<SummaryReporter>, dop: i64) -> Orchestrator {
        Orchestrator::new(LaunchOptions::default(), reporter).with_max_parallel(Some(dop))
    }

    async fn wait_for(path: &Path) {
        for _ in 0..400 {
            if path.exists() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("{} never appeared", path.display());
    }

    async fn connect_when_ready(name: &ChannelName) -> Connection<ClientStream> {
        for _ in 0..200 {
            if let Ok(connection) = connect(name).await {
                return connection;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("channel {name} never became ready");
    }

    /// Host that publishes its channel name to `<name>.pipe`, then waits for `<name>.release`
    fn publishing_host(dir: &Path, name: &str) -> (PathBuf, PathBuf, PathBuf) {
        let pipe = dir.join(format!("{name}.pipe"));
        let release = dir.join(format!("{name}.release"));
        let host = script(
            dir,
            name,
            &format!(
                "while [ \"$1\" != \"--dotnet-test-pipe\" ]; do shift; done\n\
                 echo \"$2\" > {pipe}.tmp && mv {pipe}.tmp {pipe}\n\
                 while [ ! -f {release} ]; do sleep 0.05; done",
                pipe = pipe.display(),
                release = release.display()
            ),
        );
        (host, pipe, release)
    }

    async fn connect_published(pipe: &Path) -> Connection<ClientStream> {
        wait_for(pipe).await;
        let name = std::fs::read_to_string(pipe).unwrap();
        let mut client = connect_when_ready(&ChannelName::new(name.trim())).await;
        client.request(&handshake()).await.unwrap();
        client
    }

    fn handshake() -> Message {
        Message::Handshake(
            Handshake::new().with(HandshakeProperty::SupportedProtocolVersions, PROTOCOL_VERSION),
        )
    }

    #[tokio::test]
    async fn test_every_module_reports_exactly_one_exit() {
        let dir = TempDir::new().unwrap();
        let modules: Vec<_> = (0..5)
            .map(|i| Module::new(script(dir.path(), &format!("host{i}"), "exit 0")))
            .collect();

        for dop in [1, 2, 8] {
            let reporter = Arc::new(SummaryReporter::new());
            let orchestrator = orchestrator(reporter.clone(), dop);
            let outcome = assert_ok!(
                orchestrator
                    .run(ModuleSource::Explicit(modules.clone()))
                    .await
            );

            assert_eq!(outcome.supervisors_completed, 5);
            assert!(outcome.is_success());
            assert_eq!(orchestrator.state(), RunState::Completed);

            let summary = reporter.finish(outcome.exit_code, outcome.cancelled);
            assert_eq!(summary.modules.len(), 5);
            assert!(summary
                .modules
                .iter()
                .all(|m| m.exit_code == Some(0) && m.handshake_failed));
        }
    }

    #[tokio::test]
    async fn test_nonzero_exit_or_error_fails_run() {
        let dir = TempDir::new().unwrap();
        let reporter = Arc::new(SummaryReporter::new());
        let outcome = orchestrator(reporter.clone(), 2)
            .run(ModuleSource::Explicit(vec![
                Module::new(script(dir.path(), "ok", "exit 0")),
                Module::new(script(dir.path(), "bad", "echo boom >&2\nexit 2")),
            ]))
            .await
            .unwrap();
        assert_eq!(outcome.exit_code, exit_code::GENERIC_FAILURE);

        let reporter = Arc::new(SummaryReporter::new());
        let missing = dir.path().join("missing");
        let outcome = orchestrator(reporter.clone(), 2)
            .run(ModuleSource::Explicit(vec![Module::new(&missing)]))
            .await
            .unwrap();
        assert_eq!(outcome.exit_code, exit_code::GENERIC_FAILURE);
        assert_eq!(outcome.supervisors_completed, 1);

        let module = reporter.module(&missing.display().to_string()).unwrap();
        assert_eq!(module.host_errors.len(), 1);
        assert_eq!(module.exit_code, Some(1));
    }

    #[tokio::test]
    async fn test_unsupported_module_aborts_before_dispatch() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("ran");
        let host = script(
            dir.path(),
            "host",
            &format!("touch {}", marker.display()),
        );
        let reporter = Arc::new(SummaryReporter::new());
        let result = orchestrator(reporter, 1)
            .run(ModuleSource::Explicit(vec![
                Module::new(&host),
                Module::new("/legacy/Tests.dll").with_test_host_capable(false),
            ]))
            .await;

        match result {
            Err(OrchestratorError::UnsupportedModules(modules)) => {
                assert_eq!(modules, vec!["/legacy/Tests.dll".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_non_test_projects_are_skipped() {
        let dir = TempDir::new().unwrap();
        let reporter = Arc::new(SummaryReporter::new());
        let outcome = orchestrator(reporter, 1)
            .run(ModuleSource::Explicit(vec![
                Module::new(script(dir.path(), "host", "exit 0")),
                Module::new("/lib/Helpers.dll")
                    .with_test_project(false)
                    .with_test_host_capable(false),
            ]))
            .await
            .unwrap();
        assert_eq!(outcome.supervisors_completed, 1);
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn test_cancelled_run_dispatches_nothing() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("ran");
        let host = script(dir.path(), "host", &format!("touch {}", marker.display()));

        let orchestrator = orchestrator(Arc::new(SummaryReporter::new()), 1);
        assert!(orchestrator.cancel());
        assert!(!orchestrator.cancel());

        let outcome = orchestrator
            .run(ModuleSource::Explicit(vec![Module::new(host)]))
            .await
            .unwrap();
        assert!(outcome.cancelled);
        assert_eq!(outcome.supervisors_completed, 0);
        assert!(outcome.is_success());
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_results_reach_reporter_with_handshake_context() {
        let dir = TempDir::new().unwrap();
        let release = dir.path().join("release");
        let pipe_file = dir.path().join("pipe");
        // The host publishes its channel name, then waits for the test to finish talking
        let host = script(
            dir.path(),
            "host",
            &format!(
                "while [ \"$1\" != \"--dotnet-test-pipe\" ]; do shift; done\n\
                 echo \"$2\" > {pipe}.tmp && mv {pipe}.tmp {pipe}\n\
                 while [ ! -f {release} ]; do sleep 0.05; done",
                pipe = pipe_file.display(),
                release = release.display()
            ),
        );

        let reporter = Arc::new(SummaryReporter::new());
        let orchestrator = Arc::new(orchestrator(reporter.clone(), 1));
        let run = {
            let orchestrator = orchestrator.clone();
            let module = Module::new(&host).with_target_framework("net8.0");
            tokio::spawn(async move {
                orchestrator
                    .run(ModuleSource::Explicit(vec![module]))
                    .await
            })
        };

        wait_for(&pipe_file).await;
        let name = std::fs::read_to_string(&pipe_file).unwrap();
        let mut client = connect_when_ready(&ChannelName::new(name.trim())).await;
        client
            .request(&Message::Handshake(
                Handshake::new()
                    .with(HandshakeProperty::SupportedProtocolVersions, PROTOCOL_VERSION)
                    .with(HandshakeProperty::ModulePath, "/reported/Tests.dll")
                    .with(HandshakeProperty::Architecture, "ARM64")
                    .with(HandshakeProperty::ExecutionId, "exec-7"),
            ))
            .await
            .unwrap();
        client
            .request(&Message::TestResults(TestResultMessages {
                execution_id: Some("exec-7".to_string()),
                results: vec![TestResult::Successful(TestResultDetails::new(
                    "t1",
                    "Adds",
                    TestState::Passed,
                ))],
            }))
            .await
            .unwrap();
        drop(client);
        std::fs::write(&release, b"").unwrap();

        let outcome = run.await.unwrap().unwrap();
        assert!(outcome.is_success());

        let module = reporter.module("/reported/Tests.dll").unwrap();
        assert_eq!(module.passed, 1);
        assert_eq!(module.architecture.as_deref(), Some("arm64"));
        assert_eq!(module.target_framework.as_deref(), Some("net8.0"));
        assert_eq!(module.execution_id.as_deref(), Some("exec-7"));
        assert!(!module.handshake_failed);
    }

    #[tokio::test]
    async fn test_streamed_discovery_interleaves_with_dispatch() {
        let dir = TempDir::new().unwrap();
        let pipe_file = dir.path().join("discovery");
        let build_done = dir.path().join("build-done");
        let build = script(
            dir.path(),
            "build",
            &format!(
                "echo \"${DISCOVERY_PIPE_ENV}\" > {pipe}.tmp && mv {pipe}.tmp {pipe}\n\
                 while [ ! -f {done} ]; do sleep 0.05; done",
                pipe = pipe_file.display(),
                done = build_done.display()
            ),
        );
        let first_ran = dir.path().join("first-ran");
        let first = script(dir.path(), "first", &format!("touch {}", first_ran.display()));
        let second = script(dir.path(), "second", "exit 0");

        let reporter = Arc::new(SummaryReporter::new());
        let orchestrator = Arc::new(orchestrator(reporter.clone(), 1));
        let run = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                orchestrator
                    .run(ModuleSource::Build(BuildCommand::new(build)))
                    .await
            })
        };

        wait_for(&pipe_file).await;
        let name = std::fs::read_to_string(&pipe_file).unwrap();
        let mut build_client = connect_when_ready(&ChannelName::new(name.trim())).await;
        build_client.request(&handshake()).await.unwrap();
        build_client
            .request(&Message::Module(Module::new(&first)))
            .await
            .unwrap();

        // The first module runs while the build is still discovering
        wait_for(&first_ran).await;
        assert_eq!(orchestrator.state(), RunState::Dispatching);

        build_client
            .request(&Message::Module(
                Module::new("/lib/Helpers.dll").with_test_project(false),
            ))
            .await
            .unwrap();
        build_client
            .request(&Message::Module(Module::new(&second)))
            .await
            .unwrap();
        drop(build_client);
        std::fs::write(&build_done, b"").unwrap();

        let outcome = run.await.unwrap().unwrap();
        assert_eq!(outcome.supervisors_completed, 2);
        assert_eq!(outcome.build_exit_code, Some(0));
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn test_streamed_unsupported_module_aborts_run() {
        let dir = TempDir::new().unwrap();
        let pipe_file = dir.path().join("discovery");
        let build = script(
            dir.path(),
            "build",
            &format!(
                "echo \"${DISCOVERY_PIPE_ENV}\" > {pipe}.tmp && mv {pipe}.tmp {pipe}\nsleep 30",
                pipe = pipe_file.display()
            ),
        );

        let orchestrator = Arc::new(orchestrator(Arc::new(SummaryReporter::new()), 1));
        let run = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                orchestrator
                    .run(ModuleSource::Build(BuildCommand::new(build)))
                    .await
            })
        };

        wait_for(&pipe_file).await;
        let name = std::fs::read_to_string(&pipe_file).unwrap();
        let mut build_client = connect_when_ready(&ChannelName::new(name.trim())).await;
        build_client.request(&handshake()).await.unwrap();
        build_client
            .request(&Message::Module(
                Module::new("/legacy/Tests.dll").with_test_host_capable(false),
            ))
            .await
            .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(10), run)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            result,
            Err(OrchestratorError::UnsupportedModules(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_build_fails_run() {
        let reporter = Arc::new(SummaryReporter::new());
        let outcome = orchestrator(reporter, 1)
            .run(ModuleSource::Build(
                BuildCommand::new("/bin/sh").with_args(["-c", "exit 1"]),
            ))
            .await
            .unwrap();
        assert_eq!(outcome.build_exit_code, Some(1));
        assert_eq!(outcome.exit_code, exit_code::GENERIC_FAILURE);
        assert_eq!(outcome.supervisors_completed, 0);
    }

    #[tokio::test]
    async fn test_help_mode_aggregates_options_across_modules() {
        let dir = TempDir::new().unwrap();
        let (first, first_pipe, first_release) = publishing_host(dir.path(), "first");
        let (second, second_pipe, second_release) = publishing_host(dir.path(), "second");

        let orchestrator = Arc::new(
            orchestrator(Arc::new(SummaryReporter::new()), 2).with_mode(ExecutionMode::Help),
        );
        let run = {
            let orchestrator = orchestrator.clone();
            let modules = vec![Module::new(&first), Module::new(&second)];
            tokio::spawn(async move { orchestrator.run(ModuleSource::Explicit(modules)).await })
        };

        let option = |name: &str, is_built_in: bool| CommandLineOption {
            name: name.to_string(),
            description: format!("{name} description"),
            is_hidden: false,
            is_built_in,
        };
        let mut client = connect_published(&first_pipe).await;
        client
            .request(&Message::CommandLineOptions(CommandLineOptionMessages {
                module_path: None,
                options: vec![option("timeout", true), option("coverage", false)],
            }))
            .await
            .unwrap();
        drop(client);
        let mut client = connect_published(&second_pipe).await;
        client
            .request(&Message::CommandLineOptions(CommandLineOptionMessages {
                module_path: None,
                options: vec![option("timeout", true)],
            }))
            .await
            .unwrap();
        drop(client);
        std::fs::write(&first_release, b"").unwrap();
        std::fs::write(&second_release, b"").unwrap();

        let outcome = run.await.unwrap().unwrap();
        assert!(outcome.is_success());

        let help = orchestrator.help_summary();
        assert_eq!(help.modules.len(), 2);
        assert_eq!(help.built_in.len(), 1);
        assert_eq!(help.built_in[0].name, "timeout");
        assert!(help.built_in[0].missing_from.is_empty());
        assert_eq!(help.extension.len(), 1);
        assert_eq!(help.extension[0].name, "coverage");
        assert_eq!(help.extension[0].missing_from, vec![second.display().to_string()]);
    }

    #[tokio::test]
    async fn test_list_tests_reports_discovered_tests() {
        let dir = TempDir::new().unwrap();
        let (host, pipe, release) = publishing_host(dir.path(), "host");

        let reporter = Arc::new(SummaryReporter::new());
        let orchestrator = Arc::new(
            orchestrator(reporter.clone(), 1).with_mode(ExecutionMode::ListTests),
        );
        let run = {
            let orchestrator = orchestrator.clone();
            let module = Module::new(&host);
            tokio::spawn(async move {
                orchestrator
                    .run(ModuleSource::Explicit(vec![module]))
                    .await
            })
        };

        let mut client = connect_published(&pipe).await;
        client
            .request(&Message::DiscoveredTests(DiscoveredTestMessages {
                execution_id: None,
                tests: vec![
                    DiscoveredTest {
                        uid: "t1".to_string(),
                        display_name: "Namespace.Test1".to_string(),
                    },
                    DiscoveredTest {
                        uid: "t2".to_string(),
                        display_name: "Namespace.Test2".to_string(),
                    },
                ],
            }))
            .await
            .unwrap();
        drop(client);
        std::fs::write(&release, b"").unwrap();

        let outcome = run.await.unwrap().unwrap();
        assert!(outcome.is_success());

        let module = reporter.module(&host.display().to_string()).unwrap();
        let names: Vec<_> = module.discovered.iter().map(|t| t.display_name.as_str()).collect();
        assert_eq!(names, vec!["Namespace.Test1", "Namespace.Test2"]);
        assert_eq!(module.total(), 0);
    }

    #[tokio::test]
    async fn test_cancel_stops_streaming_build() {
        let dir = TempDir::new().unwrap();
        let pipe_file = dir.path().join("discovery");
        let build = script(
            dir.path(),
            "build",
            &format!(
                "echo \"${DISCOVERY_PIPE_ENV}\" > {pipe}.tmp && mv {pipe}.tmp {pipe}\nsleep 30",
                pipe = pipe_file.display()
            ),
        );

        let orchestrator = Arc::new(orchestrator(Arc::new(SummaryReporter::new()), 1));
        let run = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                orchestrator
                    .run(ModuleSource::Build(BuildCommand::new(build)))
                    .await
            })
        };

        wait_for(&pipe_file).await;
        assert!(orchestrator.cancel());

        let outcome = tokio::time::timeout(Duration::from_secs(10), run)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(outcome.cancelled);
        assert_eq!(outcome.build_exit_code, None);
        assert_eq!(outcome.supervisors_completed, 0);
        assert_eq!(orchestrator.state(), RunState::Completed);
    }
}
