//! Supervisor event surface
//!
//! Every protocol message a host sends is republished as one typed handler call.

use crate::models::{
    CommandLineOptionMessages, DiscoveredTestMessages, FileArtifactMessages, Handshake, Module,
    SessionEvent, TestResultMessages,
};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_SUPERVISOR_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one supervisor, unique for the process lifetime
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SupervisorId(u64);

impl SupervisorId {
    pub fn next() -> Self {
        Self(NEXT_SUPERVISOR_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SupervisorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Passed to every handler call so receivers can correlate events
#[derive(Clone, Debug)]
pub struct SupervisorInfo {
    pub id: SupervisorId,
    pub module: Arc<Module>,
}

/// Terminal observation of the host process
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessExit {
    pub exit_code: i32,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub handshake_received: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// The host could not be started
    Launch,
    /// The host violated the protocol
    Protocol,
    /// The host reported an error itself
    Host,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Launch => write!(f, "launch"),
            FailureKind::Protocol => write!(f, "protocol"),
            FailureKind::Host => write!(f, "host"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl HostFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for HostFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.kind, self.message)
    }
}

/// Receiver of supervisor events
///
/// Calls for one supervisor arrive in send order on that supervisor's pump task;
/// `on_process_exit` is always the last call for a supervisor.
pub trait SupervisorHandler: Send + Sync {
    fn on_handshake(&self, info: &SupervisorInfo, handshake: &Handshake);

    fn on_command_line_options(
        &self,
        _info: &SupervisorInfo,
        _options: &CommandLineOptionMessages,
    ) {
    }

    fn on_discovered_tests(&self, _info: &SupervisorInfo, _tests: &DiscoveredTestMessages) {}

    fn on_test_results(&self, _info: &SupervisorInfo, _results: &TestResultMessages) {}

    fn on_file_artifacts(&self, _info: &SupervisorInfo, _artifacts: &FileArtifactMessages) {}

    fn on_session_event(&self, _info: &SupervisorInfo, _event: &SessionEvent) {}

    fn on_error(&self, info: &SupervisorInfo, failure: &HostFailure);

    fn on_process_exit(&self, info: &SupervisorInfo, exit: &ProcessExit);
}
