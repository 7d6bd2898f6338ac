//! Protocol payload models
//!
//! Typed views of everything a test host can send over its channel.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Protocol version this build speaks
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Host type reported by the process that actually executes tests
pub const TEST_HOST_TYPE: &str = "TestHost";

/// A wire enum carried a value outside its closed set
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid {field} value {value}")]
pub struct InvalidEnumValue {
    pub field: &'static str,
    pub value: u8,
}

/// Handshake property keys
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum HandshakeProperty {
    Pid = 0,
    Architecture = 1,
    Framework = 2,
    Os = 3,
    SupportedProtocolVersions = 4,
    HostType = 5,
    ModulePath = 6,
    ExecutionId = 7,
    InstanceId = 8,
}

impl HandshakeProperty {
    pub fn from_key(key: u8) -> Option<Self> {
        match key {
            0 => Some(Self::Pid),
            1 => Some(Self::Architecture),
            2 => Some(Self::Framework),
            3 => Some(Self::Os),
            4 => Some(Self::SupportedProtocolVersions),
            5 => Some(Self::HostType),
            6 => Some(Self::ModulePath),
            7 => Some(Self::ExecutionId),
            8 => Some(Self::InstanceId),
            _ => None,
        }
    }

    pub fn key(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Pid => "PID",
            Self::Architecture => "Architecture",
            Self::Framework => "Framework",
            Self::Os => "OS",
            Self::SupportedProtocolVersions => "SupportedProtocolVersions",
            Self::HostType => "HostType",
            Self::ModulePath => "ModulePath",
            Self::ExecutionId => "ExecutionId",
            Self::InstanceId => "InstanceId",
        }
    }
}

/// First message on every connection, in both directions
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    pub properties: BTreeMap<u8, String>,
}

impl Handshake {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, property: HandshakeProperty, value: impl Into<String>) -> Self {
        self.properties.insert(property.key(), value.into());
        self
    }

    pub fn get(&self, property: HandshakeProperty) -> Option<&str> {
        self.properties.get(&property.key()).map(String::as_str)
    }

    /// Versions offered by the peer, `;`-separated on the wire
    pub fn supported_versions(&self) -> impl Iterator<Item = &str> {
        self.get(HandshakeProperty::SupportedProtocolVersions)
            .unwrap_or_default()
            .split(';')
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    /// Pick the version both sides speak, if any
    pub fn negotiate(&self) -> Option<&'static str> {
        self.supported_versions()
            .any(|v| v == PROTOCOL_VERSION)
            .then_some(PROTOCOL_VERSION)
    }

    pub fn execution_id(&self) -> Option<&str> {
        self.get(HandshakeProperty::ExecutionId)
    }

    /// Hosts that omit the host type are treated as test hosts
    pub fn is_test_host(&self) -> bool {
        self.get(HandshakeProperty::HostType)
            .map(|t| t == TEST_HOST_TYPE)
            .unwrap_or(true)
    }

    /// The handshake this process answers with; `version` is empty when negotiation failed
    pub fn reply(version: &str) -> Self {
        Self::new()
            .with(HandshakeProperty::Pid, std::process::id().to_string())
            .with(HandshakeProperty::Architecture, std::env::consts::ARCH)
            .with(
                HandshakeProperty::Framework,
                concat!("testmux ", env!("CARGO_PKG_VERSION")),
            )
            .with(HandshakeProperty::Os, std::env::consts::OS)
            .with(HandshakeProperty::SupportedProtocolVersions, version)
    }
}

impl fmt::Display for Handshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.properties {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            match HandshakeProperty::from_key(*key) {
                Some(p) => write!(f, "{}={value}", p.name())?,
                None => write!(f, "{key}={value}")?,
            }
        }
        Ok(())
    }
}

/// One option a host understands, reported in help mode
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandLineOption {
    pub name: String,
    pub description: String,
    pub is_hidden: bool,
    pub is_built_in: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandLineOptionMessages {
    pub module_path: Option<String>,
    pub options: Vec<CommandLineOption>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredTest {
    pub uid: String,
    pub display_name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredTestMessages {
    pub execution_id: Option<String>,
    pub tests: Vec<DiscoveredTest>,
}

/// Outcome of a single test, closed set
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestState {
    Passed,
    Skipped,
    Failed,
    Error,
    Timeout,
    Cancelled,
}

impl TestState {
    pub fn wire_value(self) -> u8 {
        match self {
            TestState::Passed => 2,
            TestState::Skipped => 3,
            TestState::Failed => 4,
            TestState::Error => 5,
            TestState::Timeout => 6,
            TestState::Cancelled => 7,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            TestState::Passed => "✓",
            TestState::Skipped => "○",
            TestState::Failed => "✗",
            TestState::Error => "!",
            TestState::Timeout => "⧗",
            TestState::Cancelled => "-",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TestState::Passed | TestState::Skipped)
    }
}

impl TryFrom<u8> for TestState {
    type Error = InvalidEnumValue;

    fn try_from(value: u8) -> Result<Self, InvalidEnumValue> {
        match value {
            2 => Ok(TestState::Passed),
            3 => Ok(TestState::Skipped),
            4 => Ok(TestState::Failed),
            5 => Ok(TestState::Error),
            6 => Ok(TestState::Timeout),
            7 => Ok(TestState::Cancelled),
            value => Err(InvalidEnumValue {
                field: "test state",
                value,
            }),
        }
    }
}

impl fmt::Display for TestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestState::Passed => write!(f, "PASS"),
            TestState::Skipped => write!(f, "SKIP"),
            TestState::Failed => write!(f, "FAIL"),
            TestState::Error => write!(f, "ERROR"),
            TestState::Timeout => write!(f, "TIMEOUT"),
            TestState::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Fields shared by successful and failed results
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResultDetails {
    pub uid: String,
    pub display_name: String,
    pub state: TestState,
    /// 100ns ticks
    pub duration_ticks: i64,
    pub reason: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub session_uid: Option<String>,
}

impl TestResultDetails {
    pub fn new(uid: impl Into<String>, display_name: impl Into<String>, state: TestState) -> Self {
        Self {
            uid: uid.into(),
            display_name: display_name.into(),
            state,
            duration_ticks: 0,
            reason: None,
            stdout: None,
            stderr: None,
            session_uid: None,
        }
    }

    pub fn with_duration_ticks(mut self, ticks: i64) -> Self {
        self.duration_ticks = ticks;
        self
    }

    pub fn duration(&self) -> Duration {
        Duration::from_nanos(self.duration_ticks.max(0) as u64 * 100)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TestResult {
    Successful(TestResultDetails),
    Failed {
        #[serde(flatten)]
        details: TestResultDetails,
        error_message: Option<String>,
        error_stack_trace: Option<String>,
    },
}

impl TestResult {
    pub fn details(&self) -> &TestResultDetails {
        match self {
            TestResult::Successful(details) => details,
            TestResult::Failed { details, .. } => details,
        }
    }

    pub fn state(&self) -> TestState {
        self.details().state
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            TestResult::Successful(_) => None,
            TestResult::Failed { error_message, .. } => error_message.as_deref(),
        }
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let details = self.details();
        write!(
            f,
            "{} {} [{}ms]",
            details.state.symbol(),
            details.display_name,
            details.duration().as_millis()
        )?;
        if let Some(msg) = self.error_message() {
            write!(f, " - {msg}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResultMessages {
    pub execution_id: Option<String>,
    pub results: Vec<TestResult>,
}

impl TestResultMessages {
    pub fn successful(&self) -> impl Iterator<Item = &TestResultDetails> {
        self.results.iter().filter_map(|r| match r {
            TestResult::Successful(details) => Some(details),
            TestResult::Failed { .. } => None,
        })
    }

    pub fn failed(&self) -> impl Iterator<Item = &TestResult> {
        self.results
            .iter()
            .filter(|r| matches!(r, TestResult::Failed { .. }))
    }
}

/// A file the host produced (logs, dumps, traces)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileArtifact {
    pub full_path: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub test_uid: Option<String>,
    pub test_display_name: Option<String>,
    pub session_uid: Option<String>,
}

impl FileArtifact {
    pub fn new(full_path: impl Into<String>) -> Self {
        Self {
            full_path: full_path.into(),
            display_name: None,
            description: None,
            test_uid: None,
            test_display_name: None,
            session_uid: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileArtifactMessages {
    pub execution_id: Option<String>,
    pub artifacts: Vec<FileArtifact>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionType {
    Start,
    End,
}

impl SessionType {
    pub fn wire_value(self) -> u8 {
        match self {
            SessionType::Start => 0,
            SessionType::End => 1,
        }
    }
}

impl TryFrom<u8> for SessionType {
    type Error = InvalidEnumValue;

    fn try_from(value: u8) -> Result<Self, InvalidEnumValue> {
        match value {
            0 => Ok(SessionType::Start),
            1 => Ok(SessionType::End),
            value => Err(InvalidEnumValue {
                field: "session type",
                value,
            }),
        }
    }
}

/// Brackets one test session inside a host process
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub session_type: SessionType,
    pub session_uid: Option<String>,
    pub execution_id: Option<String>,
}

/// Error reported by the host itself
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostErrorMessage {
    pub message: String,
}
