//! Data models for testmux
//!
//! Module descriptors, protocol payloads and run summaries.

mod messages;
mod module;
mod summary;

pub use messages::{
    CommandLineOption, CommandLineOptionMessages, DiscoveredTest, DiscoveredTestMessages,
    FileArtifact, FileArtifactMessages, Handshake, HandshakeProperty, HostErrorMessage,
    InvalidEnumValue, SessionEvent, SessionType, TestResult, TestResultDetails,
    TestResultMessages, TestState, PROTOCOL_VERSION,
};
pub use module::{exit_code, Module};
pub use summary::{ModuleSummary, RunSummary};
