//! Test host supervision
//!
//! Launching host processes and republishing what they report.

mod command;
mod events;
mod process;

pub use command::{ExecutionMode, LaunchOptions, DEFAULT_DRAIN_TIMEOUT, DEFAULT_LAUNCHER};
pub use events::{
    FailureKind, HostFailure, ProcessExit, SupervisorHandler, SupervisorId, SupervisorInfo,
};
pub use process::{SupervisorError, TestProcessSupervisor};
