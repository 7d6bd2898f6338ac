//! Run lifecycle state machine

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum RunState {
    Idle = 0,
    Discovering = 1,
    Dispatching = 2,
    Draining = 3,
    Completed = 4,
}

impl RunState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => RunState::Idle,
            1 => RunState::Discovering,
            2 => RunState::Dispatching,
            3 => RunState::Draining,
            _ => RunState::Completed,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => write!(f, "idle"),
            RunState::Discovering => write!(f, "discovering"),
            RunState::Dispatching => write!(f, "dispatching"),
            RunState::Draining => write!(f, "draining"),
            RunState::Completed => write!(f, "completed"),
        }
    }
}

/// Forward-only run state shared by every task of a run
pub struct RunStateMachine {
    state: AtomicU8,
    cancelled: AtomicBool,
    token: CancellationToken,
}

impl RunStateMachine {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(RunState::Idle as u8),
            cancelled: AtomicBool::new(false),
            token: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move forward to `next`; returns false when already at or past it
    pub fn advance(&self, next: RunState) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < next as u8).then_some(next as u8)
            })
            .is_ok()
    }

    /// Request cancellation; only the first request takes effect
    pub fn cancel(&self) -> bool {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return false;
        }
        info!(state = %self.state(), "cancelling run");
        self.state.store(RunState::Completed as u8, Ordering::Release);
        self.token.cancel();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Default for RunStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
