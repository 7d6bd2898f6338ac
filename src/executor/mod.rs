//! Test execution engine
//!
//! Dispatches supervisors onto a bounded pool of workers.

mod queue;

pub use queue::{DispatchError, DispatchProducer, DispatchQueue};
