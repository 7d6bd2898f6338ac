//! Output formatting and reporting

pub mod formatter;
pub mod reporter;
pub mod storage;

pub use formatter::{OutputFormat, ResultFormatter};
pub use reporter::{Reporter, SummaryReporter};
pub use storage::{load_summary, save_summary};
