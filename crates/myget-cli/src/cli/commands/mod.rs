//! CLI command handlers, one per file.

mod get;
mod status;

pub use get::run_get;
pub use status::run_status;

#[cfg(test)]
pub(crate) use get::build_task;
#[cfg(test)]
pub(crate) use status::StatusReport;
