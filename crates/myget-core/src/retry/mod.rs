//! Failure classification and retry decisions, shared by the metadata phase
//! and the per-block worker loop.
//!
//! The two phases use independent policies: metadata fetches honor the
//! task's retry budget, block transfers retry without limit.

mod classify;
mod error;
mod policy;

pub use classify::{classify, classify_curl_error, classify_http_status};
pub use error::TransferError;
pub use policy::{ErrorKind, RetryDecision, RetryPolicy};
