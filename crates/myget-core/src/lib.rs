pub mod config;
pub mod logging;

pub mod backend;
pub mod block;
pub mod control;
pub mod engine;
pub mod resume_store;
pub mod retry;
pub mod scheduler;
pub mod storage;
pub mod task;
pub mod url_model;
mod worker;

pub use control::CancelToken;
pub use engine::{DownloadOutcome, Downloader, EngineConfig, EngineError};
pub use scheduler::{NullProgress, ProgressSink, ProgressSnapshot};
pub use task::{Proxy, ProxyKind, Task};
