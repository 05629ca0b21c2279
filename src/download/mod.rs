//! Image acquisition: a bounded-concurrency queue of resumable HTTP transfers.

pub mod options;
pub mod queue;
pub mod transfer;

pub use options::{
    DownloadCallback, DownloadEvent, DownloadOptions, OverwritePolicy, RetryPolicy,
    DEFAULT_IDLE_TIMEOUT, DEFAULT_USER_AGENT,
};
pub use queue::{
    DownloadQueue, DownloadTicket, QueueStatus, TaskId, DEFAULT_CONCURRENCY, MAX_CONCURRENCY,
    MIN_CONCURRENCY,
};
pub use transfer::file_name_from_url;
