//! Per-submission transfer options and the events a transfer reports.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::models::{DownloadProgress, DownloadState};

/// Headers sent when a submission supplies none
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// How long a request may go without response headers or body data
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Retry schedule for transient network failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before each retry
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            delay: Duration::from_millis(2_000),
        }
    }
}

/// What to do when the destination file already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverwritePolicy {
    /// Keep any existing file
    Skip,
    /// Keep the existing file unless it is smaller than the expected size;
    /// a smaller file, or one whose expected size is unknown, is resumed
    #[default]
    SkipIfNotSmaller,
    /// Discard the existing file and transfer from zero
    Overwrite,
}

/// Something a transfer reports while it runs.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadEvent {
    Progress(DownloadProgress),
    StateChanged(DownloadState),
    /// A transient failure; `attempt` is the ordinal of the retry about to run
    Retry {
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
        reason: String,
    },
    /// The server ignored the range request; the transfer restarted from zero
    ResumeUnsupported,
    /// The destination already satisfied the overwrite policy
    Skipped(PathBuf),
}

pub type DownloadCallback = Arc<dyn Fn(&DownloadEvent) + Send + Sync>;

#[derive(Clone)]
pub struct DownloadOptions {
    /// Extra request headers; defaults are used when empty
    pub headers: Vec<(String, String)>,
    pub retry: RetryPolicy,
    /// A stalled attempt fails as transient after this long without data
    pub idle_timeout: Duration,
    pub overwrite: OverwritePolicy,
    /// Continue from an existing partial file via range requests
    pub resume: bool,
    /// Delete the partial file when the task is stopped
    pub remove_on_stop: bool,
    /// Delete the partial file on terminal failure
    pub remove_on_fail: bool,
    /// Destination file name; defaults to the last URL path segment
    pub file_name: Option<String>,
    /// Expected final size; looked up with HEAD when absent
    pub expected_size: Option<u64>,
    pub on_event: Option<DownloadCallback>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        DownloadOptions {
            headers: Vec::new(),
            retry: RetryPolicy::default(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            overwrite: OverwritePolicy::default(),
            resume: true,
            remove_on_stop: false,
            remove_on_fail: false,
            file_name: None,
            expected_size: None,
            on_event: None,
        }
    }
}

impl fmt::Debug for DownloadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadOptions")
            .field("headers", &self.headers)
            .field("retry", &self.retry)
            .field("idle_timeout", &self.idle_timeout)
            .field("overwrite", &self.overwrite)
            .field("resume", &self.resume)
            .field("remove_on_stop", &self.remove_on_stop)
            .field("remove_on_fail", &self.remove_on_fail)
            .field("file_name", &self.file_name)
            .field("expected_size", &self.expected_size)
            .field("on_event", &self.on_event.is_some())
            .finish()
    }
}

impl DownloadOptions {
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&DownloadEvent) + Send + Sync + 'static,
    {
        self.on_event = Some(Arc::new(callback));
        self
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    pub fn with_expected_size(mut self, size: u64) -> Self {
        self.expected_size = Some(size);
        self
    }

    /// Headers to send, falling back to the defaults.
    pub fn effective_headers(&self) -> Vec<(String, String)> {
        if !self.headers.is_empty() {
            return self.headers.clone();
        }
        vec![
            ("User-Agent".to_string(), DEFAULT_USER_AGENT.to_string()),
            ("Accept".to_string(), "*/*".to_string()),
        ]
    }

    pub(crate) fn emit(&self, event: DownloadEvent) {
        if let Some(ref callback) = self.on_event {
            callback(&event);
        }
    }
}
