//! Bounded-concurrency download scheduler.
//!
//! Submissions start immediately while fewer than `limit` transfers are
//! active; the rest wait in FIFO order. Every terminal outcome frees a slot
//! and pulls from the head of the wait list until the list is empty or the
//! limit is reached again. Lowering the limit never preempts running work.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{oneshot, watch};

use crate::download::options::{DownloadEvent, DownloadOptions};
use crate::download::transfer::{Control, TransferJob};
use crate::error::DownloadError;
use crate::models::{DownloadProgress, DownloadState};

pub const DEFAULT_CONCURRENCY: usize = 3;
pub const MIN_CONCURRENCY: usize = 1;
pub const MAX_CONCURRENCY: usize = 10;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "download-{}", self.0)
    }
}

/// Queue occupancy snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStatus {
    pub active: usize,
    pub queued: usize,
    pub max_concurrent: usize,
}

type Outcome = Result<PathBuf, DownloadError>;

/// Handle to a submitted task; resolves to the final local path.
pub struct DownloadTicket {
    pub id: TaskId,
    rx: oneshot::Receiver<Outcome>,
}

impl DownloadTicket {
    pub async fn wait(self) -> Outcome {
        self.rx.await.unwrap_or(Err(DownloadError::QueueClosed))
    }
}

/// Bookkeeping kept for every non-terminal task.
struct TaskEntry {
    control: watch::Sender<Control>,
    progress: Arc<Mutex<DownloadProgress>>,
}

struct PendingTask {
    id: TaskId,
    url: String,
    destination_dir: PathBuf,
    options: DownloadOptions,
    control: watch::Receiver<Control>,
    progress: Arc<Mutex<DownloadProgress>>,
    responder: oneshot::Sender<Outcome>,
}

struct QueueState {
    limit: usize,
    active: usize,
    waiting: VecDeque<PendingTask>,
    tasks: HashMap<TaskId, TaskEntry>,
}

struct QueueInner {
    client: reqwest::Client,
    next_id: AtomicU64,
    state: Mutex<QueueState>,
}

/// Download scheduler. Clones share one queue.
#[derive(Clone)]
pub struct DownloadQueue {
    inner: Arc<QueueInner>,
}

impl Default for DownloadQueue {
    fn default() -> Self {
        DownloadQueue::new(DEFAULT_CONCURRENCY)
    }
}

impl DownloadQueue {
    pub fn new(limit: usize) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                log::warn!("[Download] Falling back to default HTTP client: {}", e);
                reqwest::Client::new()
            });
        DownloadQueue::with_client(client, limit)
    }

    pub fn with_client(client: reqwest::Client, limit: usize) -> Self {
        DownloadQueue {
            inner: Arc::new(QueueInner {
                client,
                next_id: AtomicU64::new(1),
                state: Mutex::new(QueueState {
                    limit: clamp_limit(limit),
                    active: 0,
                    waiting: VecDeque::new(),
                    tasks: HashMap::new(),
                }),
            }),
        }
    }

    /// Queue a transfer of `url` into `destination_dir`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(
        &self,
        url: impl Into<String>,
        destination_dir: impl AsRef<Path>,
        options: DownloadOptions,
    ) -> DownloadTicket {
        let id = TaskId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let url = url.into();
        let (control_tx, control_rx) = watch::channel(Control::Run);
        let (responder, rx) = oneshot::channel();
        let progress = Arc::new(Mutex::new(DownloadProgress::queued()));

        log::info!("[Download] [{}] Queued {}", id, url);

        {
            let mut state = self.lock_state();
            state.tasks.insert(
                id,
                TaskEntry {
                    control: control_tx,
                    progress: progress.clone(),
                },
            );
            state.waiting.push_back(PendingTask {
                id,
                url,
                destination_dir: destination_dir.as_ref().to_path_buf(),
                options,
                control: control_rx,
                progress,
                responder,
            });
        }

        self.pump();
        DownloadTicket { id, rx }
    }

    /// Submit and wait for the outcome.
    pub async fn download(
        &self,
        url: impl Into<String>,
        destination_dir: impl AsRef<Path>,
        options: DownloadOptions,
    ) -> Outcome {
        self.submit(url, destination_dir, options).wait().await
    }

    /// Change the concurrency limit (clamped to 1..=10). Raising it starts
    /// waiting tasks at once; lowering it only takes effect as tasks finish.
    pub fn set_concurrency_limit(&self, limit: usize) {
        let limit = clamp_limit(limit);
        self.lock_state().limit = limit;
        log::info!("[Download] Concurrency limit set to {}", limit);
        self.pump();
    }

    pub fn concurrency_limit(&self) -> usize {
        self.lock_state().limit
    }

    /// Pause a task. Its slot and queue position are kept.
    pub fn pause(&self, id: TaskId) -> bool {
        self.send_control(id, Control::Pause)
    }

    pub fn resume(&self, id: TaskId) -> bool {
        self.send_control(id, Control::Run)
    }

    /// Cancel a task and drop its bookkeeping. A waiting task is removed from
    /// the wait list and its ticket resolves to `Stopped`.
    pub fn stop(&self, id: TaskId) -> bool {
        let (entry, pending) = {
            let mut state = self.lock_state();
            let entry = state.tasks.remove(&id);
            let index = state.waiting.iter().position(|task| task.id == id);
            let pending = index.and_then(|index| state.waiting.remove(index));
            (entry, pending)
        };

        let Some(entry) = entry else {
            return false;
        };

        log::info!("[Download] [{}] Stopped", id);
        let _ = entry.control.send(Control::Stop);

        if let Some(task) = pending {
            task.options.emit(DownloadEvent::StateChanged(DownloadState::Failed));
            let _ = task.responder.send(Err(DownloadError::Stopped));
        }
        true
    }

    pub fn status(&self) -> QueueStatus {
        let state = self.lock_state();
        QueueStatus {
            active: state.active,
            queued: state.waiting.len(),
            max_concurrent: state.limit,
        }
    }

    /// Latest progress of a non-terminal task.
    pub fn progress(&self, id: TaskId) -> Option<DownloadProgress> {
        let state = self.lock_state();
        state.tasks.get(&id).map(|entry| {
            *entry
                .progress
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
        })
    }

    pub fn state(&self, id: TaskId) -> Option<DownloadState> {
        self.progress(id).map(|p| p.state)
    }

    fn send_control(&self, id: TaskId, control: Control) -> bool {
        let state = self.lock_state();
        match state.tasks.get(&id) {
            Some(entry) => {
                log::info!("[Download] [{}] {:?}", id, control);
                let _ = entry.control.send(control);
                true
            }
            None => false,
        }
    }

    /// Start waiting tasks while slots are free.
    fn pump(&self) {
        let started: Vec<PendingTask> = {
            let mut state = self.lock_state();
            let mut started = Vec::new();
            while state.active < state.limit {
                let Some(task) = state.waiting.pop_front() else {
                    break;
                };
                state.active += 1;
                started.push(task);
            }
            started
        };

        for task in started {
            self.start(task);
        }
    }

    fn start(&self, task: PendingTask) {
        let PendingTask {
            id,
            url,
            destination_dir,
            options,
            control,
            progress,
            responder,
        } = task;

        if let Ok(mut p) = progress.lock() {
            p.state = DownloadState::Active;
        }
        options.emit(DownloadEvent::StateChanged(DownloadState::Active));
        log::info!("[Download] [{}] Started {}", id, url);

        let job = TransferJob {
            client: self.inner.client.clone(),
            url,
            destination_dir,
            options: options.clone(),
            control,
            progress: progress.clone(),
        };

        let queue = self.clone();
        tokio::spawn(async move {
            let outcome = job.run().await;

            let final_state = if outcome.is_ok() {
                DownloadState::Completed
            } else {
                DownloadState::Failed
            };
            if let Ok(mut p) = progress.lock() {
                p.state = final_state;
                p.speed = 0.0;
            }
            options.emit(DownloadEvent::StateChanged(final_state));

            match outcome {
                Ok(ref path) => log::info!("[Download] [{}] Finished: {}", id, path.display()),
                Err(ref e) => log::warn!("[Download] [{}] Failed: {}", id, e),
            }

            queue.finish(id);
            let _ = responder.send(outcome);
        });
    }

    fn finish(&self, id: TaskId) {
        {
            let mut state = self.lock_state();
            state.active = state.active.saturating_sub(1);
            state.tasks.remove(&id);
        }
        self.pump();
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn clamp_limit(limit: usize) -> usize {
    limit.clamp(MIN_CONCURRENCY, MAX_CONCURRENCY)
}
