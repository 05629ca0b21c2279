//! Decoupled logging pipeline for flashing and download sessions.
//!
//! ```text
//! log::info!() / collector.log_*()
//!     |
//! [LogCollector] (crossbeam unbounded, never blocks)
//!     |
//! [persister thread]
//!     |-- logs/full/<ts>_full.log      (every line)
//!     |-- logs/parsed/<ts>_parsed.log  (milestones, target "parsed")
//!     `-- ui_tx.try_send(line)         (best effort)
//! ```
//!
//! Disk writes never depend on the presentation channel: a full or closed UI
//! channel drops the UI copy only.

use chrono::Local;
use crossbeam_channel::{unbounded, Sender};
use log::{LevelFilter, Log, Metadata, Record};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const FULL: &str = "full";
const PARSED: &str = "parsed";

enum LogMessage {
    Line(LogLine),
    /// Flush marker; the sender is signalled once everything before it is on disk
    Flush(std::sync::mpsc::Sender<()>),
}

/// Session routing shared with the persister thread.
#[derive(Clone, Debug, Default)]
struct SessionState {
    path: Option<PathBuf>,
    /// Bumped on every new session so the persister reopens its handles
    generation: u64,
}

/// `./logs` under the current working directory.
pub fn get_global_logs_path() -> Result<PathBuf, String> {
    let cwd = std::env::current_dir()
        .map_err(|e| format!("Failed to get current working directory: {}", e))?;
    Ok(cwd.join("logs"))
}

/// A log line with metadata
#[derive(Clone, Debug)]
pub struct LogLine {
    pub message: String,
    /// "full" or "parsed"
    pub log_type: String,
    /// HH:MM:SS.mmm
    pub timestamp: String,
    /// Optional progress indicator (0-100)
    pub progress: Option<u32>,
}

impl LogLine {
    pub fn new(message: String) -> Self {
        LogLine {
            message,
            log_type: FULL.to_string(),
            timestamp: Local::now().format("%H:%M:%S%.3f").to_string(),
            progress: None,
        }
    }

    pub fn parsed(message: String) -> Self {
        LogLine {
            log_type: PARSED.to_string(),
            ..LogLine::new(message)
        }
    }

    pub fn with_progress(mut self, progress: u32) -> Self {
        self.progress = Some(progress.min(100));
        self
    }

    pub fn is_parsed(&self) -> bool {
        self.log_type == PARSED
    }
}

/// Unified logger that handles disk and UI dispatch
pub struct LogCollector {
    tx: Sender<LogMessage>,
    log_dir: PathBuf,
    ui_tx: tokio::sync::mpsc::Sender<LogLine>,
    session_state: Arc<Mutex<SessionState>>,
    level: LevelFilter,
}

impl LogCollector {
    /// Create the `full/` and `parsed/` directories and start the persister thread.
    pub fn new(
        log_dir: PathBuf,
        ui_tx: tokio::sync::mpsc::Sender<LogLine>,
    ) -> Result<Self, String> {
        let full_log_dir = log_dir.join(FULL);
        let parsed_log_dir = log_dir.join(PARSED);
        std::fs::create_dir_all(&full_log_dir)
            .map_err(|e| format!("Failed to create full log dir: {}", e))?;
        std::fs::create_dir_all(&parsed_log_dir)
            .map_err(|e| format!("Failed to create parsed log dir: {}", e))?;

        let (tx, rx) = unbounded::<LogMessage>();
        let session_state = Arc::new(Mutex::new(SessionState::default()));

        let thread_session = Arc::clone(&session_state);
        let thread_ui_tx = ui_tx.clone();

        // Plain OS thread: log calls may come from outside any tokio runtime
        std::thread::spawn(move || {
            let mut handles: HashMap<&'static str, File> = HashMap::new();
            let mut seen_generation = 0u64;

            while let Ok(msg) = rx.recv() {
                match msg {
                    LogMessage::Line(line) => {
                        let session_path = match thread_session.lock() {
                            Ok(session) => {
                                if session.generation != seen_generation {
                                    handles.clear();
                                    seen_generation = session.generation;
                                }
                                session.path.clone()
                            }
                            Err(_) => None,
                        };

                        if !handles.contains_key(FULL) {
                            let path = match session_path {
                                Some(path) => Some(path),
                                None => get_or_create_latest_log(&full_log_dir).ok(),
                            };
                            if let Some(file) = path.and_then(|p| open_append(&p)) {
                                handles.insert(FULL, file);
                            }
                        }
                        write_line(handles.get_mut(FULL), &line);

                        if line.is_parsed() {
                            if !handles.contains_key(PARSED) {
                                if let Some(file) = get_or_create_latest_log(&parsed_log_dir)
                                    .ok()
                                    .and_then(|p| open_append(&p))
                                {
                                    handles.insert(PARSED, file);
                                }
                            }
                            write_line(handles.get_mut(PARSED), &line);
                        }

                        let _ = thread_ui_tx.try_send(line);
                    }
                    LogMessage::Flush(done) => {
                        for file in handles.values_mut() {
                            let _ = file.flush();
                            let _ = file.sync_data();
                        }
                        let _ = done.send(());
                    }
                }
            }
        });

        Ok(LogCollector {
            tx,
            log_dir,
            ui_tx,
            session_state,
            level: LevelFilter::Info,
        })
    }

    /// Records above this level are ignored by the `log` facade path.
    pub fn with_level(mut self, level: LevelFilter) -> Self {
        self.level = level;
        self
    }

    pub fn level(&self) -> LevelFilter {
        self.level
    }

    /// Route subsequent lines to `logs/full/<filename>`.
    pub fn start_new_session(&self, filename: &str) -> Result<PathBuf, String> {
        let log_path = self.log_dir.join(FULL).join(filename);
        let mut session = self
            .session_state
            .lock()
            .map_err(|e| format!("Failed to lock session state: {}", e))?;
        session.path = Some(log_path.clone());
        session.generation = session.generation.wrapping_add(1);
        Ok(log_path)
    }

    pub fn get_session_log_path(&self) -> Option<PathBuf> {
        self.session_state
            .lock()
            .ok()
            .and_then(|session| session.path.clone())
    }

    /// Send a log line (non-blocking, unbounded).
    pub fn log(&self, line: LogLine) {
        let _ = self.tx.send(LogMessage::Line(line));
    }

    pub fn log_str(&self, message: impl Into<String>) {
        self.log(LogLine::new(message.into()));
    }

    /// Milestone line; also lands in `logs/parsed/`.
    pub fn log_parsed(&self, message: impl Into<String>) {
        self.log(LogLine::parsed(message.into()));
    }

    pub fn log_with_progress(&self, message: impl Into<String>, progress: u32) {
        self.log(LogLine::new(message.into()).with_progress(progress));
    }

    /// Wait until every line sent before this call is on disk.
    pub async fn wait_for_empty(&self) -> Result<(), String> {
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        self.tx
            .send(LogMessage::Flush(tx))
            .map_err(|e| format!("Failed to send flush marker: {}", e))?;

        tokio::task::spawn_blocking(move || rx.recv())
            .await
            .map_err(|e| format!("Flush wait task failed: {}", e))?
            .map_err(|e| format!("Flush signal interrupted: {}", e))
    }

    pub fn ui_sender(&self) -> tokio::sync::mpsc::Sender<LogLine> {
        self.ui_tx.clone()
    }
}

impl Clone for LogCollector {
    fn clone(&self) -> Self {
        LogCollector {
            tx: self.tx.clone(),
            log_dir: self.log_dir.clone(),
            ui_tx: self.ui_tx.clone(),
            session_state: Arc::clone(&self.session_state),
            level: self.level,
        }
    }
}

/// Wires `log::info!()` and friends into the collector.
impl Log for LogCollector {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let message = format!("[{}] {}", record.level(), record.args());
        if record.target() == PARSED {
            self.log_parsed(message);
        } else {
            self.log_str(message);
        }
    }

    fn flush(&self) {}
}

fn open_append(path: &Path) -> Option<File> {
    OpenOptions::new().create(true).append(true).open(path).ok()
}

fn write_line(file: Option<&mut File>, line: &LogLine) {
    if let Some(file) = file {
        let formatted = match line.progress {
            Some(progress) => format!("[{}] [{:>3}%] {}\n", line.timestamp, progress, line.message),
            None => format!("[{}] {}\n", line.timestamp, line.message),
        };
        let _ = file.write_all(formatted.as_bytes());
        let _ = file.flush();
    }
}

/// Most recently modified `.log` in `log_dir`, or a fresh timestamped one.
fn get_or_create_latest_log(log_dir: &Path) -> Result<PathBuf, String> {
    if let Ok(entries) = std::fs::read_dir(log_dir) {
        let latest = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map_or(false, |ext| ext == "log"))
            .max_by_key(|e| e.metadata().ok().and_then(|m| m.modified().ok()));
        if let Some(entry) = latest {
            return Ok(entry.path());
        }
    }

    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let log_type = if log_dir.ends_with(PARSED) { PARSED } else { FULL };
    let log_path = log_dir.join(format!("{}_{}.log", timestamp, log_type));
    File::create(&log_path).map_err(|e| format!("Failed to create log file: {}", e))?;
    Ok(log_path)
}
