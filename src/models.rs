//! Core data types for Fastboot Flasher.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Transport a device reported during enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    /// Device is attached in boot-loader protocol (fastboot) mode
    ProtocolMode,
    /// Any other transport label (adb, recovery, sideload, ...)
    Unknown,
}

/// A device seen by a single enumeration pass.
///
/// Never cached by discovery itself; callers wanting reuse go through
/// `DeviceScanCache` with an explicit TTL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub identifier: String,
    pub transport: TransportKind,
}

impl Device {
    pub fn is_protocol_mode(&self) -> bool {
        self.transport == TransportKind::ProtocolMode
    }
}

/// Severity of a flash session log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Success => "success",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One append-only entry of a flash session log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionLogEntry {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub message: String,
}

impl SessionLogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        SessionLogEntry {
            timestamp: Local::now(),
            level,
            message: message.into(),
        }
    }
}

/// Lifecycle state of a download task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadState {
    Queued,
    Active,
    Paused,
    Completed,
    Failed,
}

impl DownloadState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DownloadState::Completed | DownloadState::Failed)
    }
}

/// Progress tuple reported for a single transfer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DownloadProgress {
    /// 0.0 - 100.0; stays at 0.0 while the total size is unknown
    pub percent: f64,
    /// Instantaneous speed in bytes per second
    pub speed: f64,
    /// Bytes present on disk, including any resumed prefix
    pub downloaded: u64,
    /// Total size if the server announced one
    pub total: Option<u64>,
    pub state: DownloadState,
}

impl DownloadProgress {
    pub fn queued() -> Self {
        DownloadProgress {
            percent: 0.0,
            speed: 0.0,
            downloaded: 0,
            total: None,
            state: DownloadState::Queued,
        }
    }
}
