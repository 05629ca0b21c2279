//! Unified error type hierarchy for Fastboot Flasher
//!
//! Provides structured error handling with CommandErrorKind, DiscoveryError,
//! DownloadError, FlashError, ExtractError, ConfigError, and AppError.

use std::io;
use std::path::PathBuf;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::orchestrator::FlashStage;

/// Failure classification for a single protocol-binary invocation.
///
/// Carried as a value inside `CommandResult`; the executor never throws.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandErrorKind {
    #[error("command timed out")]
    Timeout,

    #[error("failed to spawn process")]
    ProcessSpawnError,

    #[error("command exited with a non-zero status")]
    NonZeroExit,
}

/// Device enumeration errors (only surfaced by the detailed scan).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("Device enumeration failed ({kind}): {message}")]
    CommandFailed {
        kind: CommandErrorKind,
        message: String,
    },
}

/// File transfer errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DownloadError {
    #[error("Network error after {attempts} attempt(s): {reason}")]
    Network { attempts: u32, reason: String },

    #[error("Server responded with HTTP {status} for {url}")]
    Http { status: u16, url: String },

    #[error("I/O error during download: {0}")]
    Io(String),

    #[error("Invalid download URL: {0}")]
    InvalidUrl(String),

    #[error("Download stopped")]
    Stopped,

    #[error("Download queue dropped the task before completion")]
    QueueClosed,
}

impl From<io::Error> for DownloadError {
    fn from(e: io::Error) -> Self {
        DownloadError::Io(e.to_string())
    }
}

/// Flash run errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlashError {
    #[error("No device found in fastboot mode")]
    DeviceNotFound,

    #[error("Image for partition '{partition}' failed integrity check: {reason}")]
    ImageIntegrity { partition: String, reason: String },

    #[error("{operation} failed for partition '{partition}' ({kind}): {message}")]
    CommandFailed {
        operation: String,
        partition: String,
        kind: CommandErrorKind,
        message: String,
    },

    #[error("Device connection lost, flash result could not be verified")]
    ConnectionLost,

    #[error("Reboot failed ({kind}): {message}")]
    RebootFailed {
        kind: CommandErrorKind,
        message: String,
    },

    #[error("Invalid stage transition: {from} -> {to}")]
    InvalidTransition { from: FlashStage, to: FlashStage },

    #[error("A flash run is already in progress")]
    AlreadyRunning,

    #[error("Flash run was cancelled")]
    Cancelled,
}

/// Archive extraction errors.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Unsupported archive format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("Extraction of {} failed: {reason}", .archive.display())]
    Failed { archive: PathBuf, reason: String },

    #[error("Expected file '{file}' not found after extracting {}", .archive.display())]
    MissingExtractedFile { archive: PathBuf, file: String },

    #[error("IO error during extraction: {0}")]
    IoError(#[from] io::Error),
}

/// Configuration file parsing and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid JSON in config: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("IO error during config operations: {0}")]
    IoError(#[from] io::Error),
}

/// Global error type for the command-line front end.
///
/// Provides unified error categorization and user-facing messages.
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Flash(#[from] FlashError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl AppError {
    /// Get a user-facing error message suitable for terminal display
    pub fn user_message(&self) -> String {
        match self {
            AppError::Flash(FlashError::DeviceNotFound) => {
                "No device detected. Make sure the device is connected and booted into fastboot mode."
                    .to_string()
            }
            AppError::Flash(e) => format!("Flashing failed: {}", e),
            AppError::Download(e) => format!("Image download failed: {}", e),
            AppError::Extract(e) => format!("Image extraction failed: {}", e),
            AppError::Config(e) => format!("Settings error: {}", e),
            AppError::InvalidInput(msg) => format!("Invalid input: {}", msg),
        }
    }
}

/// Top-level result type for the flasher library.
pub type Result<T> = std::result::Result<T, AppError>;
