//! Fastboot Flasher
//!
//! Provisions a device's partitions over the fastboot protocol: discovers
//! devices in protocol mode, acquires images over HTTP with resumable,
//! concurrency-limited downloads, and drives a staged erase/flash/verify run
//! with weighted progress.
//!
//! The crate is organized into functional modules:
//! - **error**: Unified error type hierarchy
//! - **models**: Core data structures shared across modules
//! - **fastboot**: Protocol binary invocation and device discovery
//! - **download**: Resumable HTTP transfers behind a bounded queue
//! - **extract**: Archive extraction for compressed images
//! - **orchestrator**: The staged flash state machine
//! - **config**: Settings persistence and the image manifest
//! - **log_collector**: Decoupled disk and UI log dispatch

pub mod error;
pub mod models;

// Protocol binary and device enumeration
pub mod fastboot;

// Image acquisition
pub mod download;
pub mod extract;

// Flash state machine
pub mod orchestrator;

pub mod config;

// Robust, decoupled logging system
pub mod log_collector;

// Re-export the log crate for macro usage
pub use log;

pub use log_collector::{LogCollector, LogLine};

// ============================================================================
// PUBLIC RE-EXPORTS FOR CONVENIENCE
// ============================================================================

pub use error::{
    AppError, CommandErrorKind, ConfigError, DiscoveryError, DownloadError, ExtractError,
    FlashError, Result,
};

pub use models::{
    Device, DownloadProgress, DownloadState, LogLevel, SessionLogEntry, TransportKind,
};

pub use fastboot::{
    CommandExecutor, CommandResult, CommandRunner, DeviceDiscovery, ExecutorOptions,
};
pub use download::{DownloadOptions, DownloadQueue, TaskId};
pub use extract::{extract_image, is_compressed_file, ArchiveExtractor};
pub use orchestrator::{FlashEvent, FlashOrchestrator, FlashPlan, FlashSnapshot, FlashStage};
pub use config::{AppSettings, ImageManifest};

/// Crate version, as reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
