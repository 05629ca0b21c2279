//! Application settings and the image manifest.
//!
//! # Module Structure
//!
//! - `loader`: reads and writes `settings.json` and validates paths
//! - `manifest`: the image manifest supplied by the configuration service,
//!   plus mirror URL helpers
//!
//! `AppSettings` is the single place defaults live; the executor, download
//! queue and orchestrator are all constructed from it.

pub mod loader;
pub mod manifest;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::download::{DownloadOptions, RetryPolicy, MAX_CONCURRENCY, MIN_CONCURRENCY};
use crate::error::ConfigError;
use crate::fastboot::{BinaryLocator, ExecutorOptions};
use crate::orchestrator::{FlashOptions, DEFAULT_ERASE_PARTITIONS, MIN_IMAGE_SIZE};

pub use loader::{
    get_global_settings_path, load_or_default, load_settings_from_file, save_settings_to_file,
};
pub use manifest::{
    build_mirror_download_url, clean_mirror_url, dedupe_mirrors, ImageEntry, ImageManifest,
    ImageSet, ManifestImages,
};

/// Persisted application settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Explicit protocol binary; probed before the bundled locations
    pub fastboot_path: Option<PathBuf>,
    /// Packaged resource root containing `bin/`
    pub resource_dir: Option<PathBuf>,
    pub command_timeout_ms: u64,
    /// Invoke the binary through the platform shell
    pub use_shell: bool,

    pub download_dir: PathBuf,
    pub max_concurrent_downloads: usize,
    pub retry_max: u32,
    pub retry_delay_ms: u64,
    /// Abandon a request attempt after this long without data
    pub idle_timeout_ms: u64,
    pub remove_on_stop: bool,
    pub remove_on_fail: bool,

    pub min_image_size: u64,
    pub erase_partitions: Vec<String>,

    pub scan_cache_ttl_ms: u64,

    pub debug_logging: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        AppSettings {
            fastboot_path: None,
            resource_dir: None,
            command_timeout_ms: 120_000,
            use_shell: true,
            download_dir: default_download_dir(),
            max_concurrent_downloads: 3,
            retry_max: 5,
            retry_delay_ms: 2_000,
            idle_timeout_ms: 60_000,
            remove_on_stop: false,
            remove_on_fail: false,
            min_image_size: MIN_IMAGE_SIZE,
            erase_partitions: DEFAULT_ERASE_PARTITIONS.iter().map(|p| p.to_string()).collect(),
            scan_cache_ttl_ms: 5_000,
            debug_logging: false,
        }
    }
}

/// `~/Downloads/fastboot-flasher`, or `./downloads` without a home directory.
fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join("Downloads")))
        .map(|d| d.join("fastboot-flasher"))
        .unwrap_or_else(|| PathBuf::from("downloads"))
}

impl AppSettings {
    /// Check value ranges. Out-of-range values are rejected, not clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command_timeout_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "command_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&self.max_concurrent_downloads) {
            return Err(ConfigError::ValidationFailed(format!(
                "max_concurrent_downloads must be between {} and {}, got {}",
                MIN_CONCURRENCY, MAX_CONCURRENCY, self.max_concurrent_downloads
            )));
        }
        if self.retry_max == 0 {
            return Err(ConfigError::ValidationFailed(
                "retry_max must be at least 1".to_string(),
            ));
        }
        if self.idle_timeout_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "idle_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.erase_partitions.iter().any(|p| p.trim().is_empty()) {
            return Err(ConfigError::ValidationFailed(
                "erase_partitions must not contain empty names".to_string(),
            ));
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn scan_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.scan_cache_ttl_ms)
    }

    pub fn binary_locator(&self) -> BinaryLocator {
        BinaryLocator::new()
            .with_explicit_path(self.fastboot_path.clone())
            .with_resource_dir(self.resource_dir.clone())
    }

    pub fn executor_options(&self) -> ExecutorOptions {
        ExecutorOptions {
            use_shell: self.use_shell,
            default_timeout: self.command_timeout(),
        }
    }

    pub fn download_options(&self) -> DownloadOptions {
        DownloadOptions {
            retry: RetryPolicy {
                max_attempts: self.retry_max,
                delay: Duration::from_millis(self.retry_delay_ms),
            },
            idle_timeout: Duration::from_millis(self.idle_timeout_ms),
            remove_on_stop: self.remove_on_stop,
            remove_on_fail: self.remove_on_fail,
            ..DownloadOptions::default()
        }
    }

    pub fn flash_options(&self) -> FlashOptions {
        FlashOptions {
            erase_partitions: self.erase_partitions.clone(),
            min_image_size: self.min_image_size,
            command_timeout: self.command_timeout(),
        }
    }
}
