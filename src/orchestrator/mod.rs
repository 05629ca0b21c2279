//! Flash orchestration: Preparing -> Erasing -> Flashing -> Verifying -> Completed.
//!
//! Stages run strictly in sequence and partitions within a stage one at a
//! time, since they share one transport to the device. Erasing is
//! best-effort; every other stage aborts the run on its first failure.
//!
//! | Stage     | Progress band |
//! |-----------|---------------|
//! | Preparing | 0-20          |
//! | Erasing   | 20-60         |
//! | Flashing  | 60-90         |
//! | Verifying | 90-100        |

pub mod events;
pub mod plan;
pub mod state;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

pub use events::{FlashEvent, FlashObserver};
pub use plan::{FlashPlan, PlanEntry, DEFAULT_ERASE_PARTITIONS, MIN_IMAGE_SIZE};
pub use state::{FlashSession, FlashSnapshot, FlashStage};

use crate::error::{CommandErrorKind, FlashError};
use crate::fastboot::{CommandResult, CommandRunner, DeviceDiscovery, FastbootCommand};
use crate::models::{LogLevel, SessionLogEntry};

const PREPARING_BAND: (u32, u32) = (0, 20);
const ERASING_BAND: (u32, u32) = (20, 60);
const FLASHING_BAND: (u32, u32) = (60, 90);
const VERIFYING_BAND: (u32, u32) = (90, 100);

/// Tunables for a flash run.
#[derive(Debug, Clone)]
pub struct FlashOptions {
    /// Partitions erased (best-effort) before flashing, in order
    pub erase_partitions: Vec<String>,
    /// Images smaller than this are rejected
    pub min_image_size: u64,
    /// Timeout for each device command
    pub command_timeout: Duration,
}

impl Default for FlashOptions {
    fn default() -> Self {
        FlashOptions {
            erase_partitions: DEFAULT_ERASE_PARTITIONS.iter().map(|p| p.to_string()).collect(),
            min_image_size: MIN_IMAGE_SIZE,
            command_timeout: crate::fastboot::DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

/// Whether a failing item stops its stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagePolicy {
    pub continue_on_item_failure: bool,
}

impl StagePolicy {
    pub const BEST_EFFORT: StagePolicy = StagePolicy {
        continue_on_item_failure: true,
    };
    pub const FATAL: StagePolicy = StagePolicy {
        continue_on_item_failure: false,
    };
}

/// One unit of work inside a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
enum StageItem {
    Erase(String),
    Flash { partition: String, image: PathBuf },
}

impl StageItem {
    fn partition(&self) -> &str {
        match self {
            StageItem::Erase(partition) => partition,
            StageItem::Flash { partition, .. } => partition,
        }
    }

    fn start_message(&self) -> String {
        match self {
            StageItem::Erase(partition) => format!("Erasing partition: {}", partition),
            StageItem::Flash { partition, image } => {
                format!("Flashing {} with {}", partition, image.display())
            }
        }
    }

    fn success_message(&self) -> String {
        match self {
            StageItem::Erase(partition) => format!("Erased {}", partition),
            StageItem::Flash { partition, .. } => format!("Flashed {}", partition),
        }
    }
}

/// Clears the single-flight flag when a run ends, however it ends.
struct RunGuard(Arc<AtomicBool>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Drives one device through the flash stages.
#[derive(Clone)]
pub struct FlashOrchestrator {
    /// Shared session, readable at any time through `snapshot`
    session: Arc<RwLock<FlashSession>>,

    runner: Arc<dyn CommandRunner>,

    discovery: DeviceDiscovery,

    observer: Option<Arc<dyn FlashObserver>>,

    options: FlashOptions,

    running: Arc<AtomicBool>,
}

impl FlashOrchestrator {
    pub fn new(runner: Arc<dyn CommandRunner>, options: FlashOptions) -> Self {
        let discovery =
            DeviceDiscovery::new(Arc::clone(&runner)).with_timeout(options.command_timeout);
        FlashOrchestrator {
            session: Arc::new(RwLock::new(FlashSession::default())),
            runner,
            discovery,
            observer: None,
            options,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn FlashObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn options(&self) -> &FlashOptions {
        &self.options
    }

    pub async fn snapshot(&self) -> FlashSnapshot {
        self.session.read().await.snapshot()
    }

    pub async fn current_stage(&self) -> FlashStage {
        self.session.read().await.stage
    }

    pub async fn current_progress(&self) -> u32 {
        self.session.read().await.progress
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run every stage for `plan`.
    ///
    /// Resets the session first. Fatal failures are logged to the session,
    /// move it to Failed and are returned. Returns `AlreadyRunning` if a run
    /// is in progress and `Cancelled` if `cancel_flash` was called meanwhile.
    pub async fn start_flash(&self, plan: &FlashPlan) -> Result<FlashSnapshot, FlashError> {
        if self.running.swap(true, Ordering::SeqCst) {
            log::warn!("[Flash] Rejected start: a run is already in progress");
            return Err(FlashError::AlreadyRunning);
        }
        let _guard = RunGuard(Arc::clone(&self.running));

        let generation = {
            let mut session = self.session.write().await;
            session.reset()
        };
        self.notify(vec![
            FlashEvent::StageChanged(FlashStage::Preparing),
            FlashEvent::Progress(0),
        ]);
        log::info!(target: "parsed", "[Flash] STAGE: {}", FlashStage::Preparing);

        match self.run_stages(generation, plan).await {
            Ok(()) => Ok(self.snapshot().await),
            Err(FlashError::Cancelled) => {
                log::warn!("[Flash] Run abandoned after cancellation");
                Err(FlashError::Cancelled)
            }
            Err(e) => {
                self.fail(generation, &e).await;
                Err(e)
            }
        }
    }

    /// Reset the session. Commands already issued to the device are left to
    /// finish; the run stops at its next step boundary.
    pub async fn cancel_flash(&self) {
        let entry = {
            let mut session = self.session.write().await;
            session.reset();
            session.push_log(LogLevel::Warning, "Flash cancelled by user")
        };
        log::warn!(target: "parsed", "[Flash] Cancelled by user");
        self.notify(vec![
            FlashEvent::StageChanged(FlashStage::Preparing),
            FlashEvent::Progress(0),
            FlashEvent::Log(entry),
        ]);
    }

    async fn run_stages(&self, generation: u64, plan: &FlashPlan) -> Result<(), FlashError> {
        // Preparing
        self.log(generation, LogLevel::Info, "Checking device connection").await?;
        self.progress(generation, PREPARING_BAND.1 / 2).await?;
        let devices = self.discovery.scan_devices().await;
        self.ensure_current(generation).await?;
        if devices.is_empty() {
            return Err(FlashError::DeviceNotFound);
        }
        self.log(
            generation,
            LogLevel::Success,
            format!("Device detected: {}", devices.join(", ")),
        )
        .await?;
        self.progress(generation, PREPARING_BAND.1).await?;

        // Erasing
        self.enter_stage(generation, FlashStage::Erasing).await?;
        let erase_items: Vec<StageItem> = self
            .options
            .erase_partitions
            .iter()
            .map(|p| StageItem::Erase(p.clone()))
            .collect();
        let failed = self
            .run_stage_items(generation, &erase_items, ERASING_BAND, StagePolicy::BEST_EFFORT)
            .await?;
        if failed > 0 {
            log::warn!("[Flash] {} erase(s) failed, continuing", failed);
        }

        // Flashing
        self.enter_stage(generation, FlashStage::Flashing).await?;
        let flash_items: Vec<StageItem> = plan
            .images()
            .map(|(partition, image)| StageItem::Flash {
                partition: partition.to_string(),
                image: image.to_path_buf(),
            })
            .collect();
        if flash_items.is_empty() {
            self.log(generation, LogLevel::Warning, "No images to flash").await?;
        }
        self.run_stage_items(generation, &flash_items, FLASHING_BAND, StagePolicy::FATAL)
            .await?;

        // Verifying
        self.enter_stage(generation, FlashStage::Verifying).await?;
        self.progress(generation, VERIFYING_BAND.0).await?;
        self.log(generation, LogLevel::Info, "Verifying device connection").await?;
        let devices = self.discovery.scan_devices().await;
        self.ensure_current(generation).await?;
        if devices.is_empty() {
            return Err(FlashError::ConnectionLost);
        }
        self.log(generation, LogLevel::Success, "Device still connected").await?;
        self.progress(generation, 95).await?;

        self.log(generation, LogLevel::Info, "Rebooting device").await?;
        let result = self.run(&FastbootCommand::Reboot).await;
        self.ensure_current(generation).await?;
        if !result.success {
            return Err(FlashError::RebootFailed {
                kind: result.error_kind.unwrap_or(CommandErrorKind::NonZeroExit),
                message: result.failure_message(),
            });
        }
        self.log(generation, LogLevel::Success, "Reboot command sent").await?;

        self.enter_stage(generation, FlashStage::Completed).await?;
        self.progress(generation, VERIFYING_BAND.1).await?;
        self.log(generation, LogLevel::Success, "Flash completed successfully").await?;
        Ok(())
    }

    /// Run `items` in order, spreading `band` evenly across them.
    ///
    /// Returns how many items failed; with a fatal policy the first failure
    /// is returned as the error instead.
    async fn run_stage_items(
        &self,
        generation: u64,
        items: &[StageItem],
        band: (u32, u32),
        policy: StagePolicy,
    ) -> Result<usize, FlashError> {
        let (start, end) = band;
        if items.is_empty() {
            self.progress(generation, end).await?;
            return Ok(0);
        }

        let total = items.len() as u32;
        let mut failures = 0;

        for (index, item) in items.iter().enumerate() {
            self.ensure_current(generation).await?;
            self.log(generation, LogLevel::Info, item.start_message()).await?;

            let outcome = self.run_item(item).await;
            self.ensure_current(generation).await?;

            match outcome {
                Ok(()) => {
                    self.log(generation, LogLevel::Success, item.success_message())
                        .await?;
                }
                Err(e) if policy.continue_on_item_failure => {
                    failures += 1;
                    self.log(
                        generation,
                        LogLevel::Warning,
                        format!("{}; continuing", e),
                    )
                    .await?;
                }
                Err(e) => return Err(e),
            }

            let done = index as u32 + 1;
            self.progress(generation, start + (end - start) * done / total)
                .await?;
        }

        Ok(failures)
    }

    async fn run_item(&self, item: &StageItem) -> Result<(), FlashError> {
        let (operation, command) = match item {
            StageItem::Erase(partition) => ("erase", FastbootCommand::Erase(partition.clone())),
            StageItem::Flash { partition, image } => {
                check_image(partition, image, self.options.min_image_size).await?;
                (
                    "flash",
                    FastbootCommand::Flash {
                        partition: partition.clone(),
                        image: image.clone(),
                    },
                )
            }
        };

        let result = self.run(&command).await;
        if result.success {
            Ok(())
        } else {
            Err(FlashError::CommandFailed {
                operation: operation.to_string(),
                partition: item.partition().to_string(),
                kind: result.error_kind.unwrap_or(CommandErrorKind::NonZeroExit),
                message: result.failure_message(),
            })
        }
    }

    async fn run(&self, command: &FastbootCommand) -> CommandResult {
        self.runner
            .run(&command.to_args(), self.options.command_timeout)
            .await
    }

    async fn ensure_current(&self, generation: u64) -> Result<(), FlashError> {
        if self.session.read().await.generation == generation {
            Ok(())
        } else {
            Err(FlashError::Cancelled)
        }
    }

    async fn enter_stage(&self, generation: u64, stage: FlashStage) -> Result<(), FlashError> {
        let entry = {
            let mut session = self.session.write().await;
            if session.generation != generation {
                return Err(FlashError::Cancelled);
            }
            session.transition_to(stage)?;
            session.push_log(LogLevel::Info, format!("Stage: {}", stage))
        };
        log::info!(target: "parsed", "[Flash] STAGE: {}", stage);
        self.notify(vec![FlashEvent::StageChanged(stage), FlashEvent::Log(entry)]);
        Ok(())
    }

    async fn log(
        &self,
        generation: u64,
        level: LogLevel,
        message: impl Into<String>,
    ) -> Result<(), FlashError> {
        let entry = {
            let mut session = self.session.write().await;
            if session.generation != generation {
                return Err(FlashError::Cancelled);
            }
            session.push_log(level, message)
        };
        mirror_to_log(&entry);
        self.notify(vec![FlashEvent::Log(entry)]);
        Ok(())
    }

    async fn progress(&self, generation: u64, percent: u32) -> Result<(), FlashError> {
        let (before, after) = {
            let mut session = self.session.write().await;
            if session.generation != generation {
                return Err(FlashError::Cancelled);
            }
            let before = session.progress;
            (before, session.set_progress(percent))
        };
        if after != before {
            self.notify(vec![FlashEvent::Progress(after)]);
        }
        Ok(())
    }

    /// Log the fatal error and move to Failed, unless the run went stale.
    async fn fail(&self, generation: u64, error: &FlashError) {
        let events = {
            let mut session = self.session.write().await;
            if session.generation != generation {
                return;
            }
            let entry = session.push_log(LogLevel::Error, format!("Flash failed: {}", error));
            if let Err(e) = session.record_error(error.to_string()) {
                log::error!("[Flash] Could not record failure: {}", e);
            }
            mirror_to_log(&entry);
            vec![FlashEvent::Log(entry), FlashEvent::StageChanged(session.stage)]
        };
        log::error!(target: "parsed", "[Flash] FAILED: {}", error);
        self.notify(events);
    }

    fn notify(&self, events: Vec<FlashEvent>) {
        if let Some(ref observer) = self.observer {
            for event in events {
                observer.on_event(event);
            }
        }
    }
}

fn mirror_to_log(entry: &SessionLogEntry) {
    match entry.level {
        LogLevel::Info | LogLevel::Success => log::info!("[Flash] {}", entry.message),
        LogLevel::Warning => log::warn!("[Flash] {}", entry.message),
        LogLevel::Error => log::error!("[Flash] {}", entry.message),
    }
}

/// Reject missing, empty or undersized images before touching the device.
async fn check_image(partition: &str, image: &Path, min_size: u64) -> Result<(), FlashError> {
    let integrity = |reason: String| FlashError::ImageIntegrity {
        partition: partition.to_string(),
        reason,
    };

    let meta = tokio::fs::metadata(image)
        .await
        .map_err(|e| integrity(format!("cannot read {}: {}", image.display(), e)))?;
    if !meta.is_file() {
        return Err(integrity(format!("{} is not a regular file", image.display())));
    }
    if meta.len() == 0 {
        return Err(integrity("image file is empty".to_string()));
    }
    if meta.len() < min_size {
        return Err(integrity(format!(
            "image is {} bytes, below the minimum of {} bytes",
            meta.len(),
            min_size
        )));
    }
    Ok(())
}
