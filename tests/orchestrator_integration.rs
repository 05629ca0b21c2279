//! Integration tests for FlashOrchestrator run control
//!
//! A gated runner holds the first erase until the test releases it, which
//! makes cancellation and single-flight behavior observable mid-run.

use async_trait::async_trait;
use fastboot_flasher::error::{CommandErrorKind, FlashError};
use fastboot_flasher::fastboot::{CommandResult, CommandRunner};
use fastboot_flasher::models::LogLevel;
use fastboot_flasher::orchestrator::{
    FlashEvent, FlashOptions, FlashOrchestrator, FlashPlan, FlashStage,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{mpsc, Notify};

struct GatedRunner {
    gate: Notify,
    gate_reached: Notify,
    reached: AtomicBool,
    calls: Mutex<Vec<String>>,
    devices_output: String,
}

impl GatedRunner {
    fn new() -> Arc<Self> {
        Arc::new(GatedRunner {
            gate: Notify::new(),
            gate_reached: Notify::new(),
            reached: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
            devices_output: "SERIAL123\tfastboot\n".to_string(),
        })
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    async fn wait_until_gated(&self) {
        while !self.reached.load(Ordering::SeqCst) {
            let _ = tokio::time::timeout(Duration::from_millis(50), self.gate_reached.notified()).await;
        }
    }
}

#[async_trait]
impl CommandRunner for GatedRunner {
    async fn run(&self, args: &[String], _timeout: Duration) -> CommandResult {
        self.calls.lock().unwrap().push(args.join(" "));
        match args.first().map(String::as_str) {
            Some("devices") => CommandResult::ok(self.devices_output.clone()),
            Some("erase") if !self.reached.swap(true, Ordering::SeqCst) => {
                self.gate_reached.notify_waiters();
                self.gate.notified().await;
                CommandResult::ok("OKAY")
            }
            Some("reboot") => CommandResult::failure(
                CommandErrorKind::NonZeroExit,
                "FAILED (remote: 'reboot not allowed')",
                Some(1),
                "Command failed with exit code: 1",
            ),
            _ => CommandResult::ok("OKAY"),
        }
    }
}

fn options() -> FlashOptions {
    FlashOptions {
        erase_partitions: vec!["cache".to_string(), "userdata".to_string()],
        min_image_size: 1,
        command_timeout: Duration::from_secs(5),
    }
}

fn plan(dir: &TempDir) -> FlashPlan {
    let boot = dir.path().join("boot.img");
    std::fs::write(&boot, vec![1u8; 64]).unwrap();
    FlashPlan::new().with_image("boot", boot)
}

#[tokio::test]
async fn test_cancel_mid_run_abandons_remaining_steps() {
    let dir = TempDir::new().unwrap();
    let runner = GatedRunner::new();
    let orchestrator = FlashOrchestrator::new(runner.clone(), options());

    let worker = {
        let orchestrator = orchestrator.clone();
        let plan = plan(&dir);
        tokio::spawn(async move { orchestrator.start_flash(&plan).await })
    };

    runner.wait_until_gated().await;
    assert_eq!(orchestrator.current_stage().await, FlashStage::Erasing);
    assert!(orchestrator.is_running());

    orchestrator.cancel_flash().await;
    let snapshot = orchestrator.snapshot().await;
    assert_eq!(snapshot.stage, FlashStage::Preparing);
    assert_eq!(snapshot.progress, 0);
    assert_eq!(snapshot.log.len(), 1);
    assert_eq!(snapshot.log[0].level, LogLevel::Warning);
    assert_eq!(snapshot.log[0].message, "Flash cancelled by user");

    // The in-flight erase still owns the run
    assert!(orchestrator.is_running());
    assert_eq!(
        orchestrator.start_flash(&plan(&dir)).await.unwrap_err(),
        FlashError::AlreadyRunning
    );

    runner.gate.notify_one();
    let outcome = worker.await.unwrap();
    assert_eq!(outcome.unwrap_err(), FlashError::Cancelled);
    assert!(!orchestrator.is_running());

    // No further device commands after the gated erase
    assert_eq!(runner.calls(), vec!["devices", "erase cache"]);
    // The stale run left the reset session alone
    assert_eq!(orchestrator.snapshot().await.log.len(), 1);
}

#[tokio::test]
async fn test_reboot_failure_fails_run_and_emits_events() {
    let dir = TempDir::new().unwrap();
    let runner = GatedRunner::new();
    // Mark the gate as used so every erase returns at once
    runner.reached.store(true, Ordering::SeqCst);

    let (tx, mut rx) = mpsc::unbounded_channel::<FlashEvent>();
    let orchestrator =
        FlashOrchestrator::new(runner.clone(), options()).with_observer(Arc::new(tx));

    let err = orchestrator.start_flash(&plan(&dir)).await.unwrap_err();
    assert!(matches!(
        err,
        FlashError::RebootFailed {
            kind: CommandErrorKind::NonZeroExit,
            ..
        }
    ));

    let snapshot = orchestrator.snapshot().await;
    assert_eq!(snapshot.stage, FlashStage::Failed);
    assert_eq!(snapshot.progress, 95);
    assert!(snapshot.error.is_some());
    let errors: Vec<_> = snapshot.entries_at(LogLevel::Error).collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.starts_with("Flash failed:"));

    drop(orchestrator);
    let mut stages = Vec::new();
    let mut last_progress = 0;
    while let Some(event) = rx.recv().await {
        match event {
            FlashEvent::StageChanged(stage) => stages.push(stage),
            FlashEvent::Progress(p) => {
                assert!(p >= last_progress, "progress went backwards");
                last_progress = p;
            }
            FlashEvent::Log(_) => {}
        }
    }
    assert_eq!(
        stages,
        vec![
            FlashStage::Preparing,
            FlashStage::Erasing,
            FlashStage::Flashing,
            FlashStage::Verifying,
            FlashStage::Failed,
        ]
    );
    assert_eq!(last_progress, 95);
}
