use fastboot_flasher::LogCollector;
use fastboot_flasher::LogLine;
use log::{Level, LevelFilter, Log, Record};
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use tokio::sync::mpsc;

fn log_files(dir: &Path) -> Vec<std::path::PathBuf> {
    fs::read_dir(dir)
        .expect("Failed to read log dir")
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map_or(false, |ext| ext == "log"))
        .collect()
}

fn emit(collector: &LogCollector, level: Level, target: &str, message: &str) {
    Log::log(
        collector,
        &Record::builder()
            .level(level)
            .target(target)
            .args(format_args!("{}", message))
            .build(),
    );
}

/// Integration test for the logging system
///
/// Tests that:
/// 1. LogCollector creates the full/ and parsed/ directories
/// 2. `log` records are written to disk, routed by target
/// 3. A new session redirects lines to a dedicated file
#[tokio::test]
async fn test_logging_integration_full_cycle() {
    let temp_dir = TempDir::new().unwrap();
    let (ui_tx, mut ui_rx) = mpsc::channel::<LogLine>(1024);

    let collector = LogCollector::new(temp_dir.path().to_path_buf(), ui_tx)
        .expect("Failed to initialize LogCollector");

    emit(&collector, Level::Info, "fastboot_flasher::download", "Queued boot.img");
    emit(&collector, Level::Info, "parsed", "STAGE: flashing");
    collector.log_with_progress("Flashed boot", 75);
    collector.wait_for_empty().await.expect("flush failed");

    let full = log_files(&temp_dir.path().join("full"));
    assert_eq!(full.len(), 1, "one full log file expected");
    let full_content = fs::read_to_string(&full[0]).unwrap();
    assert!(full_content.contains("[INFO] Queued boot.img"));
    assert!(full_content.contains("STAGE: flashing"));
    assert!(full_content.contains("[ 75%] Flashed boot"));

    let parsed = log_files(&temp_dir.path().join("parsed"));
    assert_eq!(parsed.len(), 1, "one parsed log file expected");
    let parsed_content = fs::read_to_string(&parsed[0]).unwrap();
    assert!(parsed_content.contains("STAGE: flashing"));
    assert!(!parsed_content.contains("Queued boot.img"));

    // UI channel sees every line
    let mut seen = Vec::new();
    while let Ok(line) = ui_rx.try_recv() {
        seen.push(line.message);
    }
    assert_eq!(seen.len(), 3);

    // Session change redirects the full log
    let session_path = collector
        .start_new_session("flash_session.log")
        .expect("Session initialization should succeed");
    collector.log_str("Session-specific line");
    collector.wait_for_empty().await.unwrap();

    let session_content = fs::read_to_string(&session_path).unwrap();
    assert!(session_content.contains("Session-specific line"));
    assert!(!session_content.contains("Queued boot.img"));
    assert_eq!(collector.get_session_log_path(), Some(session_path));
}

#[tokio::test]
async fn test_level_filter_drops_debug_records() {
    let temp_dir = TempDir::new().unwrap();
    let (ui_tx, _ui_rx) = mpsc::channel::<LogLine>(16);
    let collector = LogCollector::new(temp_dir.path().to_path_buf(), ui_tx)
        .unwrap()
        .with_level(LevelFilter::Info);

    emit(&collector, Level::Debug, "fastboot_flasher", "hidden detail");
    emit(&collector, Level::Warn, "fastboot_flasher", "visible warning");
    collector.wait_for_empty().await.unwrap();

    let full = log_files(&temp_dir.path().join("full"));
    let content = fs::read_to_string(&full[0]).unwrap();
    assert!(content.contains("[WARN] visible warning"));
    assert!(!content.contains("hidden detail"));
}

/// Clones share one writer thread and one file
#[tokio::test]
async fn test_log_collector_cloning() {
    let temp_dir = TempDir::new().unwrap();
    let (ui_tx, _ui_rx) = mpsc::channel::<LogLine>(1024);
    let collector1 = LogCollector::new(temp_dir.path().to_path_buf(), ui_tx)
        .expect("Failed to initialize LogCollector");
    let collector2 = collector1.clone();

    collector1.log_str("From collector1");
    collector2.log_str("From collector2");
    collector2.wait_for_empty().await.unwrap();

    let full = log_files(&temp_dir.path().join("full"));
    assert_eq!(full.len(), 1);
    let content = fs::read_to_string(&full[0]).unwrap();
    assert!(content.contains("From collector1"));
    assert!(content.contains("From collector2"));
}
