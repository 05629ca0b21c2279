use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

use fastboot_flasher::config::{self, AppSettings, ImageEntry, ImageManifest};
use fastboot_flasher::download::{DownloadEvent, DownloadQueue, TaskId};
use fastboot_flasher::extract::{extract_image, is_compressed_file, AutoExtractor};
use fastboot_flasher::fastboot::{CommandExecutor, CommandRunner, DeviceDiscovery, DeviceScanCache};
use fastboot_flasher::log_collector::get_global_logs_path;
use fastboot_flasher::orchestrator::{FlashEvent, FlashOrchestrator, FlashPlan, DEFAULT_ERASE_PARTITIONS};
use fastboot_flasher::{AppError, LogCollector, LogLine, VERSION};

#[derive(Parser, Debug)]
#[command(name = "fastboot_flasher", version = VERSION, about = "Provision device partitions over fastboot")]
struct Cli {
    /// Settings file (defaults to ~/.config/fastboot-flasher/settings.json)
    #[arg(long, env = "FASTBOOT_FLASHER_SETTINGS", global = true)]
    settings: Option<PathBuf>,

    /// Protocol binary, overriding the settings file
    #[arg(long, env = "FASTBOOT_PATH", global = true)]
    fastboot: Option<PathBuf>,

    /// Print every log line, not only status lines
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List devices in protocol mode
    Devices {
        /// Keep polling until interrupted
        #[arg(long)]
        watch: bool,
    },
    /// Read a bootloader variable
    Getvar { name: String },
    /// Download one or more images through the queue
    Download {
        #[arg(required = true)]
        urls: Vec<String>,
        #[arg(long)]
        dest: Option<PathBuf>,
    },
    /// Erase and flash local images, then verify and reboot
    Flash {
        /// partition=path, repeatable
        #[arg(long = "image", value_parser = parse_image_arg, required = true)]
        images: Vec<(String, PathBuf)>,
    },
    /// Download, extract and flash a manifest variant
    Provision {
        #[arg(long)]
        manifest: PathBuf,
        #[arg(long)]
        variant: String,
        #[arg(long)]
        dest: Option<PathBuf>,
    },
    /// Print the effective settings
    Settings,
}

fn parse_image_arg(raw: &str) -> Result<(String, PathBuf), String> {
    match raw.split_once('=') {
        Some((partition, path)) if !partition.trim().is_empty() && !path.trim().is_empty() => {
            Ok((partition.trim().to_string(), PathBuf::from(path.trim())))
        }
        _ => Err(format!("expected partition=path, got '{}'", raw)),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let settings = match load_settings(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{}", describe(&e));
            std::process::exit(2);
        }
    };

    let collector = match init_logging(&settings, cli.verbose) {
        Ok(collector) => Some(collector),
        Err(e) => {
            eprintln!("[Main] WARNING: logging unavailable: {}", e);
            None
        }
    };
    log::info!("fastboot_flasher {} starting", VERSION);

    let executor =
        CommandExecutor::from_locator(&settings.binary_locator(), settings.executor_options());
    log::debug!("[Main] Using protocol binary {}", executor.binary_path().display());

    let outcome = run(cli.command, &settings, &executor).await;

    executor.cleanup();
    if let Some(collector) = collector {
        let _ = collector.wait_for_empty().await;
    }

    if let Err(e) = outcome {
        eprintln!("{}", describe(&e));
        std::process::exit(1);
    }
}

fn describe(e: &anyhow::Error) -> String {
    match e.downcast_ref::<AppError>() {
        Some(app) => app.user_message(),
        None => format!("Error: {:#}", e),
    }
}

fn load_settings(cli: &Cli) -> anyhow::Result<AppSettings> {
    let path = match &cli.settings {
        Some(path) => path.clone(),
        None => config::get_global_settings_path().map_err(AppError::from)?,
    };
    let mut settings = config::load_or_default(&path).map_err(AppError::from)?;
    if cli.fastboot.is_some() {
        settings.fastboot_path = cli.fastboot.clone();
    }
    Ok(settings)
}

/// Route `log` macros through the collector and echo status lines to stderr.
fn init_logging(settings: &AppSettings, verbose: bool) -> Result<LogCollector, String> {
    let log_dir = get_global_logs_path()?;
    let (ui_tx, mut ui_rx) = mpsc::channel::<LogLine>(1024);

    let level = if verbose || settings.debug_logging {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    let collector = LogCollector::new(log_dir, ui_tx)?.with_level(level);
    let session = format!("flash_{}.log", chrono::Local::now().format("%Y%m%d_%H%M%S"));
    collector.start_new_session(&session)?;

    log::set_boxed_logger(Box::new(collector.clone()))
        .map(|()| log::set_max_level(level))
        .map_err(|e| format!("Failed to set global logger: {}", e))?;

    tokio::spawn(async move {
        while let Some(line) = ui_rx.recv().await {
            if verbose || line.is_parsed() {
                eprintln!("{} {}", line.timestamp, line.message);
            }
        }
    });

    Ok(collector)
}

async fn run(
    command: Commands,
    settings: &AppSettings,
    executor: &CommandExecutor,
) -> anyhow::Result<()> {
    let runner: Arc<dyn CommandRunner> = Arc::new(executor.clone());

    match command {
        Commands::Devices { watch } => list_devices(runner, settings, watch).await,
        Commands::Getvar { name } => {
            let discovery = DeviceDiscovery::new(runner);
            let value = discovery
                .query_variable(&name)
                .await
                .ok_or_else(|| anyhow!("variable '{}' not reported by the device", name))?;
            println!("{}: {}", name, value);
            Ok(())
        }
        Commands::Download { urls, dest } => {
            let dest = dest.unwrap_or_else(|| settings.download_dir.clone());
            let queue = DownloadQueue::new(settings.max_concurrent_downloads);
            let tickets: Vec<_> = urls
                .iter()
                .map(|url| queue.submit(url.as_str(), &dest, download_options(settings, url)))
                .collect();
            let ids: Vec<TaskId> = tickets.iter().map(|t| t.id).collect();
            let reporter = tokio::spawn(report_queue(queue.clone(), ids));

            let results = futures::future::join_all(tickets.into_iter().map(|t| t.wait())).await;
            reporter.abort();

            let mut failed = 0;
            for (url, result) in urls.iter().zip(results) {
                match result {
                    Ok(path) => println!("{} -> {}", url, path.display()),
                    Err(e) => {
                        failed += 1;
                        eprintln!("{}: {}", url, e);
                    }
                }
            }
            if failed > 0 {
                return Err(anyhow!("{} of {} downloads failed", failed, urls.len()));
            }
            Ok(())
        }
        Commands::Flash { images } => {
            let map: HashMap<String, PathBuf> = images.into_iter().collect();
            let plan = FlashPlan::from_map(&map, &DEFAULT_ERASE_PARTITIONS);
            run_flash(runner, settings, executor, plan).await
        }
        Commands::Provision {
            manifest,
            variant,
            dest,
        } => {
            let manifest = ImageManifest::load(&manifest).map_err(AppError::from)?;
            let dest = dest.unwrap_or_else(|| settings.download_dir.join(&variant));
            let plan = acquire_variant(settings, &manifest, &variant, &dest).await?;
            run_flash(runner, settings, executor, plan).await
        }
        Commands::Settings => {
            let json = serde_json::to_string_pretty(settings).context("serializing settings")?;
            println!("{}", json);
            Ok(())
        }
    }
}

async fn list_devices(
    runner: Arc<dyn CommandRunner>,
    settings: &AppSettings,
    watch: bool,
) -> anyhow::Result<()> {
    let discovery = DeviceDiscovery::new(runner);

    if !watch {
        let devices = discovery
            .scan_detailed()
            .await
            .context("device enumeration failed")?;
        if devices.is_empty() {
            println!("No devices found");
        }
        for device in devices {
            println!("{}\t{:?}", device.identifier, device.transport);
        }
        return Ok(());
    }

    let cache = DeviceScanCache::new(
        discovery,
        settings.scan_cache_ttl(),
        DeviceScanCache::DEFAULT_MIN_INTERVAL,
    );
    let mut last: Option<Vec<String>> = None;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            devices = cache.devices() => {
                if last.as_ref() != Some(&devices) {
                    println!("{} device(s): {}", devices.len(), devices.join(", "));
                    last = Some(devices);
                }
            }
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

fn download_options(settings: &AppSettings, url: &str) -> fastboot_flasher::DownloadOptions {
    let url = url.to_string();
    settings.download_options().with_callback(move |event| match event {
        DownloadEvent::Retry {
            attempt,
            max_attempts,
            reason,
            ..
        } => log::warn!("[Download] {} retry {}/{}: {}", url, attempt, max_attempts, reason),
        DownloadEvent::ResumeUnsupported => {
            log::warn!("[Download] {} does not support resume, restarting", url)
        }
        DownloadEvent::Skipped(path) => {
            log::info!(target: "parsed", "Already downloaded: {}", path.display())
        }
        _ => {}
    })
}

/// Print one status line per second until aborted.
async fn report_queue(queue: DownloadQueue, ids: Vec<TaskId>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        ticker.tick().await;
        let parts: Vec<String> = ids
            .iter()
            .filter_map(|id| {
                queue
                    .progress(*id)
                    .map(|p| format!("{} {:.0}% {:.0} KiB/s", id, p.percent, p.speed / 1024.0))
            })
            .collect();
        if !parts.is_empty() {
            eprintln!("{}", parts.join(" | "));
        }
    }
}

/// Download each image of `variant` (trying mirrors in turn), extract
/// archives and return the resulting plan.
async fn acquire_variant(
    settings: &AppSettings,
    manifest: &ImageManifest,
    variant: &str,
    dest: &Path,
) -> anyhow::Result<FlashPlan> {
    let set = manifest.variant(variant).ok_or_else(|| {
        AppError::InvalidInput(format!(
            "unknown variant '{}' (available: {})",
            variant,
            manifest.variants().join(", ")
        ))
    })?;

    let queue = DownloadQueue::new(settings.max_concurrent_downloads);
    let jobs = set
        .partitions()
        .into_iter()
        .map(|(partition, entry)| fetch_image(settings, manifest, &queue, partition, entry, dest));
    let fetched = futures::future::try_join_all(jobs).await?;

    let mut plan = FlashPlan::new();
    for (partition, path) in fetched {
        plan = plan.with_image(partition, path);
    }
    Ok(plan)
}

async fn fetch_image(
    settings: &AppSettings,
    manifest: &ImageManifest,
    queue: &DownloadQueue,
    partition: &'static str,
    entry: &ImageEntry,
    dest: &Path,
) -> anyhow::Result<(&'static str, PathBuf)> {
    let mut last_error = None;
    let mut downloaded = None;
    for url in manifest.candidate_urls(&entry.url) {
        let mut options = download_options(settings, &url);
        if let Some(size) = entry.size {
            options = options.with_expected_size(size);
        }
        if let Some(name) = &entry.original_filename {
            options = options.with_file_name(name.clone());
        }
        match queue.download(url.as_str(), dest, options).await {
            Ok(path) => {
                downloaded = Some(path);
                break;
            }
            Err(e) => {
                log::warn!("[Provision] {} from {} failed: {}", partition, url, e);
                last_error = Some(e);
            }
        }
    }

    let path = match (downloaded, last_error) {
        (Some(path), _) => path,
        (None, Some(e)) => return Err(AppError::from(e).into()),
        (None, None) => return Err(anyhow!("no download source for {}", partition)),
    };

    if !is_compressed_file(&path) {
        return Ok((partition, path));
    }

    let inner_name = match &entry.extracted_file {
        Some(name) => name.clone(),
        None => path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow!("cannot derive image name from {}", path.display()))?,
    };
    let out_dir = dest.join("extracted").join(partition);
    let image = extract_image(&AutoExtractor::default(), &path, &out_dir, &inner_name)
        .await
        .map_err(AppError::from)?;
    Ok((partition, image))
}

async fn run_flash(
    runner: Arc<dyn CommandRunner>,
    settings: &AppSettings,
    executor: &CommandExecutor,
    plan: FlashPlan,
) -> anyhow::Result<()> {
    let (event_tx, mut event_rx) = mpsc::channel::<FlashEvent>(256);
    let orchestrator =
        FlashOrchestrator::new(runner, settings.flash_options()).with_observer(Arc::new(event_tx));

    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                FlashEvent::StageChanged(stage) => println!("== {}", stage),
                FlashEvent::Progress(percent) => println!("[{:>3}%]", percent),
                FlashEvent::Log(entry) => println!(
                    "{} [{}] {}",
                    entry.timestamp.format("%H:%M:%S"),
                    entry.level,
                    entry.message
                ),
            }
        }
    });

    let result = tokio::select! {
        result = orchestrator.start_flash(&plan) => result,
        _ = tokio::signal::ctrl_c() => {
            orchestrator.cancel_flash().await;
            executor.cleanup();
            Err(fastboot_flasher::FlashError::Cancelled)
        }
    };

    drop(orchestrator);
    let _ = printer.await;

    let snapshot = result.map_err(AppError::from)?;
    println!("Flash completed in stage {} ({}%)", snapshot.stage, snapshot.progress);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_image_arg() {
        assert_eq!(
            parse_image_arg("boot=/tmp/boot.img").unwrap(),
            ("boot".to_string(), PathBuf::from("/tmp/boot.img"))
        );
        assert!(parse_image_arg("boot").is_err());
        assert!(parse_image_arg("=/tmp/x.img").is_err());
        assert!(parse_image_arg("boot=").is_err());
    }

    #[test]
    fn test_cli_parses_flash() {
        let cli = Cli::try_parse_from([
            "fastboot_flasher",
            "flash",
            "--image",
            "boot=/a/boot.img",
            "--image",
            "userdata=/a/userdata.img",
        ])
        .unwrap();
        match cli.command {
            Commands::Flash { images } => assert_eq!(images.len(), 2),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_cli_requires_variant_for_provision() {
        assert!(Cli::try_parse_from(["fastboot_flasher", "provision", "--manifest", "m.json"]).is_err());
    }
}
