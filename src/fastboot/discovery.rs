//! Device enumeration over the protocol binary.
//!
//! `DeviceDiscovery` holds no devices between calls. Callers that want to
//! reuse a recent scan go through `DeviceScanCache`, which owns an explicit TTL.

use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::error::{CommandErrorKind, DiscoveryError};
use crate::fastboot::commands::FastbootCommand;
use crate::fastboot::executor::CommandRunner;
use crate::models::{Device, TransportKind};

/// Token in the transport column that marks a device in boot-loader mode
pub const PROTOCOL_MODE_MARKER: &str = "fastboot";

const HEADER_PREFIX: &str = "List of devices";

/// Parse enumeration output into devices.
///
/// Lines are `"<id>\t<transport>"`. Blank lines, the header line and lines
/// without two tab-separated fields are skipped.
pub fn parse_device_list(output: &str) -> Vec<Device> {
    output
        .lines()
        .filter_map(|line| {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with(HEADER_PREFIX) {
                return None;
            }

            let mut fields = line.split('\t');
            let identifier = fields.next()?.trim();
            let transport = fields.next()?;
            if identifier.is_empty() {
                return None;
            }

            let transport = if transport.contains(PROTOCOL_MODE_MARKER) {
                TransportKind::ProtocolMode
            } else {
                TransportKind::Unknown
            };

            Some(Device {
                identifier: identifier.to_string(),
                transport,
            })
        })
        .collect()
}

/// Enumerates attached devices through a `CommandRunner`.
#[derive(Clone)]
pub struct DeviceDiscovery {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl DeviceDiscovery {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        let timeout = runner.default_timeout();
        DeviceDiscovery { runner, timeout }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Identifiers of devices in protocol mode, in output order.
    ///
    /// A failed enumeration command is reported as no devices.
    pub async fn scan_devices(&self) -> Vec<String> {
        match self.scan_detailed().await {
            Ok(devices) => devices
                .into_iter()
                .filter(Device::is_protocol_mode)
                .map(|d| d.identifier)
                .collect(),
            Err(e) => {
                log::warn!("[Discovery] {}; treating as no devices", e);
                Vec::new()
            }
        }
    }

    /// Every parsed device, or the reason the enumeration command failed.
    pub async fn scan_detailed(&self) -> Result<Vec<Device>, DiscoveryError> {
        let result = self
            .runner
            .run(&FastbootCommand::Devices.to_args(), self.timeout)
            .await;

        if !result.success {
            return Err(DiscoveryError::CommandFailed {
                kind: result.error_kind.unwrap_or(CommandErrorKind::NonZeroExit),
                message: result.failure_message(),
            });
        }

        let devices = parse_device_list(&result.output);
        log::debug!("[Discovery] Found {} device line(s)", devices.len());
        Ok(devices)
    }

    pub async fn is_connected(&self) -> bool {
        !self.scan_devices().await.is_empty()
    }

    /// Whether `identifier` is currently attached in protocol mode.
    pub async fn validate_device_connection(&self, identifier: &str) -> bool {
        self.scan_devices()
            .await
            .iter()
            .any(|id| id == identifier)
    }

    /// Query a boot-loader variable; `None` if the command fails or the
    /// variable is absent from the output.
    pub async fn query_variable(&self, name: &str) -> Option<String> {
        let result = self
            .runner
            .run(&FastbootCommand::GetVar(name.to_string()).to_args(), self.timeout)
            .await;

        if !result.success {
            log::warn!(
                "[Discovery] getvar {} failed: {}",
                name,
                result.failure_message()
            );
            return None;
        }

        parse_variable(&result.output, name)
    }
}

// `<name>: <value>`, optionally behind a `(bootloader)` prefix
static VARIABLE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:\(bootloader\)[ \t]*)?([^:\s]+):[ \t]*(.*?)[ \t\r]*$")
        .expect("Invalid getvar line regex")
});

/// Extract the value of `name` from getvar output.
pub(crate) fn parse_variable(output: &str, name: &str) -> Option<String> {
    VARIABLE_LINE
        .captures_iter(output)
        .find(|caps| &caps[1] == name)
        .map(|caps| caps[2].to_string())
}

struct ScanCacheState {
    devices: Vec<String>,
    fetched_at: Option<Instant>,
    last_scan: Option<Instant>,
}

/// Caller-side cache over `DeviceDiscovery::scan_devices`.
///
/// A non-empty result is reused until `ttl` expires. Real scans are also
/// rate-limited to one per `min_interval`; inside that window the last
/// result is returned as-is.
pub struct DeviceScanCache {
    discovery: DeviceDiscovery,
    ttl: Duration,
    min_interval: Duration,
    state: Mutex<ScanCacheState>,
}

impl DeviceScanCache {
    pub const DEFAULT_TTL: Duration = Duration::from_millis(5_000);
    pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(2_000);

    pub fn new(discovery: DeviceDiscovery, ttl: Duration, min_interval: Duration) -> Self {
        DeviceScanCache {
            discovery,
            ttl,
            min_interval,
            state: Mutex::new(ScanCacheState {
                devices: Vec::new(),
                fetched_at: None,
                last_scan: None,
            }),
        }
    }

    pub fn with_defaults(discovery: DeviceDiscovery) -> Self {
        DeviceScanCache::new(discovery, Self::DEFAULT_TTL, Self::DEFAULT_MIN_INTERVAL)
    }

    pub async fn devices(&self) -> Vec<String> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        if let Some(fetched) = state.fetched_at {
            if !state.devices.is_empty() && now.duration_since(fetched) < self.ttl {
                return state.devices.clone();
            }
        }

        if let Some(last) = state.last_scan {
            if now.duration_since(last) < self.min_interval {
                return state.devices.clone();
            }
        }

        let devices = self.discovery.scan_devices().await;
        state.last_scan = Some(Instant::now());
        if devices.is_empty() {
            state.fetched_at = None;
        } else {
            state.fetched_at = state.last_scan;
        }
        state.devices = devices.clone();
        devices
    }

    /// Drop the cached result so the next call scans (subject to the interval).
    pub async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        state.devices.clear();
        state.fetched_at = None;
    }

    /// Force a real scan regardless of TTL and interval.
    pub async fn refresh(&self) -> Vec<String> {
        {
            let mut state = self.state.lock().await;
            state.fetched_at = None;
            state.last_scan = None;
        }
        self.devices().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fastboot::executor::CommandResult;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedRunner {
        result: CommandResult,
        calls: AtomicUsize,
    }

    impl FixedRunner {
        fn new(result: CommandResult) -> Arc<Self> {
            Arc::new(FixedRunner {
                result,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl CommandRunner for FixedRunner {
        async fn run(&self, _args: &[String], _timeout: Duration) -> CommandResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    #[test]
    fn test_parse_skips_header_and_blank_lines() {
        let output = "List of devices attached\n\nabc123\tfastboot\n";
        let devices = parse_device_list(output);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].identifier, "abc123");
        assert!(devices[0].is_protocol_mode());
    }

    #[test]
    fn test_parse_non_protocol_transport_is_unknown() {
        let devices = parse_device_list("serial9\tadb\n");
        assert_eq!(devices[0].transport, TransportKind::Unknown);
    }

    #[test]
    fn test_parse_trims_identifier_and_ignores_single_field() {
        let devices = parse_device_list("  dev1 \tfastboot\nlonely-line\n");
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].identifier, "dev1");
    }

    #[tokio::test]
    async fn test_scan_devices_filters_protocol_mode() {
        let runner = FixedRunner::new(CommandResult::ok("id1\tfastboot\nid2\tadb\n"));
        let discovery = DeviceDiscovery::new(runner);
        assert_eq!(discovery.scan_devices().await, vec!["id1".to_string()]);
    }

    #[tokio::test]
    async fn test_scan_failure_is_empty_but_detailed_keeps_cause() {
        let runner = FixedRunner::new(CommandResult::failure(
            CommandErrorKind::ProcessSpawnError,
            "",
            Some(-1),
            "Failed to start fastboot",
        ));
        let discovery = DeviceDiscovery::new(runner);

        assert!(discovery.scan_devices().await.is_empty());
        assert!(!discovery.is_connected().await);

        match discovery.scan_detailed().await {
            Err(DiscoveryError::CommandFailed { kind, .. }) => {
                assert_eq!(kind, CommandErrorKind::ProcessSpawnError)
            }
            other => panic!("expected CommandFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_validate_device_connection() {
        let runner = FixedRunner::new(CommandResult::ok("abc\tfastboot\n"));
        let discovery = DeviceDiscovery::new(runner);
        assert!(discovery.validate_device_connection("abc").await);
        assert!(!discovery.validate_device_connection("xyz").await);
    }

    #[test]
    fn test_parse_variable_with_bootloader_prefix() {
        let output = "(bootloader) product: raphael\nFinished. Total time: 0.001s";
        assert_eq!(parse_variable(output, "product"), Some("raphael".to_string()));
    }

    #[test]
    fn test_parse_variable_plain_and_missing() {
        assert_eq!(
            parse_variable("current-slot: a\n", "current-slot"),
            Some("a".to_string())
        );
        assert_eq!(parse_variable("unlocked: yes\n", "product"), None);
    }

    #[tokio::test]
    async fn test_query_variable_failure_is_none() {
        let runner = FixedRunner::new(CommandResult::failure(
            CommandErrorKind::NonZeroExit,
            "FAILED",
            Some(1),
            "Command failed with exit code: 1",
        ));
        let discovery = DeviceDiscovery::new(runner);
        assert_eq!(discovery.query_variable("product").await, None);
    }

    #[tokio::test]
    async fn test_scan_cache_reuses_result_within_ttl() {
        let runner = FixedRunner::new(CommandResult::ok("abc\tfastboot\n"));
        let cache = DeviceScanCache::new(
            DeviceDiscovery::new(runner.clone()),
            Duration::from_secs(60),
            Duration::from_millis(0),
        );

        assert_eq!(cache.devices().await, vec!["abc".to_string()]);
        assert_eq!(cache.devices().await, vec!["abc".to_string()]);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);

        cache.refresh().await;
        assert_eq!(runner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_scan_cache_does_not_hold_empty_results() {
        let runner = FixedRunner::new(CommandResult::ok("List of devices attached\n"));
        let cache = DeviceScanCache::new(
            DeviceDiscovery::new(runner.clone()),
            Duration::from_secs(60),
            Duration::from_millis(0),
        );

        assert!(cache.devices().await.is_empty());
        assert!(cache.devices().await.is_empty());
        assert_eq!(runner.calls.load(Ordering::SeqCst), 2);
    }

    proptest! {
        #[test]
        fn prop_protocol_lines_are_found(ids in prop::collection::vec("[a-zA-Z0-9]{1,16}", 0..8)) {
            let mut output = String::from("List of devices attached\n");
            for id in &ids {
                output.push_str(&format!("{}\tfastboot\n", id));
                output.push_str(&format!("{}-adb\tdevice\n", id));
            }
            let parsed: Vec<String> = parse_device_list(&output)
                .into_iter()
                .filter(|d| d.is_protocol_mode())
                .map(|d| d.identifier)
                .collect();
            prop_assert_eq!(parsed, ids);
        }

        #[test]
        fn prop_lines_without_tab_never_parse(line in "[^\t\n]{0,40}") {
            prop_assert!(parse_device_list(&line).is_empty());
        }
    }
}
