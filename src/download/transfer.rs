//! A single resumable HTTP transfer with retry and pause support.
//!
//! The queue hands each started task a `TransferJob`; the job resolves the
//! destination, applies the overwrite policy and then streams the body to
//! disk, reissuing range requests after pauses and transient failures.

use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::{StatusCode, Url};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;

use crate::download::options::{DownloadEvent, DownloadOptions, OverwritePolicy};
use crate::error::DownloadError;
use crate::models::{DownloadProgress, DownloadState};

/// Control signal the queue sends to a running transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Control {
    Run,
    Pause,
    Stop,
}

/// Why one request attempt ended early.
#[derive(Debug)]
enum AttemptError {
    /// Retried per the retry policy
    Transient(String),
    /// Paused by the caller; resumed without consuming an attempt
    Paused,
    Fatal(DownloadError),
}

pub(crate) struct TransferJob {
    pub client: reqwest::Client,
    pub url: String,
    pub destination_dir: PathBuf,
    pub options: DownloadOptions,
    pub control: watch::Receiver<Control>,
    pub progress: Arc<Mutex<DownloadProgress>>,
}

/// File name for a URL: last non-empty path segment, or `download`.
pub fn file_name_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "download".to_string())
}

/// Total size from `Content-Range: bytes <start>-<end>/<total>`.
fn parse_content_range_total(value: &str) -> Option<u64> {
    value.rsplit('/').next().and_then(|total| total.trim().parse().ok())
}

impl TransferJob {
    /// Run the transfer to a terminal outcome; returns the local file path.
    pub async fn run(mut self) -> Result<PathBuf, DownloadError> {
        let url = Url::parse(&self.url)
            .map_err(|e| DownloadError::InvalidUrl(format!("{}: {}", self.url, e)))?;
        let name = self
            .options
            .file_name
            .clone()
            .unwrap_or_else(|| file_name_from_url(&url));
        let path = self.destination_dir.join(&name);

        let outcome = self.transfer(&url, &path).await;

        match outcome {
            Err(DownloadError::Stopped) if self.options.remove_on_stop => {
                remove_partial(&path).await;
            }
            Err(DownloadError::Stopped) => {}
            Err(_) if self.options.remove_on_fail => {
                remove_partial(&path).await;
            }
            _ => {}
        }

        outcome.map(|_| path)
    }

    async fn transfer(&mut self, url: &Url, path: &Path) -> Result<(), DownloadError> {
        fs::create_dir_all(&self.destination_dir).await?;

        if self.should_skip(url, path).await? {
            log::info!("[Download] Skipping {}, destination already present", path.display());
            let size = file_size(path).await;
            self.update_progress(|p| {
                p.percent = 100.0;
                p.downloaded = size;
                p.total = Some(size);
                p.speed = 0.0;
            });
            self.options.emit(DownloadEvent::Skipped(path.to_path_buf()));
            return Ok(());
        }

        let max_attempts = self.options.retry.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            self.wait_while_paused().await?;
            attempt += 1;

            match self.attempt(url, path).await {
                Ok(()) => return Ok(()),
                Err(AttemptError::Fatal(e)) => return Err(e),
                Err(AttemptError::Paused) => {
                    // Pauses do not count against the retry budget
                    attempt -= 1;
                }
                Err(AttemptError::Transient(reason)) => {
                    if attempt >= max_attempts {
                        log::error!(
                            "[Download] {} failed after {} attempt(s): {}",
                            url,
                            attempt,
                            reason
                        );
                        return Err(DownloadError::Network {
                            attempts: attempt,
                            reason,
                        });
                    }

                    let delay = self.options.retry.delay;
                    log::warn!(
                        "[Download] {} attempt {}/{} failed ({}), retrying in {} ms",
                        url,
                        attempt,
                        max_attempts,
                        reason,
                        delay.as_millis()
                    );
                    self.options.emit(DownloadEvent::Retry {
                        attempt,
                        max_attempts,
                        delay,
                        reason,
                    });

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        stopped = wait_for_stop(&mut self.control) => {
                            if stopped {
                                return Err(DownloadError::Stopped);
                            }
                        }
                    }
                }
            }
        }
    }

    async fn should_skip(&mut self, url: &Url, path: &Path) -> Result<bool, DownloadError> {
        let existing = match fs::metadata(path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => return Ok(false),
        };

        match self.options.overwrite {
            OverwritePolicy::Skip => Ok(true),
            OverwritePolicy::Overwrite => {
                fs::remove_file(path).await?;
                Ok(false)
            }
            OverwritePolicy::SkipIfNotSmaller => {
                let expected = match self.options.expected_size {
                    Some(size) => Some(size),
                    None => self.remote_size(url).await,
                };
                // Unknown size: let the range request decide between 206 and 416
                Ok(matches!(expected, Some(expected) if existing >= expected))
            }
        }
    }

    /// Best-effort HEAD lookup of the remote size. Gives up on pause, stop or
    /// an idle timeout; the attempt loop then acts on the control signal.
    async fn remote_size(&mut self, url: &Url) -> Option<u64> {
        let request = self.client.head(url.clone()).headers(self.header_map());
        let idle = self.options.idle_timeout;
        let response = tokio::select! {
            biased;
            _ = wait_for_halt(&mut self.control) => return None,
            sent = tokio::time::timeout(idle, request.send()) => sent.ok()?.ok()?,
        };
        if !response.status().is_success() {
            return None;
        }
        response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
    }

    async fn attempt(&mut self, url: &Url, path: &Path) -> Result<(), AttemptError> {
        let offset = if self.options.resume {
            file_size(path).await
        } else {
            0
        };

        let mut request = self.client.get(url.clone()).headers(self.header_map());
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={}-", offset));
        }

        let idle = self.options.idle_timeout;
        let response = tokio::select! {
            biased;
            control = wait_for_halt(&mut self.control) => {
                return Err(halted(url, control, offset));
            }
            sent = tokio::time::timeout(idle, request.send()) => match sent {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => return Err(AttemptError::Transient(e.to_string())),
                Err(_) => {
                    return Err(AttemptError::Transient(format!(
                        "no response within {} ms",
                        idle.as_millis()
                    )));
                }
            },
        };
        let status = response.status();

        if status == StatusCode::RANGE_NOT_SATISFIABLE && offset > 0 {
            log::info!("[Download] {} already complete ({} bytes)", url, offset);
            self.update_progress(|p| {
                p.percent = 100.0;
                p.downloaded = offset;
                p.total = Some(offset);
            });
            return Ok(());
        }

        if status.is_client_error() {
            return Err(AttemptError::Fatal(DownloadError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            }));
        }
        if !status.is_success() {
            return Err(AttemptError::Transient(format!("HTTP {}", status.as_u16())));
        }

        let resumed = status == StatusCode::PARTIAL_CONTENT && offset > 0;
        if offset > 0 && !resumed {
            log::warn!(
                "[Download] Server ignored range request for {}, restarting from zero",
                url
            );
            self.options.emit(DownloadEvent::ResumeUnsupported);
        }

        let start = if resumed { offset } else { 0 };
        let total = if resumed {
            response
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_content_range_total)
                .or_else(|| response.content_length().map(|len| len + start))
        } else {
            response.content_length()
        };

        let opened = if resumed {
            OpenOptions::new().append(true).open(path).await
        } else {
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(path)
                .await
        };
        let mut file = opened.map_err(|e| AttemptError::Fatal(e.into()))?;

        let mut downloaded = start;
        self.update_progress(|p| {
            p.downloaded = downloaded;
            p.total = total;
            p.percent = percent(downloaded, total);
            p.speed = 0.0;
        });

        let mut stream = response.bytes_stream();
        let mut last_chunk_at = Instant::now();

        loop {
            tokio::select! {
                biased;
                control = wait_for_halt(&mut self.control) => {
                    let flushed = file.flush().await;
                    if control == Control::Pause {
                        flushed.map_err(|e| AttemptError::Fatal(e.into()))?;
                    }
                    return Err(halted(url, control, downloaded));
                }
                chunk = tokio::time::timeout(idle, stream.next()) => {
                    match chunk {
                        Err(_) => {
                            let _ = file.flush().await;
                            return Err(AttemptError::Transient(format!(
                                "no data for {} ms at {} bytes",
                                idle.as_millis(),
                                downloaded
                            )));
                        }
                        Ok(Some(Ok(bytes))) => {
                            file.write_all(&bytes)
                                .await
                                .map_err(|e| AttemptError::Fatal(e.into()))?;
                            downloaded += bytes.len() as u64;

                            let now = Instant::now();
                            let elapsed = now.duration_since(last_chunk_at).as_secs_f64();
                            last_chunk_at = now;
                            let speed = if elapsed > 0.0 { bytes.len() as f64 / elapsed } else { 0.0 };

                            self.update_progress(|p| {
                                p.downloaded = downloaded;
                                p.total = total;
                                p.percent = percent(downloaded, total);
                                p.speed = speed;
                            });
                        }
                        Ok(Some(Err(e))) => {
                            let _ = file.flush().await;
                            return Err(AttemptError::Transient(e.to_string()));
                        }
                        Ok(None) => break,
                    }
                }
            }
        }

        file.flush().await.map_err(|e| AttemptError::Fatal(e.into()))?;

        if let Some(total) = total {
            if downloaded < total {
                return Err(AttemptError::Transient(format!(
                    "connection closed at {} of {} bytes",
                    downloaded, total
                )));
            }
        }

        self.update_progress(|p| {
            p.total = Some(downloaded);
            p.percent = 100.0;
        });
        log::info!(target: "parsed", "[Download] Completed {} ({} bytes)", url, downloaded);
        Ok(())
    }

    /// Block while paused; `Err(Stopped)` if stopped meanwhile.
    async fn wait_while_paused(&mut self) -> Result<(), DownloadError> {
        let mut announced = false;
        loop {
            let control = *self.control.borrow();
            match control {
                Control::Run => {
                    if announced {
                        log::info!("[Download] Resuming {}", self.url);
                        self.set_state(DownloadState::Active);
                    }
                    return Ok(());
                }
                Control::Stop => return Err(DownloadError::Stopped),
                Control::Pause => {
                    if !announced {
                        self.set_state(DownloadState::Paused);
                        announced = true;
                    }
                }
            }
            if self.control.changed().await.is_err() {
                return Err(DownloadError::Stopped);
            }
        }
    }

    fn header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in self.options.effective_headers() {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                (Ok(name), Ok(value)) => {
                    map.insert(name, value);
                }
                _ => log::warn!("[Download] Ignoring invalid header '{}'", name),
            }
        }
        map
    }

    fn set_state(&self, state: DownloadState) {
        self.update_progress(|p| p.state = state);
        self.options.emit(DownloadEvent::StateChanged(state));
    }

    fn update_progress<F>(&self, apply: F)
    where
        F: FnOnce(&mut DownloadProgress),
    {
        let snapshot = {
            let mut progress = self
                .progress
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            apply(&mut progress);
            *progress
        };
        self.options.emit(DownloadEvent::Progress(snapshot));
    }
}

/// Resolves with the first non-`Run` control value; a dropped sender reads as
/// `Stop`. Cancel-safe, so it can sit in a `select!` loop.
async fn wait_for_halt(control: &mut watch::Receiver<Control>) -> Control {
    loop {
        let current = *control.borrow_and_update();
        if current != Control::Run {
            return current;
        }
        if control.changed().await.is_err() {
            return Control::Stop;
        }
    }
}

fn halted(url: &Url, control: Control, downloaded: u64) -> AttemptError {
    match control {
        Control::Pause => {
            log::info!("[Download] Paused {} at {} bytes", url, downloaded);
            AttemptError::Paused
        }
        _ => AttemptError::Fatal(DownloadError::Stopped),
    }
}

/// Resolves `true` once the control channel says stop (or is dropped).
async fn wait_for_stop(control: &mut watch::Receiver<Control>) -> bool {
    loop {
        if *control.borrow() == Control::Stop {
            return true;
        }
        if control.changed().await.is_err() {
            return true;
        }
    }
}

fn percent(downloaded: u64, total: Option<u64>) -> f64 {
    match total {
        Some(total) if total > 0 => (downloaded as f64 / total as f64 * 100.0).min(100.0),
        _ => 0.0,
    }
}

async fn file_size(path: &Path) -> u64 {
    fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}

async fn remove_partial(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => log::info!("[Download] Removed partial file {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("[Download] Could not remove {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_from_url() {
        let url = Url::parse("https://example.com/images/boot.img").unwrap();
        assert_eq!(file_name_from_url(&url), "boot.img");

        let url = Url::parse("https://example.com/images/").unwrap();
        assert_eq!(file_name_from_url(&url), "images");

        let url = Url::parse("https://example.com").unwrap();
        assert_eq!(file_name_from_url(&url), "download");
    }

    #[test]
    fn test_parse_content_range_total() {
        assert_eq!(parse_content_range_total("bytes 100-999/1000"), Some(1000));
        assert_eq!(parse_content_range_total("bytes 0-9/*"), None);
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(50, Some(200)), 25.0);
        assert_eq!(percent(50, None), 0.0);
        assert_eq!(percent(10, Some(0)), 0.0);
    }
}
