//! Archive extraction for downloaded images.
//!
//! Images may ship compressed. Gzip is decoded in-process; `.zip` and `.7z`
//! go through an external `7z` binary.

use async_trait::async_trait;
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tokio::process::Command;

use crate::error::ExtractError;

const COMPRESSED_EXTENSIONS: [&str; 3] = ["zip", "7z", "gz"];

/// Whether `path` names an archive that must be extracted before flashing.
pub fn is_compressed_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            COMPRESSED_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

#[async_trait]
pub trait ArchiveExtractor: Send + Sync {
    /// Extract `archive` into `out_dir`, returning the files written.
    async fn extract(&self, archive: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, ExtractError>;
}

/// Single-member gzip stream; the output is named after the archive minus `.gz`.
#[derive(Debug, Default, Clone, Copy)]
pub struct GzipExtractor;

#[async_trait]
impl ArchiveExtractor for GzipExtractor {
    async fn extract(&self, archive: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, ExtractError> {
        let source = archive.to_path_buf();
        let out_dir = out_dir.to_path_buf();
        tokio::task::spawn_blocking(move || gunzip(&source, &out_dir))
            .await
            .map_err(|e| ExtractError::Failed {
                archive: archive.to_path_buf(),
                reason: e.to_string(),
            })?
    }
}

fn gunzip(archive: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, ExtractError> {
    let stem = archive
        .file_stem()
        .filter(|_| archive.extension().map_or(false, |e| e.eq_ignore_ascii_case("gz")))
        .ok_or_else(|| ExtractError::UnsupportedFormat(archive.to_path_buf()))?;

    fs::create_dir_all(out_dir)?;
    let target = out_dir.join(stem);

    let mut decoder = GzDecoder::new(BufReader::new(File::open(archive)?));
    let mut writer = BufWriter::new(File::create(&target)?);
    if let Err(e) = io::copy(&mut decoder, &mut writer) {
        let _ = fs::remove_file(&target);
        return Err(ExtractError::Failed {
            archive: archive.to_path_buf(),
            reason: e.to_string(),
        });
    }
    log::debug!("[Extract] {} -> {}", archive.display(), target.display());
    Ok(vec![target])
}

/// Runs `7z x -o<out_dir> -y <archive>`. Handles `.zip` and `.7z`.
#[derive(Debug, Clone)]
pub struct SevenZipExtractor {
    binary: PathBuf,
}

impl Default for SevenZipExtractor {
    fn default() -> Self {
        SevenZipExtractor {
            binary: PathBuf::from("7z"),
        }
    }
}

impl SevenZipExtractor {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        SevenZipExtractor {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl ArchiveExtractor for SevenZipExtractor {
    async fn extract(&self, archive: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, ExtractError> {
        fs::create_dir_all(out_dir)?;
        let before = list_files(out_dir)?;

        let mut out_flag = std::ffi::OsString::from("-o");
        out_flag.push(out_dir.as_os_str());

        let output = Command::new(&self.binary)
            .arg("x")
            .arg(out_flag)
            .arg("-y")
            .arg(archive)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ExtractError::Failed {
                archive: archive.to_path_buf(),
                reason: format!("could not run {}: {}", self.binary.display(), e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractError::Failed {
                archive: archive.to_path_buf(),
                reason: format!("{} ({})", stderr.trim(), output.status),
            });
        }

        let written = list_files(out_dir)?
            .into_iter()
            .filter(|p| !before.contains(p))
            .collect();
        Ok(written)
    }
}

/// Picks gzip or 7z by extension.
#[derive(Debug, Clone, Default)]
pub struct AutoExtractor {
    pub gzip: GzipExtractor,
    pub seven_zip: SevenZipExtractor,
}

#[async_trait]
impl ArchiveExtractor for AutoExtractor {
    async fn extract(&self, archive: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, ExtractError> {
        let ext = archive
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("gz") => self.gzip.extract(archive, out_dir).await,
            Some("zip") | Some("7z") => self.seven_zip.extract(archive, out_dir).await,
            _ => Err(ExtractError::UnsupportedFormat(archive.to_path_buf())),
        }
    }
}

fn list_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                files.push(path);
            }
        }
    }
    Ok(files)
}

/// Extract `archive` and return the path of `extracted_file_name` inside
/// `out_dir`. Files in nested directories are matched by file name.
pub async fn extract_image(
    extractor: &dyn ArchiveExtractor,
    archive: &Path,
    out_dir: &Path,
    extracted_file_name: &str,
) -> Result<PathBuf, ExtractError> {
    log::info!("[Extract] Extracting {}", archive.display());
    let written = extractor.extract(archive, out_dir).await?;

    let direct = out_dir.join(extracted_file_name);
    if direct.is_file() {
        return Ok(direct);
    }

    let wanted = std::ffi::OsStr::new(extracted_file_name);
    written
        .into_iter()
        .chain(list_files(out_dir)?)
        .find(|p| p.file_name() == Some(wanted) && p.is_file())
        .ok_or_else(|| ExtractError::MissingExtractedFile {
            archive: archive.to_path_buf(),
            file: extracted_file_name.to_string(),
        })
}
