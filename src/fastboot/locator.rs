//! Protocol binary resolution.
//!
//! Probes an ordered list of candidate locations; the first existing file wins.
//! When none exist the bare binary name is returned and resolution is left to
//! the host's executable lookup.

use std::path::{Path, PathBuf};

/// Platform file name of the protocol binary
#[cfg(windows)]
pub const FASTBOOT_BINARY: &str = "fastboot.exe";
#[cfg(not(windows))]
pub const FASTBOOT_BINARY: &str = "fastboot";

#[derive(Debug, Clone, Default)]
pub struct BinaryLocator {
    /// User-configured path, probed before anything else
    explicit: Option<PathBuf>,
    /// Packaged resource root (contains `bin/<binary>`)
    resource_dir: Option<PathBuf>,
    /// Working directory used for the cwd-relative candidates
    working_dir: Option<PathBuf>,
}

impl BinaryLocator {
    pub fn new() -> Self {
        BinaryLocator {
            explicit: None,
            resource_dir: None,
            working_dir: std::env::current_dir().ok(),
        }
    }

    pub fn with_explicit_path(mut self, path: Option<PathBuf>) -> Self {
        self.explicit = path;
        self
    }

    pub fn with_resource_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.resource_dir = dir;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Ordered candidate list: explicit, packaged resource, development tree,
    /// working directory (`bin/` then root).
    pub fn candidates(&self) -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        if let Some(ref explicit) = self.explicit {
            candidates.push(explicit.clone());
        }

        if let Some(ref resources) = self.resource_dir {
            candidates.push(resources.join("bin").join(FASTBOOT_BINARY));
        }

        // Development layout: target/<profile>/<exe> -> <repo>/bin/<binary>
        if let Some(exe_dir) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            candidates.push(exe_dir.join("../../bin").join(FASTBOOT_BINARY));
        }

        if let Some(ref cwd) = self.working_dir {
            candidates.push(cwd.join("bin").join(FASTBOOT_BINARY));
            candidates.push(cwd.join(FASTBOOT_BINARY));
        }

        candidates
    }

    /// Resolve the binary path; falls back to the bare name for PATH lookup.
    pub fn resolve(&self) -> PathBuf {
        for candidate in self.candidates() {
            if candidate.is_file() {
                log::info!("[Fastboot] Found protocol binary at: {}", candidate.display());
                return candidate;
            }
        }

        log::info!("[Fastboot] No bundled binary found, using '{}' from PATH", FASTBOOT_BINARY);
        PathBuf::from(FASTBOOT_BINARY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_falls_back_to_bare_name() {
        let empty = TempDir::new().unwrap();
        let locator = BinaryLocator::new().with_working_dir(empty.path());
        assert_eq!(locator.resolve(), PathBuf::from(FASTBOOT_BINARY));
    }

    #[test]
    fn test_resource_dir_wins_over_working_dir() {
        let resources = TempDir::new().unwrap();
        let cwd = TempDir::new().unwrap();
        std::fs::create_dir_all(resources.path().join("bin")).unwrap();
        std::fs::write(resources.path().join("bin").join(FASTBOOT_BINARY), b"").unwrap();
        std::fs::write(cwd.path().join(FASTBOOT_BINARY), b"").unwrap();

        let locator = BinaryLocator::new()
            .with_resource_dir(Some(resources.path().to_path_buf()))
            .with_working_dir(cwd.path());

        assert_eq!(
            locator.resolve(),
            resources.path().join("bin").join(FASTBOOT_BINARY)
        );
    }

    #[test]
    fn test_working_dir_bin_before_root() {
        let cwd = TempDir::new().unwrap();
        std::fs::create_dir_all(cwd.path().join("bin")).unwrap();
        std::fs::write(cwd.path().join("bin").join(FASTBOOT_BINARY), b"").unwrap();
        std::fs::write(cwd.path().join(FASTBOOT_BINARY), b"").unwrap();

        let locator = BinaryLocator::new().with_working_dir(cwd.path());
        assert_eq!(locator.resolve(), cwd.path().join("bin").join(FASTBOOT_BINARY));
    }

    #[test]
    fn test_explicit_path_is_first_candidate() {
        let locator = BinaryLocator::new()
            .with_explicit_path(Some(PathBuf::from("/opt/platform-tools/fastboot")));
        assert_eq!(
            locator.candidates()[0],
            PathBuf::from("/opt/platform-tools/fastboot")
        );
    }
}
