//! Image manifest published by the configuration service.
//!
//! The manifest names one boot image plus keyed cache and userdata images;
//! a variant picks one entry from each keyed table. Mirrors are plain
//! prefixes: the mirrored URL is `<mirror>/<original-url-with-scheme>`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageManifest {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub last_updated: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub release_tags: BTreeMap<String, String>,
    pub images: ManifestImages,
    pub mirror_list: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestImages {
    pub boot: ImageEntry,
    #[serde(default)]
    pub cache: BTreeMap<String, ImageEntry>,
    #[serde(default)]
    pub userdata: BTreeMap<String, ImageEntry>,
}

/// One downloadable image. Unknown metadata fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageEntry {
    pub url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_human: Option<String>,
    /// Name of the image inside the archive at `url`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// The images selected for one variant, keyed by target partition.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageSet<'a> {
    pub boot: &'a ImageEntry,
    pub cache: Option<&'a ImageEntry>,
    pub userdata: Option<&'a ImageEntry>,
}

impl<'a> ImageSet<'a> {
    /// `(partition, entry)` pairs in flashing order.
    pub fn partitions(&self) -> Vec<(&'static str, &'a ImageEntry)> {
        let mut out = vec![("boot", self.boot)];
        if let Some(cache) = self.cache {
            out.push(("cache", cache));
        }
        if let Some(userdata) = self.userdata {
            out.push(("userdata", userdata));
        }
        out
    }
}

impl ImageManifest {
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let manifest: ImageManifest = serde_json::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound(format!("Manifest not found at: {}", path.display()))
            } else {
                ConfigError::IoError(e)
            }
        })?;
        Self::from_json(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.images.boot.url.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "Manifest boot image has no url".to_string(),
            ));
        }
        for (table, entries) in [("cache", &self.images.cache), ("userdata", &self.images.userdata)] {
            for (name, entry) in entries {
                if entry.url.trim().is_empty() {
                    return Err(ConfigError::ValidationFailed(format!(
                        "Manifest {} image '{}' has no url",
                        table, name
                    )));
                }
            }
        }
        for (name, entry) in &self.images.userdata {
            if entry.extracted_file.as_deref().map_or(true, |f| f.trim().is_empty()) {
                return Err(ConfigError::ValidationFailed(format!(
                    "Manifest userdata image '{}' has no extracted_file",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Select the cache and userdata entries named `variant`.
    ///
    /// Returns `None` when neither table has the variant.
    pub fn variant(&self, variant: &str) -> Option<ImageSet<'_>> {
        let cache = self.images.cache.get(variant);
        let userdata = self.images.userdata.get(variant);
        if cache.is_none() && userdata.is_none() {
            return None;
        }
        Some(ImageSet {
            boot: &self.images.boot,
            cache,
            userdata,
        })
    }

    /// Variant names present in either table, sorted.
    pub fn variants(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .images
            .cache
            .keys()
            .chain(self.images.userdata.keys())
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// Cleaned, de-duplicated mirror list in manifest order.
    pub fn mirror_list(&self) -> Vec<String> {
        dedupe_mirrors(&self.mirror_list)
    }

    /// The original URL followed by each mirrored form.
    pub fn candidate_urls(&self, original: &str) -> Vec<String> {
        let mut urls = vec![with_scheme(original.trim())];
        for mirror in self.mirror_list() {
            let mirrored = build_mirror_download_url(&mirror, original);
            if !urls.contains(&mirrored) {
                urls.push(mirrored);
            }
        }
        urls
    }
}

fn has_scheme(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

fn with_scheme(url: &str) -> String {
    if has_scheme(url) {
        url.to_string()
    } else {
        format!("https://{}", url)
    }
}

/// Trim, force an http(s) scheme and drop one trailing slash.
pub fn clean_mirror_url(mirror: &str) -> String {
    let cleaned = with_scheme(mirror.trim());
    match cleaned.strip_suffix('/') {
        Some(stripped) => stripped.to_string(),
        None => cleaned,
    }
}

/// Drop blank entries, clean the rest and keep the first of each duplicate.
pub fn dedupe_mirrors(mirrors: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(mirrors.len());
    for mirror in mirrors.iter().filter(|m| !m.trim().is_empty()) {
        let cleaned = clean_mirror_url(mirror);
        if !out.contains(&cleaned) {
            out.push(cleaned);
        }
    }
    out
}

pub fn build_mirror_download_url(mirror: &str, original: &str) -> String {
    format!("{}/{}", clean_mirror_url(mirror), with_scheme(original.trim()))
}
