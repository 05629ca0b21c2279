//! What a flash run writes: an ordered list of partitions and their images.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Partitions erased before flashing, in order
pub const DEFAULT_ERASE_PARTITIONS: [&str; 4] = ["dtbo", "boot", "cache", "userdata"];

/// Smallest image accepted for flashing (1 MiB)
pub const MIN_IMAGE_SIZE: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEntry {
    pub partition: String,
    /// `None` when no image was resolved; such partitions are not flashed
    pub image: Option<PathBuf>,
}

/// Ordered partition -> image mapping for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlashPlan {
    entries: Vec<PlanEntry>,
}

impl FlashPlan {
    pub fn new() -> Self {
        FlashPlan::default()
    }

    /// Append or replace the image for `partition`, keeping its position.
    pub fn with_image(self, partition: impl Into<String>, image: impl Into<PathBuf>) -> Self {
        self.with_entry(partition, Some(image.into()))
    }

    pub fn with_entry(mut self, partition: impl Into<String>, image: Option<PathBuf>) -> Self {
        let partition = partition.into();
        match self.entries.iter_mut().find(|e| e.partition == partition) {
            Some(entry) => entry.image = image,
            None => self.entries.push(PlanEntry { partition, image }),
        }
        self
    }

    /// Build from a map. Partitions named in `order` come first in that
    /// order; the rest follow alphabetically.
    pub fn from_map(images: &HashMap<String, PathBuf>, order: &[&str]) -> Self {
        let mut plan = FlashPlan::new();
        for partition in order {
            if let Some(path) = images.get(*partition) {
                plan = plan.with_image(*partition, path.clone());
            }
        }

        let mut rest: Vec<&String> = images
            .keys()
            .filter(|k| !order.contains(&k.as_str()))
            .collect();
        rest.sort();
        for partition in rest {
            plan = plan.with_image(partition.clone(), images[partition].clone());
        }
        plan
    }

    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    /// Entries with a resolved image, in plan order.
    pub fn images(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.entries
            .iter()
            .filter_map(|e| e.image.as_deref().map(|p| (e.partition.as_str(), p)))
    }

    pub fn image_count(&self) -> usize {
        self.images().count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_image_replaces_in_place() {
        let plan = FlashPlan::new()
            .with_image("boot", "/a/boot.img")
            .with_image("userdata", "/a/userdata.img")
            .with_image("boot", "/b/boot.img");

        let images: Vec<_> = plan.images().collect();
        assert_eq!(
            images,
            vec![
                ("boot", Path::new("/b/boot.img")),
                ("userdata", Path::new("/a/userdata.img"))
            ]
        );
    }

    #[test]
    fn test_unresolved_entries_are_not_images() {
        let plan = FlashPlan::new()
            .with_entry("cache", None)
            .with_image("boot", "/a/boot.img");
        assert_eq!(plan.entries().len(), 2);
        assert_eq!(plan.image_count(), 1);
    }

    #[test]
    fn test_from_map_respects_order() {
        let mut images = HashMap::new();
        images.insert("userdata".to_string(), PathBuf::from("/u.img"));
        images.insert("vendor".to_string(), PathBuf::from("/v.img"));
        images.insert("boot".to_string(), PathBuf::from("/b.img"));
        images.insert("abl".to_string(), PathBuf::from("/abl.img"));

        let plan = FlashPlan::from_map(&images, &["boot", "cache", "userdata"]);
        let order: Vec<&str> = plan.images().map(|(p, _)| p).collect();
        assert_eq!(order, vec!["boot", "userdata", "abl", "vendor"]);
    }
}
