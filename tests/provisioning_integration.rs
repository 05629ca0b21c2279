//! Manifest-driven acquisition: mirror fallback, download, extraction and
//! the resulting flash plan.

use fastboot_flasher::config::ImageManifest;
use fastboot_flasher::download::{DownloadOptions, DownloadQueue, RetryPolicy};
use fastboot_flasher::error::DownloadError;
use fastboot_flasher::extract::{extract_image, is_compressed_file, GzipExtractor};
use fastboot_flasher::orchestrator::FlashPlan;
use flate2::write::GzEncoder;
use flate2::Compression;
use mockito::Matcher;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

fn gzip(content: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(content).unwrap();
    encoder.finish().unwrap()
}

fn manifest_for(server_url: &str) -> ImageManifest {
    let json = format!(
        r#"{{
            "version": "2.0.0",
            "images": {{
                "boot": {{ "url": "{base}/boot.img.gz", "description": "Boot", "required": true }},
                "cache": {{ "stock": {{ "url": "{base}/cache.img", "description": "Cache" }} }}
            }},
            "mirror_list": ["{base}/", "{base}"]
        }}"#,
        base = server_url
    );
    ImageManifest::from_json(&json).unwrap()
}

fn options() -> DownloadOptions {
    DownloadOptions {
        retry: RetryPolicy {
            max_attempts: 2,
            delay: Duration::from_millis(10),
        },
        ..DownloadOptions::default()
    }
}

#[tokio::test]
async fn test_mirror_fallback_download_and_extract() {
    let mut server = mockito::Server::new_async().await;
    let primary = server
        .mock("GET", "/boot.img.gz")
        .with_status(404)
        .expect(1)
        .create_async()
        .await;
    let mirrored = server
        .mock("GET", Matcher::Regex(r"^/http.*/boot\.img\.gz$".to_string()))
        .with_status(200)
        .with_body(gzip(b"boot partition"))
        .create_async()
        .await;
    let cache = server
        .mock("GET", "/cache.img")
        .with_status(200)
        .with_body("cache partition")
        .create_async()
        .await;

    let manifest = manifest_for(&server.url());
    assert_eq!(manifest.mirror_list().len(), 1);

    let set = manifest.variant("stock").unwrap();
    let dir = TempDir::new().unwrap();
    let queue = DownloadQueue::new(2);

    let mut plan = FlashPlan::new();
    for (partition, entry) in set.partitions() {
        let candidates = manifest.candidate_urls(&entry.url);
        assert_eq!(candidates.len(), 2);

        let mut acquired: Option<PathBuf> = None;
        for url in candidates {
            match queue.download(url.as_str(), dir.path(), options()).await {
                Ok(path) => {
                    acquired = Some(path);
                    break;
                }
                Err(e) => assert!(matches!(e, DownloadError::Http { status: 404, .. })),
            }
        }
        let mut path = acquired.expect("some candidate should succeed");

        if is_compressed_file(&path) {
            path = extract_image(
                &GzipExtractor,
                &path,
                &dir.path().join("extracted"),
                "boot.img",
            )
            .await
            .unwrap();
        }
        plan = plan.with_image(partition, path);
    }

    let images: Vec<_> = plan.images().map(|(p, path)| (p.to_string(), path.to_path_buf())).collect();
    assert_eq!(images.len(), 2);
    assert_eq!(images[0].0, "boot");
    assert_eq!(images[0].1, dir.path().join("extracted").join("boot.img"));
    assert_eq!(std::fs::read(&images[0].1).unwrap(), b"boot partition");
    assert_eq!(images[1].0, "cache");
    assert_eq!(std::fs::read(&images[1].1).unwrap(), b"cache partition");

    primary.assert_async().await;
    mirrored.assert_async().await;
    cache.assert_async().await;
}
