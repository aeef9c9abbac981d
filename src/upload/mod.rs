//! Publishing a converted HLS directory.
//!
//! Segments are uploaded concurrently, the playlist is rewritten to point
//! at their public URLs, and the playlist itself is uploaded last. Its URL
//! is what pages end up referencing.

mod http;

pub use http::HttpMediaStore;

use crate::{Error, Result};
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use hlsforge_common::paths::is_playlist_file;
use hlsforge_common::{BatchId, OutputFileKind};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Somewhere uploaded files become publicly reachable.
#[async_trait::async_trait]
pub trait MediaStore: Send + Sync {
    /// Store `data` under `filename` and return its public URL.
    async fn upload(
        &self,
        data: Bytes,
        filename: &str,
        content_type: &str,
        media_type: &str,
    ) -> Result<String>;
}

/// Store that uploads nothing and answers with predictable URLs.
pub struct DryRunStore {
    base_url: String,
}

impl DryRunStore {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait::async_trait]
impl MediaStore for DryRunStore {
    async fn upload(
        &self,
        data: Bytes,
        filename: &str,
        _content_type: &str,
        _media_type: &str,
    ) -> Result<String> {
        tracing::info!(
            file = filename,
            "[DRY-RUN] Would upload {} KB as {}",
            data.len() / 1024,
            filename
        );
        Ok(format!("{}/dry-run/{}", self.base_url, filename))
    }
}

/// Result of publishing one HLS directory.
#[derive(Debug, Clone)]
pub struct PublishedHls {
    pub manifest_url: String,
    /// Local file name to public URL, for every segment.
    pub urls: BTreeMap<String, String>,
}

/// Replace every local segment name in `manifest` with its URL.
///
/// Names are matched in one pass, longest first, so `fileSequence1.m4s`
/// never matches inside `fileSequence10.m4s` and inserted URLs are never
/// rescanned.
pub fn rewrite_manifest(manifest: &str, urls: &BTreeMap<String, String>) -> String {
    if urls.is_empty() {
        return manifest.to_string();
    }

    let mut names: Vec<&str> = urls.keys().map(String::as_str).collect();
    names.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
    let pattern = names
        .iter()
        .map(|name| regex::escape(name))
        .collect::<Vec<_>>()
        .join("|");

    match Regex::new(&pattern) {
        Ok(re) => re
            .replace_all(manifest, |caps: &regex::Captures| {
                urls.get(&caps[0]).cloned().unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned(),
        Err(e) => {
            // Escaped literals always compile; only a size limit can fail.
            tracing::warn!(error = %e, "Falling back to sequential manifest rewrite");
            names.iter().fold(manifest.to_string(), |text, name| {
                text.replace(name, &urls[*name])
            })
        }
    }
}

fn segment_files(dir: &Path) -> Result<Vec<(PathBuf, String, OutputFileKind)>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        let path = entry.path();
        if !entry.file_type().is_file() || is_playlist_file(path) {
            continue;
        }
        let Some(kind) = OutputFileKind::from_path(path) else {
            tracing::debug!(path = %path.display(), "Skipping unrecognised file");
            continue;
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        files.push((path.to_path_buf(), name, kind));
    }
    Ok(files)
}

/// Upload an HLS directory and its rewritten playlist.
///
/// Stops at the first failed upload; the playlist is only uploaded once
/// every segment is reachable.
pub async fn publish_hls(
    store: &dyn MediaStore,
    dir: &Path,
    manifest_name: &str,
    batch: BatchId,
    concurrency: usize,
) -> Result<PublishedHls> {
    let files = segment_files(dir)?;
    let total = files.len();
    tracing::info!(files = total, "{} segments to upload", total);

    let uploaded: Vec<(String, String)> = futures::stream::iter(files.into_iter().enumerate())
        .map(|(i, (path, name, kind))| async move {
            let data = tokio::fs::read(&path).await?;
            tracing::info!(
                file = %name,
                "{}/{}: {} ({} KB)",
                i + 1,
                total,
                name,
                data.len() / 1024
            );
            let url = store
                .upload(
                    Bytes::from(data),
                    &batch.remote_name(&name),
                    kind.content_type(),
                    kind.media_type(),
                )
                .await?;
            Ok::<_, Error>((name, url))
        })
        .buffer_unordered(concurrency.max(1))
        .try_collect()
        .await?;
    let urls: BTreeMap<String, String> = uploaded.into_iter().collect();

    let manifest = tokio::fs::read_to_string(dir.join(manifest_name)).await?;
    let rewritten = rewrite_manifest(&manifest, &urls);

    let kind = OutputFileKind::Manifest;
    let manifest_url = store
        .upload(
            Bytes::from(rewritten),
            &batch.remote_name(manifest_name),
            kind.content_type(),
            kind.media_type(),
        )
        .await?;

    tracing::info!(url = %manifest_url, "HLS URL: {}", manifest_url);
    Ok(PublishedHls { manifest_url, urls })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingStore {
        uploads: Mutex<Vec<(String, String, String, Vec<u8>)>>,
        fail_on: Option<String>,
    }

    #[async_trait::async_trait]
    impl MediaStore for RecordingStore {
        async fn upload(
            &self,
            data: Bytes,
            filename: &str,
            content_type: &str,
            media_type: &str,
        ) -> Result<String> {
            if self.fail_on.as_deref().is_some_and(|f| filename.ends_with(f)) {
                return Err(Error::upload(
                    filename,
                    crate::error::UploadError::Transfer {
                        status: 500,
                        body: "boom".into(),
                    },
                ));
            }
            self.uploads.lock().push((
                filename.to_string(),
                content_type.to_string(),
                media_type.to_string(),
                data.to_vec(),
            ));
            Ok(format!("https://cdn.test/{}", filename))
        }
    }

    fn hls_dir(segments: usize) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("fileSequence0.mp4"), b"init").unwrap();
        let mut manifest = String::from("#EXTM3U\n#EXT-X-MAP:URI=\"fileSequence0.mp4\"\n\n");
        for i in 1..=segments {
            std::fs::write(dir.path().join(format!("fileSequence{}.m4s", i)), b"seg").unwrap();
            manifest.push_str(&format!("#EXTINF:6.00000,\nfileSequence{}.m4s\n", i));
        }
        manifest.push_str("#EXT-X-ENDLIST\n");
        std::fs::write(dir.path().join("master.m3u8"), manifest).unwrap();
        dir
    }

    #[test]
    fn test_rewrite_prefers_longest_name() {
        let urls: BTreeMap<String, String> = [
            ("fileSequence1.m4s", "https://cdn/a"),
            ("fileSequence10.m4s", "https://cdn/b"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let rewritten = rewrite_manifest("fileSequence1.m4s\nfileSequence10.m4s\n", &urls);

        assert_eq!(rewritten, "https://cdn/a\nhttps://cdn/b\n");
    }

    #[test]
    fn test_rewrite_does_not_rescan_urls() {
        let urls: BTreeMap<String, String> = [
            ("a.m4s", "https://cdn/b.m4s"),
            ("b.m4s", "https://cdn/c.m4s"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        assert_eq!(rewrite_manifest("a.m4s b.m4s", &urls), "https://cdn/b.m4s https://cdn/c.m4s");
    }

    #[tokio::test]
    async fn test_publish_uploads_segments_then_manifest() {
        let dir = hls_dir(11);
        let store = RecordingStore::default();

        let published = publish_hls(&store, dir.path(), "master.m3u8", BatchId::dry_run(), 4)
            .await
            .unwrap();

        assert_eq!(published.manifest_url, "https://cdn.test/dry-run-master.m3u8");
        assert_eq!(published.urls.len(), 12);

        let uploads = store.uploads.lock();
        let (name, content_type, media_type, body) = uploads.last().unwrap();
        assert_eq!(name, "dry-run-master.m3u8");
        assert_eq!(content_type, "application/x-mpegURL");
        assert_eq!(media_type, "hls");

        let manifest = String::from_utf8(body.clone()).unwrap();
        assert!(manifest.contains("URI=\"https://cdn.test/dry-run-fileSequence0.mp4\""));
        assert!(manifest.contains("\nhttps://cdn.test/dry-run-fileSequence10.m4s\n"));
        assert!(manifest.contains("\nhttps://cdn.test/dry-run-fileSequence1.m4s\n"));
        assert!(!manifest.contains("\nfileSequence"));

        let init = uploads.iter().find(|u| u.0.ends_with(".mp4")).unwrap();
        assert_eq!((init.1.as_str(), init.2.as_str()), ("video/mp4", "video"));
        let segment = uploads.iter().find(|u| u.0.ends_with(".m4s")).unwrap();
        assert_eq!((segment.1.as_str(), segment.2.as_str()), ("video/iso.segment", "m4s"));
    }

    #[tokio::test]
    async fn test_publish_stops_on_failed_segment() {
        let dir = hls_dir(3);
        let store = RecordingStore {
            fail_on: Some("fileSequence2.m4s".into()),
            ..Default::default()
        };

        let result = publish_hls(&store, dir.path(), "master.m3u8", BatchId::new(), 1).await;

        assert!(matches!(result, Err(Error::UploadFailed { .. })));
        assert!(store
            .uploads
            .lock()
            .iter()
            .all(|(name, ..)| !name.ends_with("master.m3u8")));
    }

    #[tokio::test]
    async fn test_dry_run_store_urls() {
        let store = DryRunStore::new("https://cdn.example.com/");
        let url = store
            .upload(Bytes::from_static(b"x"), "dry-run-master.m3u8", "application/x-mpegURL", "hls")
            .await
            .unwrap();
        assert_eq!(url, "https://cdn.example.com/dry-run/dry-run-master.m3u8");
    }
}
