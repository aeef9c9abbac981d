//! Fetching conversion sources.

use crate::{Error, Result};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;

/// A source ready for conversion. Downloaded copies are deleted on drop.
#[derive(Debug)]
pub enum LocalSource {
    /// A file the user pointed at directly.
    InPlace(PathBuf),
    /// A temporary copy of a remote source.
    Downloaded(TempPath),
}

impl LocalSource {
    pub fn path(&self) -> &Path {
        match self {
            Self::InPlace(path) => path,
            Self::Downloaded(path) => path,
        }
    }
}

/// Whether a source string names a remote resource.
pub fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Fetches conversion sources.
///
/// Downloads have no overall deadline. A transfer fails when the server
/// sends nothing for `stall_timeout`, either before the response headers or
/// between body chunks.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
    stall_timeout: Duration,
}

impl Downloader {
    pub fn new(client: reqwest::Client, stall_timeout: Duration) -> Self {
        Self {
            client,
            stall_timeout,
        }
    }

    /// Downloader with its own client, limited only by a connect timeout.
    pub fn with_timeouts(connect: Duration, stall: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect)
            .build()
            .map_err(|e| Error::Config(format!("download client: {}", e)))?;
        Ok(Self::new(client, stall))
    }

    /// Resolve a source to a local file, downloading remote URLs to a
    /// temporary `.mp4`.
    pub async fn fetch(&self, source: &str) -> Result<LocalSource> {
        if !is_remote(source) {
            let path = PathBuf::from(shellexpand::tilde(source).as_ref());
            if !path.exists() {
                return Err(Error::DownloadFailed {
                    url: source.to_string(),
                    reason: "file does not exist".to_string(),
                });
            }
            return Ok(LocalSource::InPlace(path));
        }

        let failed = |reason: String| Error::DownloadFailed {
            url: source.to_string(),
            reason,
        };
        let stalled = || failed(format!("no data for {:?}", self.stall_timeout));

        let name = reqwest::Url::parse(source)
            .ok()
            .and_then(|url| url.path_segments()?.last().map(str::to_string))
            .unwrap_or_else(|| source.to_string());
        tracing::info!(url = source, "Downloading {}", name);

        let response = timeout(self.stall_timeout, self.client.get(source).send())
            .await
            .map_err(|_| stalled())?
            .map_err(|e| failed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(failed(format!("HTTP {}", response.status().as_u16())));
        }

        let temp = tempfile::Builder::new()
            .prefix("hlsforge-")
            .suffix(".mp4")
            .tempfile()?
            .into_temp_path();
        let mut file = tokio::fs::File::create(&temp).await?;

        let mut written = 0u64;
        let mut body = response.bytes_stream();
        loop {
            let chunk = match timeout(self.stall_timeout, body.next()).await {
                Err(_) => return Err(stalled()),
                Ok(None) => break,
                Ok(Some(chunk)) => chunk.map_err(|e| failed(e.to_string()))?,
            };
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        tracing::info!(url = source, bytes = written, "Download complete: {} MB", written / 1024 / 1024);
        Ok(LocalSource::Downloaded(temp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_is_remote() {
        assert!(is_remote("https://cdn.example.com/a.mp4"));
        assert!(is_remote("http://cdn.example.com/a.mp4"));
        assert!(!is_remote("/videos/a.mp4"));
        assert!(!is_remote("httpfile.mp4"));
    }

    #[tokio::test]
    async fn test_local_sources_are_used_in_place() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let downloader = Downloader::new(reqwest::Client::new(), Duration::from_secs(5));

        let source = downloader
            .fetch(file.path().to_str().unwrap())
            .await
            .unwrap();

        assert_matches!(source, LocalSource::InPlace(_));
        assert_eq!(source.path(), file.path());
    }

    #[tokio::test]
    async fn test_missing_local_source() {
        let downloader = Downloader::new(reqwest::Client::new(), Duration::from_secs(5));
        let result = downloader.fetch("/nonexistent/clip.mp4").await;
        assert_matches!(result, Err(Error::DownloadFailed { .. }));
    }
}
