//! Page backups taken before a bulk rewrite.
//!
//! A backup holds the store's response bytes for every page a run is
//! about to touch. It is written once, atomically, before the first
//! mutation and never modified afterwards.

use crate::{Error, Result};
use base64::Engine as _;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hlsforge_common::PageId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

const FILE_PREFIX: &str = "backup-";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%SZ";

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Verbatim snapshot of one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageBackup {
    #[serde(rename = "pageID")]
    pub page_id: PageId,
    pub page_title: String,
    #[serde(with = "base64_bytes")]
    pub original_data: Bytes,
    /// SHA-256 of `original_data`, hex encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl PageBackup {
    pub fn new(page_id: PageId, page_title: impl Into<String>, original_data: Bytes) -> Self {
        let checksum = Some(sha256_hex(&original_data));
        Self {
            page_id,
            page_title: page_title.into(),
            original_data,
            checksum,
        }
    }

    /// Whether the snapshot still matches its recorded checksum. Snapshots
    /// without one are accepted.
    pub fn verify(&self) -> bool {
        self.checksum
            .as_deref()
            .map_or(true, |expected| expected.eq_ignore_ascii_case(&sha256_hex(&self.original_data)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupManifest {
    pub timestamp: DateTime<Utc>,
    pub website_host: String,
    #[serde(rename = "websiteID")]
    pub website_id: String,
    pub pages: Vec<PageBackup>,
    #[serde(default)]
    pub url_mapping: BTreeMap<String, String>,
}

impl BackupManifest {
    pub fn new(website_host: impl Into<String>, website_id: impl Into<String>, pages: Vec<PageBackup>) -> Self {
        Self {
            timestamp: Utc::now(),
            website_host: website_host.into(),
            website_id: website_id.into(),
            pages,
            url_mapping: BTreeMap::new(),
        }
    }

    /// `backup-{host}-{timestamp}.json` with a filesystem-safe timestamp.
    pub fn file_name(&self) -> String {
        format!(
            "{}{}-{}.json",
            FILE_PREFIX,
            self.website_host,
            self.timestamp.format(TIMESTAMP_FORMAT)
        )
    }
}

/// A backup file found on disk.
#[derive(Debug, Clone)]
pub struct BackupEntry {
    pub path: PathBuf,
    pub manifest: BackupManifest,
}

/// Directory of backup files.
#[derive(Debug, Clone)]
pub struct BackupStore {
    dir: PathBuf,
}

impl BackupStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist a manifest. The file appears complete or not at all.
    pub fn create(&self, manifest: &BackupManifest) -> Result<PathBuf> {
        let path = self.dir.join(manifest.file_name());
        let persist_failed = |reason: String| Error::BackupPersistFailed {
            path: path.clone(),
            reason,
        };

        std::fs::create_dir_all(&self.dir).map_err(|e| persist_failed(e.to_string()))?;
        let json = serde_json::to_vec_pretty(manifest).map_err(|e| persist_failed(e.to_string()))?;

        let mut temp = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|e| persist_failed(e.to_string()))?;
        temp.write_all(&json)
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|e| persist_failed(e.to_string()))?;
        temp.persist_noclobber(&path)
            .map_err(|e| persist_failed(e.error.to_string()))?;

        tracing::info!(
            path = %path.display(),
            pages = manifest.pages.len(),
            "Backup created"
        );
        Ok(path)
    }

    /// [`BackupStore::create`] on the blocking pool.
    pub async fn create_async(&self, manifest: BackupManifest) -> Result<PathBuf> {
        let store = self.clone();
        let path = self.dir.join(manifest.file_name());
        tokio::task::spawn_blocking(move || store.create(&manifest))
            .await
            .map_err(|e| Error::BackupPersistFailed {
                path,
                reason: e.to_string(),
            })?
    }

    /// Every readable backup, newest first.
    pub fn list(&self) -> Result<Vec<BackupEntry>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut backups = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_backup = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(FILE_PREFIX) && n.ends_with(".json"));
            if !is_backup {
                continue;
            }
            match Self::read(&path) {
                Ok(manifest) => backups.push(BackupEntry { path, manifest }),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable backup"),
            }
        }

        backups.sort_by(|a, b| {
            b.manifest
                .timestamp
                .cmp(&a.manifest.timestamp)
                .then_with(|| b.path.cmp(&a.path))
        });
        Ok(backups)
    }

    /// Bare names live in the backup directory; anything else is a path.
    pub fn resolve(&self, name: &str) -> PathBuf {
        let expanded = PathBuf::from(shellexpand::tilde(name).as_ref());
        if expanded.is_absolute() || expanded.components().count() > 1 {
            expanded
        } else {
            self.dir.join(expanded)
        }
    }

    /// Load and verify a backup.
    pub fn load(&self, path: &Path) -> Result<BackupManifest> {
        if !path.is_file() {
            return Err(Error::BackupNotFound(path.to_path_buf()));
        }
        let manifest = Self::read(path)?;
        if let Some(page) = manifest.pages.iter().find(|p| !p.verify()) {
            return Err(Error::InvalidDocument {
                id: page.page_id.to_string(),
                reason: format!("backup snapshot in {} fails its checksum", path.display()),
            });
        }
        Ok(manifest)
    }

    fn read(path: &Path) -> Result<BackupManifest> {
        let data = std::fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }
}
