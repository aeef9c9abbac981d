use crate::engine::Configuration;
use hlsforge_media::MediaTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub upload: UploadConfig,

    #[serde(default)]
    pub conversion: ConversionConfig,

    /// Where page backups are written (default: ~/.hlsforge/backups)
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,

    #[serde(default)]
    pub sites: Vec<SiteConfig>,
}

impl Config {
    pub fn backup_dir(&self) -> PathBuf {
        let dir = self
            .backup_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(default_backup_dir()));
        PathBuf::from(shellexpand::tilde(&dir.to_string_lossy()).as_ref())
    }

    pub fn site(&self, host: &str) -> Option<&SiteConfig> {
        self.sites.iter().find(|s| s.host.eq_ignore_ascii_case(host))
    }
}

fn default_backup_dir() -> &'static str {
    "~/.hlsforge/backups"
}

/// Website document API.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub base_url: String,

    /// Master key sent with every request (or HLSFORGE_MASTER_KEY)
    #[serde(default)]
    pub master_key: String,

    #[serde(default = "default_master_key_header")]
    pub master_key_header: String,

    #[serde(default = "default_api_timeout")]
    pub timeout_secs: u64,
}

fn default_master_key_header() -> String {
    "jws_master_key".to_string()
}
fn default_api_timeout() -> u64 {
    30
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            master_key: String::new(),
            master_key_header: default_master_key_header(),
            timeout_secs: default_api_timeout(),
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Presigned upload service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadConfig {
    #[serde(default)]
    pub base_url: String,

    /// Origin header the presigned URLs are signed for
    #[serde(default)]
    pub origin: Option<String>,

    /// Concurrent segment uploads per conversion
    #[serde(default = "default_upload_concurrency")]
    pub concurrency: usize,

    /// Base of the placeholder URLs returned in dry-run mode
    #[serde(default = "default_dry_run_base_url")]
    pub dry_run_base_url: String,

    #[serde(default = "default_upload_timeout")]
    pub timeout_secs: u64,
}

fn default_upload_concurrency() -> usize {
    4
}
fn default_dry_run_base_url() -> String {
    "https://cdn.invalid".to_string()
}
fn default_upload_timeout() -> u64 {
    120
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            origin: None,
            concurrency: default_upload_concurrency(),
            dry_run_base_url: default_dry_run_base_url(),
            timeout_secs: default_upload_timeout(),
        }
    }
}

impl UploadConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConversionConfig {
    /// Target segment length in seconds
    #[serde(default = "default_segment_duration")]
    pub segment_duration: u32,

    /// Offset added to every timestamp, in seconds
    #[serde(default = "default_start_offset")]
    pub start_time_offset_secs: u32,

    #[serde(default = "default_segment_prefix")]
    pub segment_file_prefix: String,

    #[serde(default = "default_index_name")]
    pub index_file_name: String,

    /// Parent of the per-source temporary output directories
    #[serde(default)]
    pub work_dir: Option<PathBuf>,

    /// Connect timeout for source downloads, in seconds
    #[serde(default = "default_download_connect_timeout")]
    pub download_connect_timeout_secs: u64,

    /// A source download fails after this many seconds without data
    #[serde(default = "default_download_stall_timeout")]
    pub download_stall_timeout_secs: u64,
}

fn default_segment_duration() -> u32 {
    6
}
fn default_start_offset() -> u32 {
    10
}
fn default_segment_prefix() -> String {
    "fileSequence".to_string()
}
fn default_index_name() -> String {
    "master.m3u8".to_string()
}
fn default_download_connect_timeout() -> u64 {
    30
}
fn default_download_stall_timeout() -> u64 {
    60
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            segment_duration: default_segment_duration(),
            start_time_offset_secs: default_start_offset(),
            segment_file_prefix: default_segment_prefix(),
            index_file_name: default_index_name(),
            work_dir: None,
            download_connect_timeout_secs: default_download_connect_timeout(),
            download_stall_timeout_secs: default_download_stall_timeout(),
        }
    }
}

impl ConversionConfig {
    pub fn download_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.download_connect_timeout_secs)
    }

    pub fn download_stall_timeout(&self) -> Duration {
        Duration::from_secs(self.download_stall_timeout_secs)
    }

    /// Engine parameters for one source.
    pub fn engine_config(&self, input: &Path, output_dir: &Path) -> Configuration {
        let mut config = Configuration::new(input, output_dir);
        config.segment_duration = self.segment_duration;
        config.start_time_offset = MediaTime::from_secs(i64::from(self.start_time_offset_secs));
        config.segment_file_prefix = self.segment_file_prefix.clone();
        config.index_file_name = self.index_file_name.clone();
        config
    }
}

/// A website whose pages are migrated.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SiteConfig {
    pub host: String,

    /// Website id in the document API
    pub id: String,

    /// Video URLs to convert on this site
    #[serde(default)]
    pub sources: Vec<String>,
}
