//! Convert one source and publish it.

use crate::config::{Config, ConversionConfig};
use crate::download::Downloader;
use crate::engine::HlsEngine;
use crate::orchestrator::SourceConverter;
use crate::upload::{publish_hls, DryRunStore, HttpMediaStore, MediaStore, PublishedHls};
use crate::{Error, Result};
use hlsforge_common::BatchId;
use hlsforge_media::Mp4Framework;
use std::sync::Arc;

/// Download, segment, and upload a source; the playlist URL is the result.
pub struct HlsConverter {
    downloader: Downloader,
    engine: HlsEngine,
    store: Arc<dyn MediaStore>,
    config: ConversionConfig,
    concurrency: usize,
    dry_run: bool,
}

impl HlsConverter {
    pub fn new(
        downloader: Downloader,
        engine: HlsEngine,
        store: Arc<dyn MediaStore>,
        config: ConversionConfig,
        concurrency: usize,
    ) -> Self {
        Self {
            downloader,
            engine,
            store,
            config,
            concurrency,
            dry_run: false,
        }
    }

    /// Converter wired the way the configuration asks: the MP4 framework,
    /// and either the upload service or a dry-run store. Downloads use
    /// their own client, so the upload timeout never caps a source transfer.
    pub fn from_config(config: &Config, dry_run: bool) -> Result<Self> {
        let downloader = Downloader::with_timeouts(
            config.conversion.download_connect_timeout(),
            config.conversion.download_stall_timeout(),
        )?;
        let upload_http = reqwest::Client::builder()
            .timeout(config.upload.timeout())
            .build()
            .map_err(|e| Error::Config(format!("HTTP client: {}", e)))?;

        let store: Arc<dyn MediaStore> = if dry_run {
            Arc::new(DryRunStore::new(&config.upload.dry_run_base_url))
        } else {
            if config.upload.base_url.is_empty() {
                return Err(Error::Config("upload.base_url is not set".to_string()));
            }
            Arc::new(HttpMediaStore::new(
                upload_http,
                &config.upload.base_url,
                config.upload.origin.clone(),
            ))
        };

        let engine = HlsEngine::new(Arc::new(Mp4Framework::new()));
        Ok(Self::new(
            downloader,
            engine,
            store,
            config.conversion.clone(),
            config.upload.concurrency,
        )
        .dry_run(dry_run))
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub async fn convert(&self, source: &str) -> Result<PublishedHls> {
        let local = self.downloader.fetch(source).await?;

        let mut builder = tempfile::Builder::new();
        builder.prefix("hlsforge-hls-");
        let work = match &self.config.work_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                builder.tempdir_in(dir)?
            }
            None => builder.tempdir()?,
        };

        let engine_config = self.config.engine_config(local.path(), work.path());
        let output = self.engine.convert(&engine_config).await?;
        tracing::info!(
            source = %source,
            segments = output.segment_files.len(),
            "Conversion complete"
        );

        let batch = if self.dry_run {
            BatchId::dry_run()
        } else {
            BatchId::new()
        };
        let published = publish_hls(
            self.store.as_ref(),
            work.path(),
            &engine_config.index_file_name,
            batch,
            self.concurrency,
        )
        .await?;

        if let Err(e) = work.close() {
            tracing::warn!(error = %e, "Failed to remove work directory");
        }
        Ok(published)
    }
}

#[async_trait::async_trait]
impl SourceConverter for HlsConverter {
    async fn convert_and_upload(&self, source: &str) -> Result<String> {
        Ok(self.convert(source).await?.manifest_url)
    }
}
