//! HLS conversion engine.
//!
//! A conversion probes the source, moves every track's samples into a
//! segmenting writer on concurrent tasks, collects the segments the writer
//! reports, and finally writes the segment files and the playlist. Nothing
//! is written to the output directory unless every step succeeded.

pub mod assembler;
pub mod probe;
pub mod transfer;

pub use assembler::{segment_channel, SegmentAssembler, SegmentEmitter};
pub use probe::{probe_source, SourceMedia};
pub use transfer::{spawn_transfer, transfer_track, TransferContext, BACKPRESSURE_POLL};

use crate::{Error, Result};
use hlsforge_media::{build_manifest, MediaFramework, MediaTime, Segment, WriterSettings};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

/// Parameters of one conversion.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    /// Added to every sample's timing; the first segment starts here.
    pub start_time_offset: MediaTime,
    /// Target media segment length in seconds.
    pub segment_duration: u32,
    pub segment_file_prefix: String,
    pub index_file_name: String,
}

impl Configuration {
    pub fn new(input: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output_dir: output_dir.into(),
            start_time_offset: MediaTime::from_secs(10),
            segment_duration: 6,
            segment_file_prefix: "fileSequence".to_string(),
            index_file_name: "master.m3u8".to_string(),
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.output_dir.join(&self.index_file_name)
    }
}

/// Files a finished conversion left in the output directory.
#[derive(Debug, Clone)]
pub struct ConversionOutput {
    pub manifest_path: PathBuf,
    pub segment_files: Vec<PathBuf>,
}

fn join_error(e: JoinError) -> Error {
    if e.is_cancelled() {
        Error::Cancelled
    } else {
        Error::encode_failed(format!("conversion task panicked: {}", e))
    }
}

/// Drives conversions on one [`MediaFramework`].
#[derive(Clone)]
pub struct HlsEngine {
    framework: Arc<dyn MediaFramework>,
}

impl HlsEngine {
    pub fn new(framework: Arc<dyn MediaFramework>) -> Self {
        Self { framework }
    }

    /// Convert `config.input` into an HLS directory at `config.output_dir`.
    pub async fn convert(&self, config: &Configuration) -> Result<ConversionOutput> {
        tracing::info!(input = %config.input.display(), "Loading tracks");

        let framework = Arc::clone(&self.framework);
        let input = config.input.clone();
        let source = tokio::task::spawn_blocking(move || probe_source(framework.as_ref(), &input))
            .await
            .map_err(join_error)??;

        let segments = self.generate_segments(&source, config).await?;
        let manifest = build_manifest(
            &segments,
            config.segment_duration as f64,
            &config.segment_file_prefix,
        );

        let output = write_output(config, &segments, &manifest).await?;
        tracing::info!(
            segments = segments.len(),
            output = %config.output_dir.display(),
            "Generated {} segments + playlist",
            segments.len()
        );
        Ok(output)
    }

    /// Run the transfer loops and collect every segment in index order.
    pub async fn generate_segments(
        &self,
        source: &SourceMedia,
        config: &Configuration,
    ) -> Result<Vec<Segment>> {
        let (emitter, assembler) = segment_channel();

        let reader = self.framework.create_reader(&source.input)?;
        let writer = self.framework.create_writer(
            WriterSettings {
                segment_duration: MediaTime::from_secs(config.segment_duration as i64),
                initial_segment_start: config.start_time_offset,
            },
            Arc::new(emitter.clone()),
        )?;

        let mut pairs = Vec::new();
        for track in source.tracks() {
            let output = reader
                .add_output(track)
                .map_err(|e| Error::ReaderAttachFailed(e.to_string()))?;
            let input = writer
                .add_input(track)
                .map_err(|e| Error::WriterAttachFailed(e.to_string()))?;
            pairs.push((output, input));
        }

        reader
            .start_reading()
            .map_err(|e| Error::encode_failed(format!("reader did not start: {}", e)))?;
        writer
            .start_writing()
            .map_err(|e| Error::encode_failed(format!("writer did not start: {}", e)))?;
        writer.start_session(config.start_time_offset);

        let collector = tokio::spawn(assembler.collect_all());
        let ctx = TransferContext {
            reader: Arc::clone(&reader),
            writer: Arc::clone(&writer),
            emitter: emitter.clone(),
            offset: config.start_time_offset,
            cancel: CancellationToken::new(),
        };
        let handles: Vec<_> = pairs
            .into_iter()
            .map(|(output, input)| spawn_transfer(ctx.clone(), output, input))
            .collect();

        let mut failure: Option<Error> = None;
        for result in futures::future::join_all(handles).await {
            let Err(e) = result.map_err(join_error).and_then(|r| r) else {
                continue;
            };
            // Keep the root cause rather than a sibling's cancellation.
            let replace = match &failure {
                None => true,
                Some(existing) => existing.is_cancelled() && !e.is_cancelled(),
            };
            if replace {
                failure = Some(e);
            }
        }

        if let Some(e) = failure {
            ctx.cancel.cancel();
            reader.cancel_reading();
            writer.cancel_writing();
            emitter.fail(e.to_string());
            collector.abort();
            return Err(e);
        }

        let finishing = Arc::clone(&writer);
        let finished = tokio::task::spawn_blocking(move || finishing.finish_writing())
            .await
            .map_err(join_error)?;
        if let Err(e) = finished {
            let reason = writer.error().unwrap_or_else(|| e.to_string());
            emitter.fail(reason.clone());
            collector.abort();
            return Err(Error::EncodeFailed(reason));
        }

        emitter.finish();
        collector.await.map_err(join_error)?
    }
}

async fn write_output(
    config: &Configuration,
    segments: &[Segment],
    manifest: &str,
) -> Result<ConversionOutput> {
    tokio::fs::create_dir_all(&config.output_dir).await?;

    let mut segment_files = Vec::with_capacity(segments.len());
    for segment in segments {
        let path = config
            .output_dir
            .join(segment.file_name(&config.segment_file_prefix));
        tokio::fs::write(&path, &segment.data).await?;
        segment_files.push(path);
    }

    let manifest_path = config.manifest_path();
    tokio::fs::write(&manifest_path, manifest).await?;

    Ok(ConversionOutput {
        manifest_path,
        segment_files,
    })
}
