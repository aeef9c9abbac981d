//! Per-track sample transfer from reader to writer.

use super::assembler::SegmentEmitter;
use crate::{Error, Result};
use hlsforge_media::{AssetReader, AssetWriter, MediaTime, TrackInput, TrackOutput, WriterStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long a loop sleeps while its writer input reports not ready.
pub const BACKPRESSURE_POLL: Duration = Duration::from_millis(5);

/// Everything both transfer loops of one conversion share.
#[derive(Clone)]
pub struct TransferContext {
    pub reader: Arc<dyn AssetReader>,
    pub writer: Arc<dyn AssetWriter>,
    pub emitter: SegmentEmitter,
    pub offset: MediaTime,
    pub cancel: CancellationToken,
}

fn check_writer(writer: &dyn AssetWriter) -> Result<()> {
    match writer.status() {
        WriterStatus::Failed => Err(Error::encode_failed(
            writer.error().unwrap_or_else(|| "writer failed".to_string()),
        )),
        WriterStatus::Cancelled => Err(Error::Cancelled),
        _ => Ok(()),
    }
}

/// Upper bound on samples moved per blocking batch, so cancellation and
/// writer failures are noticed promptly.
const BATCH_SAMPLES: u64 = 64;

enum Batch {
    Moved(u64),
    Exhausted(u64),
}

/// Read and append samples while the input accepts them. Runs on the
/// blocking pool: reads seek and read the source file.
fn move_batch(
    output: &mut dyn TrackOutput,
    input: &dyn TrackInput,
    offset: MediaTime,
    cancel: &CancellationToken,
) -> Result<Batch> {
    let kind = input.kind();
    let mut moved = 0u64;
    while moved < BATCH_SAMPLES && input.is_ready_for_more_media_data() && !cancel.is_cancelled() {
        let Some(sample) = output.copy_next_sample()? else {
            return Ok(Batch::Exhausted(moved));
        };
        input
            .append(sample.offset_by(offset))
            .map_err(|e| Error::encode_failed(format!("{} sample rejected: {}", kind, e)))?;
        moved += 1;
    }
    Ok(Batch::Moved(moved))
}

/// Move every sample of one track, shifted by `offset`. Returns the
/// number of samples moved.
pub async fn transfer_track(
    mut output: Box<dyn TrackOutput>,
    input: Arc<dyn TrackInput>,
    writer: &dyn AssetWriter,
    offset: MediaTime,
    cancel: &CancellationToken,
) -> Result<u64> {
    let kind = input.kind();
    let mut moved = 0u64;

    loop {
        check_writer(writer)?;
        while !input.is_ready_for_more_media_data() {
            check_writer(writer)?;
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(BACKPRESSURE_POLL) => {}
            }
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let batch_input = Arc::clone(&input);
        let batch_cancel = cancel.clone();
        let (returned, batch) = tokio::task::spawn_blocking(move || {
            let batch = move_batch(output.as_mut(), batch_input.as_ref(), offset, &batch_cancel);
            (output, batch)
        })
        .await
        .map_err(|e| Error::encode_failed(format!("{} transfer task failed: {}", kind, e)))?;
        output = returned;

        match batch? {
            Batch::Moved(n) => moved += n,
            Batch::Exhausted(n) => {
                moved += n;
                input.mark_as_finished();
                tracing::debug!(track = %kind, samples = moved, "Track exhausted");
                return Ok(moved);
            }
        }
    }
}

/// Run one track's loop as its own task. The first loop to fail cancels
/// its sibling, the reader and the writer, and terminates the segment
/// stream.
pub fn spawn_transfer(
    ctx: TransferContext,
    output: Box<dyn TrackOutput>,
    input: Arc<dyn TrackInput>,
) -> JoinHandle<Result<u64>> {
    tokio::spawn(async move {
        let kind = input.kind();
        let result = transfer_track(output, input, ctx.writer.as_ref(), ctx.offset, &ctx.cancel).await;

        if let Err(e) = &result {
            if !ctx.cancel.is_cancelled() {
                tracing::warn!(track = %kind, error = %e, "Track transfer failed");
                ctx.cancel.cancel();
                ctx.reader.cancel_reading();
                ctx.writer.cancel_writing();
                ctx.emitter.fail(e.to_string());
            }
        }
        result
    })
}
