//! Pass-through media framework over progressive MP4 sources.
//!
//! Samples are copied as-is from the source sample table into fMP4
//! fragments; nothing is decoded or re-encoded. Sources must therefore
//! already carry HLS-compatible codecs (H.264/HEVC video, AAC audio).

mod reader;
mod writer;

pub use reader::Mp4AssetReader;
pub use writer::FragmentWriter;

use crate::framework::{
    AssetReader, AssetWriter, MediaFramework, MediaKind, MediaTime, SegmentDelegate,
    TrackDescription, WriterSettings,
};
use crate::mp4::{HandlerType, Mp4File, TrackInfo};
use crate::Result;
use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;

/// [`MediaFramework`] that remuxes MP4 files into HLS fMP4 segments.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mp4Framework;

impl Mp4Framework {
    pub fn new() -> Self {
        Self
    }
}

fn describe(track: &TrackInfo) -> Option<TrackDescription> {
    let kind = match track.handler_type {
        HandlerType::Video => MediaKind::Video,
        HandlerType::Audio => MediaKind::Audio,
        HandlerType::Unknown(_) => return None,
    };
    Some(TrackDescription {
        track_id: track.track_id,
        kind,
        codec: track
            .codec
            .map(|cc| String::from_utf8_lossy(&cc).into_owned()),
        timescale: track.timescale,
        duration: MediaTime::new(track.duration as i64, track.timescale),
        width: track.width,
        height: track.height,
        channels: track.channels,
        sample_rate: track.sample_rate,
        codec_config: track.codec_data.clone().map(Bytes::from),
    })
}

impl MediaFramework for Mp4Framework {
    fn load_tracks(&self, input: &Path) -> Result<Vec<TrackDescription>> {
        let mp4 = Mp4File::open(input)?;
        tracing::debug!(
            path = %input.display(),
            tracks = mp4.tracks.len(),
            duration_secs = mp4.duration_secs(),
            faststart = mp4.has_faststart,
            "Loaded source tracks"
        );
        Ok(mp4.tracks.iter().filter_map(describe).collect())
    }

    fn create_reader(&self, input: &Path) -> Result<Arc<dyn AssetReader>> {
        Ok(Arc::new(Mp4AssetReader::open(input)?))
    }

    fn create_writer(
        &self,
        settings: WriterSettings,
        delegate: Arc<dyn SegmentDelegate>,
    ) -> Result<Arc<dyn AssetWriter>> {
        Ok(Arc::new(FragmentWriter::new(settings, delegate)))
    }
}
