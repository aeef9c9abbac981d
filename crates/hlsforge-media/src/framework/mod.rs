//! The media framework contract.
//!
//! A framework opens a source, hands out one pull-style [`TrackOutput`] per
//! track, and accepts samples through one push-style [`TrackInput`] per
//! track on a segmenting [`AssetWriter`]. The writer reports each finished
//! segment to a [`SegmentDelegate`] in the order it finalized them.
//!
//! All methods are synchronous. Inputs expose readiness instead of
//! blocking, so callers decide how to wait.

mod segment;
mod time;

pub use segment::{Segment, SegmentKind, SegmentReport, TrackReport};
pub use time::MediaTime;

use crate::Result;
use bytes::Bytes;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Media type of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Audio,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
        }
    }
}

/// Static description of a source track.
#[derive(Debug, Clone)]
pub struct TrackDescription {
    pub track_id: u32,
    pub kind: MediaKind,
    /// Sample entry four-cc. `None` means the track has no format description.
    pub codec: Option<String>,
    pub timescale: u32,
    pub duration: MediaTime,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub channels: Option<u16>,
    pub sample_rate: Option<u32>,
    /// Decoder configuration record (avcC, hvcC or esds payload).
    pub codec_config: Option<Bytes>,
}

impl TrackDescription {
    /// Codec four-cc for diagnostics, `"????"` when unknown.
    pub fn codec_tag(&self) -> &str {
        self.codec.as_deref().unwrap_or("????")
    }
}

/// One encoded access unit with its timing.
#[derive(Debug, Clone)]
pub struct Sample {
    pub data: Bytes,
    pub pts: MediaTime,
    /// `None` when the source does not define a decode time.
    pub dts: Option<MediaTime>,
    pub duration: MediaTime,
    pub is_sync: bool,
}

impl Sample {
    /// Shift the sample along the timeline. The presentation time always
    /// moves; the decode time only when it is defined.
    pub fn offset_by(mut self, offset: MediaTime) -> Self {
        self.pts = self.pts + offset;
        self.dts = self.dts.map(|dts| dts + offset);
        self
    }

    /// Decode time, falling back to presentation time.
    pub fn decode_time(&self) -> MediaTime {
        self.dts.unwrap_or(self.pts)
    }
}

/// Writer lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterStatus {
    Unknown,
    Writing,
    Completed,
    Failed,
    Cancelled,
}

/// Output parameters for a segmenting writer.
#[derive(Debug, Clone)]
pub struct WriterSettings {
    /// Target media segment length.
    pub segment_duration: MediaTime,
    /// Timeline position of the first segment; sample timing is expected to
    /// have been shifted by the same amount.
    pub initial_segment_start: MediaTime,
}

/// Receives finished segments, in finalization order.
pub trait SegmentDelegate: Send + Sync {
    fn did_output_segment(&self, data: Bytes, kind: SegmentKind, report: Option<SegmentReport>);
}

/// Pull-side of one source track.
pub trait TrackOutput: Send {
    fn track(&self) -> &TrackDescription;

    /// Next sample in decode order, `None` once the track is exhausted.
    fn copy_next_sample(&mut self) -> Result<Option<Sample>>;
}

/// Source reader. Outputs must be added before reading starts.
pub trait AssetReader: Send + Sync {
    fn add_output(&self, track: &TrackDescription) -> Result<Box<dyn TrackOutput>>;
    fn start_reading(&self) -> Result<()>;
    /// Makes every output fail with [`crate::Error::Cancelled`].
    fn cancel_reading(&self);
}

/// Push-side of one output track.
pub trait TrackInput: Send + Sync {
    fn kind(&self) -> MediaKind;
    /// `false` while the writer wants the other track to catch up.
    fn is_ready_for_more_media_data(&self) -> bool;
    fn append(&self, sample: Sample) -> Result<()>;
    fn mark_as_finished(&self);
}

/// Segmenting writer. Inputs must be added before writing starts.
pub trait AssetWriter: Send + Sync {
    fn add_input(&self, track: &TrackDescription) -> Result<Arc<dyn TrackInput>>;
    fn start_writing(&self) -> Result<()>;
    fn start_session(&self, at: MediaTime);
    fn status(&self) -> WriterStatus;
    /// Reason for a `Failed` status.
    fn error(&self) -> Option<String>;
    /// Flush the remaining samples as the final segment. Every segment has
    /// been delivered to the delegate when this returns `Ok`.
    fn finish_writing(&self) -> Result<()>;
    fn cancel_writing(&self);
}

/// Factory for readers and writers over one kind of source.
pub trait MediaFramework: Send + Sync {
    fn load_tracks(&self, input: &Path) -> Result<Vec<TrackDescription>>;
    fn create_reader(&self, input: &Path) -> Result<Arc<dyn AssetReader>>;
    fn create_writer(
        &self,
        settings: WriterSettings,
        delegate: Arc<dyn SegmentDelegate>,
    ) -> Result<Arc<dyn AssetWriter>>;
}
