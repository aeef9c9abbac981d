//! Finished HLS segments as produced by a segmenting writer.

use super::{MediaKind, MediaTime};
use bytes::Bytes;

/// Whether a segment carries codec setup or media samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// ftyp + moov, referenced by `#EXT-X-MAP`.
    Initialization,
    /// moof + mdat fragment.
    Media,
}

impl SegmentKind {
    /// File extension used when the segment is written to disk.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Initialization => "mp4",
            Self::Media => "m4s",
        }
    }
}

/// Timing of one track inside a media segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackReport {
    pub kind: MediaKind,
    pub earliest_presentation_time: MediaTime,
    pub duration: MediaTime,
}

/// Per-track timing attached to a media segment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmentReport {
    pub track_reports: Vec<TrackReport>,
}

impl SegmentReport {
    /// The first report for `kind`, if that track contributed samples.
    pub fn track(&self, kind: MediaKind) -> Option<&TrackReport> {
        self.track_reports.iter().find(|r| r.kind == kind)
    }
}

/// One finished output segment with its position in the stream.
#[derive(Debug, Clone)]
pub struct Segment {
    /// Zero-based position in production order.
    pub index: u32,
    pub data: Bytes,
    pub kind: SegmentKind,
    /// Absent for initialization segments.
    pub report: Option<SegmentReport>,
}

impl Segment {
    pub fn is_initialization(&self) -> bool {
        self.kind == SegmentKind::Initialization
    }

    /// `<prefix><index>.mp4` for init segments, `<prefix><index>.m4s` otherwise.
    pub fn file_name(&self, prefix: &str) -> String {
        format!("{}{}.{}", prefix, self.index, self.kind.extension())
    }
}
