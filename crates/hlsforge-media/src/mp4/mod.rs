//! Progressive MP4 parsing.
//!
//! Only the moov box is interpreted. Sample bytes stay in the file and are
//! read on demand through the resolved [`SampleEntry`] offsets.

mod atoms;
mod reader;
mod sample_table;

pub use atoms::{Atom, AtomType, HandlerType, TrackInfo};
pub use reader::Mp4Reader;
pub use sample_table::{SampleEntry, SampleTable, SampleTableBuilder};

use crate::Result;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

/// Parsed MP4 file with extracted sample tables.
#[derive(Debug)]
pub struct Mp4File {
    /// Duration in movie timescale units.
    pub duration: u64,
    /// Movie timescale (time units per second).
    pub timescale: u32,
    /// Every track with a recognised handler, in file order.
    pub tracks: Vec<TrackInfo>,
    /// Whether the file has faststart (moov before mdat).
    pub has_faststart: bool,
}

impl Mp4File {
    /// Parse an MP4 file from the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        Self::parse(&mut reader)
    }

    /// Parse an MP4 file from a reader.
    pub fn parse<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        let mut mp4_reader = Mp4Reader::new(reader);
        mp4_reader.parse()
    }

    /// Get the duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.timescale == 0 {
            0.0
        } else {
            self.duration as f64 / self.timescale as f64
        }
    }

    /// First video track in file order.
    pub fn video_track(&self) -> Option<&TrackInfo> {
        self.tracks.iter().find(|t| t.handler_type.is_video())
    }

    /// First audio track in file order.
    pub fn audio_track(&self) -> Option<&TrackInfo> {
        self.tracks.iter().find(|t| t.handler_type.is_audio())
    }

    /// Look up a track by its id.
    pub fn track(&self, track_id: u32) -> Option<&TrackInfo> {
        self.tracks.iter().find(|t| t.track_id == track_id)
    }
}
