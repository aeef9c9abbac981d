//! Hlsforge-Media: MP4 demuxing, fMP4 segmentation, and HLS manifests
//!
//! This crate holds everything that touches container bytes. The async
//! conversion engine in the `hlsforge` crate only sees the traits in
//! [`framework`]; this crate ships one implementation of them.
//!
//! # Modules
//!
//! - `mp4` - Progressive MP4 parsing (moov, sample tables, avcC/esds)
//! - `fmp4` - Fragmented MP4 serialization (init segment, multi-track moof/mdat)
//! - `framework` - The media framework contract: timing, samples, readers, writers
//! - `remux` - [`Mp4Framework`], a pass-through framework that re-packages
//!   progressive MP4 samples into HLS fMP4 segments without transcoding
//! - `hls` - Incremental media playlist (m3u8) generation
//!
//! # Segmentation
//!
//! The writer cuts a new media segment at the first video sync sample whose
//! presentation time reaches the segment start plus the target duration.
//! Audio samples that start before the cut point travel in the same
//! fragment. Every finished segment is pushed to a [`SegmentDelegate`] in
//! the order it was finalized.

pub mod error;
pub mod fmp4;
pub mod framework;
pub mod hls;
pub mod mp4;
pub mod remux;

pub use error::{Error, Result};
pub use framework::{
    AssetReader, AssetWriter, MediaFramework, MediaKind, MediaTime, Sample, Segment, SegmentDelegate,
    SegmentKind, SegmentReport, TrackDescription, TrackInput, TrackOutput, TrackReport,
    WriterSettings, WriterStatus,
};
pub use hls::{build_manifest, ManifestState};
pub use mp4::Mp4File;
pub use remux::Mp4Framework;
