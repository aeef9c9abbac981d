//! Path utilities for classifying files by extension.

use std::path::Path;

/// A file produced by a conversion, as the upload service sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFileKind {
    /// fMP4 initialization segment (`.mp4`).
    Init,
    /// fMP4 media segment (`.m4s`).
    Segment,
    /// HLS playlist (`.m3u8`).
    Manifest,
}

impl OutputFileKind {
    /// Classify a generated file, `None` for anything a conversion never writes.
    pub fn from_path(path: &Path) -> Option<Self> {
        match extension(path)?.as_str() {
            "mp4" => Some(Self::Init),
            "m4s" => Some(Self::Segment),
            "m3u8" => Some(Self::Manifest),
            _ => None,
        }
    }

    /// HTTP `Content-Type` for the upload.
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Init => "video/mp4",
            Self::Segment => "video/iso.segment",
            Self::Manifest => "application/x-mpegURL",
        }
    }

    /// Media type label the upload service files the object under.
    pub fn media_type(&self) -> &'static str {
        match self {
            Self::Init => "video",
            Self::Segment => "m4s",
            Self::Manifest => "hls",
        }
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Check if a path is an HLS playlist.
pub fn is_playlist_file(path: &Path) -> bool {
    OutputFileKind::from_path(path) == Some(OutputFileKind::Manifest)
}
