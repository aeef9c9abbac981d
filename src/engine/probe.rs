//! Source track discovery.

use crate::{Error, Result};
use hlsforge_media::{MediaFramework, MediaKind, TrackDescription};
use std::path::{Path, PathBuf};

/// The tracks a conversion will move.
#[derive(Debug, Clone)]
pub struct SourceMedia {
    pub input: PathBuf,
    pub video: TrackDescription,
    pub audio: Option<TrackDescription>,
    pub width: u32,
    pub height: u32,
}

impl SourceMedia {
    /// Present tracks, video first.
    pub fn tracks(&self) -> impl Iterator<Item = &TrackDescription> {
        std::iter::once(&self.video).chain(self.audio.as_ref())
    }
}

/// Pick the first video track (required) and the first audio track.
pub fn probe_source(framework: &dyn MediaFramework, input: &Path) -> Result<SourceMedia> {
    let tracks = framework.load_tracks(input)?;

    let video = tracks
        .iter()
        .find(|t| t.kind == MediaKind::Video)
        .cloned()
        .ok_or(Error::NoVideoTrack)?;
    if video.codec.is_none() {
        tracing::warn!(track_id = video.track_id, "Video track has no format description");
        return Err(Error::NoVideoTrack);
    }
    let audio = tracks.iter().find(|t| t.kind == MediaKind::Audio).cloned();

    let width = video.width.unwrap_or(0);
    let height = video.height.unwrap_or(0);
    tracing::info!(
        codec = video.codec_tag(),
        width,
        height,
        "Video: {} {}x{}",
        video.codec_tag(),
        width,
        height
    );
    tracing::info!(audio = audio.is_some(), "Audio: {}", if audio.is_some() { "yes" } else { "no" });

    Ok(SourceMedia {
        input: input.to_path_buf(),
        video,
        audio,
        width,
        height,
    })
}
