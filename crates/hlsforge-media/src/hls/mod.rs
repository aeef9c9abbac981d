//! HLS media playlist generation.
//!
//! [`ManifestState`] consumes segments in index order and renders a VOD
//! playlist. A segment's `#EXTINF` duration is the distance between its
//! video start and the next segment's video start, so the entry is only
//! known once the successor arrives. Entries are buffered and the header is
//! rendered last, because `#EXT-X-TARGETDURATION` must cover the longest
//! segment and keyframe-aligned cuts may overrun the configured target.

use crate::framework::{MediaKind, Segment, TrackReport};
use std::fmt::Write;

const PLAYLIST_VERSION: u32 = 7;

/// Incremental VOD playlist builder.
#[derive(Debug, Clone)]
pub struct ManifestState {
    target_duration: f64,
    prefix: String,
    map_uri: Option<String>,
    entries: Vec<(String, f64)>,
    /// Media segment waiting for its successor's start time.
    previous: Option<(String, TrackReport)>,
}

impl ManifestState {
    pub fn new(target_duration: f64, prefix: impl Into<String>) -> Self {
        Self {
            target_duration,
            prefix: prefix.into(),
            map_uri: None,
            entries: Vec::new(),
            previous: None,
        }
    }

    /// Feed the next segment. Segments must arrive in index order.
    pub fn push(&mut self, segment: &Segment) {
        let name = segment.file_name(&self.prefix);

        if segment.is_initialization() {
            if self.map_uri.is_some() {
                tracing::warn!(file = %name, "Ignoring extra initialization segment");
            } else {
                self.map_uri = Some(name);
            }
            return;
        }

        let Some(video) = segment
            .report
            .as_ref()
            .and_then(|r| r.track(MediaKind::Video))
            .copied()
        else {
            tracing::debug!(file = %name, "Skipping segment without video timing");
            return;
        };

        if let Some((previous_name, previous)) = self.previous.take() {
            let duration = (video.earliest_presentation_time
                - previous.earliest_presentation_time)
                .seconds();
            self.entries.push((previous_name, duration));
        }
        self.previous = Some((name, video));
    }

    /// `ceil(target)`, raised so no rounded `#EXTINF` exceeds it.
    fn target_duration_secs(&self) -> u64 {
        let longest = self
            .entries
            .iter()
            .map(|(_, d)| d.round().max(0.0) as u64)
            .max()
            .unwrap_or(0);
        (self.target_duration.ceil().max(0.0) as u64).max(longest)
    }

    /// Flush the last entry and render the playlist.
    pub fn finish(mut self) -> String {
        if let Some((name, last)) = self.previous.take() {
            self.entries.push((name, last.duration.seconds()));
        }

        let target = self.target_duration_secs();
        if target > self.target_duration.ceil() as u64 {
            tracing::warn!(
                configured = self.target_duration,
                longest = target,
                "Segments overrun the target duration, raising EXT-X-TARGETDURATION"
            );
        }

        let mut text = String::with_capacity(256 + self.entries.len() * 48);
        let _ = writeln!(text, "#EXTM3U");
        let _ = writeln!(text, "#EXT-X-TARGETDURATION:{}", target);
        let _ = writeln!(text, "#EXT-X-VERSION:{}", PLAYLIST_VERSION);
        let _ = writeln!(text, "#EXT-X-MEDIA-SEQUENCE:1");
        let _ = writeln!(text, "#EXT-X-PLAYLIST-TYPE:VOD");
        let _ = writeln!(text, "#EXT-X-INDEPENDENT-SEGMENTS");
        if let Some(uri) = &self.map_uri {
            let _ = writeln!(text, "#EXT-X-MAP:URI=\"{}\"", uri);
        }
        text.push('\n');
        for (name, duration) in &self.entries {
            let _ = writeln!(text, "#EXTINF:{:.5},\n{}", duration, name);
        }
        text.push_str("#EXT-X-ENDLIST\n");
        text
    }
}

/// Render a complete playlist from segments in index order.
pub fn build_manifest<'a>(
    segments: impl IntoIterator<Item = &'a Segment>,
    target_duration: f64,
    prefix: &str,
) -> String {
    let mut state = ManifestState::new(target_duration, prefix);
    for segment in segments {
        state.push(segment);
    }
    state.finish()
}
