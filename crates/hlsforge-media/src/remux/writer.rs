//! Segmenting fMP4 writer.

use crate::fmp4::{FragmentSample, InitSegmentBuilder, MoofBuilder, AUDIO_TRACK_ID, VIDEO_TRACK_ID};
use crate::framework::{
    AssetWriter, MediaKind, MediaTime, Sample, SegmentDelegate, SegmentKind, SegmentReport,
    TrackDescription, TrackInput, TrackReport, WriterSettings, WriterStatus,
};
use crate::{Error, Result};
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// How far, in seconds, one track may run ahead of the other before its
/// input stops reporting ready.
const INTERLEAVE_WINDOW_SECS: f64 = 1.0;

const VIDEO_CODECS: &[&str] = &["avc1", "avc3", "hvc1", "hev1"];
const AUDIO_CODECS: &[&str] = &["mp4a"];

struct TrackState {
    description: TrackDescription,
    pending: VecDeque<Sample>,
    finished: bool,
    last_decode: Option<MediaTime>,
}

impl TrackState {
    fn new(description: TrackDescription) -> Self {
        Self {
            description,
            pending: VecDeque::new(),
            finished: false,
            last_decode: None,
        }
    }
}

/// A decided segment boundary waiting for audio to reach it.
struct Cut {
    /// Number of queued video samples that belong before the boundary.
    video_samples: usize,
    at: MediaTime,
}

struct WriterState {
    status: WriterStatus,
    error: Option<String>,
    video: Option<TrackState>,
    audio: Option<TrackState>,
    segment_start: MediaTime,
    cuts: VecDeque<Cut>,
    sequence: u32,
}

impl WriterState {
    fn track(&self, kind: MediaKind) -> Option<&TrackState> {
        match kind {
            MediaKind::Video => self.video.as_ref(),
            MediaKind::Audio => self.audio.as_ref(),
        }
    }

    fn track_mut(&mut self, kind: MediaKind) -> Option<&mut TrackState> {
        match kind {
            MediaKind::Video => self.video.as_mut(),
            MediaKind::Audio => self.audio.as_mut(),
        }
    }

    fn fail(&mut self, reason: String) -> Error {
        tracing::warn!(reason = %reason, "Segment writer failed");
        self.status = WriterStatus::Failed;
        self.error = Some(reason.clone());
        self.cuts.clear();
        Error::Writer(reason)
    }
}

struct Shared {
    settings: WriterSettings,
    delegate: Arc<dyn SegmentDelegate>,
    state: Mutex<WriterState>,
}

/// [`AssetWriter`] that re-packages samples into fMP4 HLS segments.
///
/// Segments are cut at the first video sync sample whose presentation
/// time reaches `segment start + segment duration`. A cut is emitted once
/// audio has been appended up to the boundary (or audio is finished), so
/// each fragment carries the audio that plays alongside its video.
pub struct FragmentWriter {
    shared: Arc<Shared>,
}

impl FragmentWriter {
    pub fn new(settings: WriterSettings, delegate: Arc<dyn SegmentDelegate>) -> Self {
        let segment_start = settings.initial_segment_start;
        Self {
            shared: Arc::new(Shared {
                settings,
                delegate,
                state: Mutex::new(WriterState {
                    status: WriterStatus::Unknown,
                    error: None,
                    video: None,
                    audio: None,
                    segment_start,
                    cuts: VecDeque::new(),
                    sequence: 0,
                }),
            }),
        }
    }
}

impl Shared {
    fn init_segment(state: &WriterState) -> Result<Vec<u8>> {
        let video = &state
            .video
            .as_ref()
            .ok_or_else(|| Error::writer("no video input"))?
            .description;

        let codec = video.codec_tag().as_bytes();
        let codec: [u8; 4] = codec
            .try_into()
            .map_err(|_| Error::unsupported(format!("video codec {}", video.codec_tag())))?;
        let config = video
            .codec_config
            .as_ref()
            .ok_or_else(|| Error::unsupported("video track has no decoder configuration"))?;

        let mut builder = InitSegmentBuilder::new()
            .timescale(video.timescale)
            .dimensions(video.width.unwrap_or(0), video.height.unwrap_or(0))
            .video_codec(codec, config.to_vec());

        if let Some(audio) = &state.audio {
            let audio = &audio.description;
            builder = builder.with_audio(
                audio.timescale,
                audio.channels.unwrap_or(2),
                audio.sample_rate.unwrap_or(audio.timescale),
            );
            if let Some(esds) = &audio.codec_config {
                builder = builder.audio_codec(esds.to_vec());
            }
        }

        Ok(builder.build())
    }

    fn is_ready(&self, kind: MediaKind) -> bool {
        let state = self.state.lock();
        if state.status != WriterStatus::Writing {
            return false;
        }
        let Some(me) = state.track(kind) else {
            return false;
        };
        if me.finished {
            return false;
        }
        let other = match kind {
            MediaKind::Video => state.audio.as_ref(),
            MediaKind::Audio => state.video.as_ref(),
        };
        let Some(other) = other.filter(|o| !o.finished) else {
            return true;
        };
        let Some(mine) = me.last_decode else {
            return true;
        };
        let theirs = other.last_decode.unwrap_or(state.segment_start);
        mine.seconds() <= theirs.seconds() + INTERLEAVE_WINDOW_SECS
    }

    fn append(&self, kind: MediaKind, sample: Sample) -> Result<()> {
        let mut state = self.state.lock();
        if state.status != WriterStatus::Writing {
            return Err(Error::writer(format!(
                "cannot append {} sample while writer is {:?}",
                kind, state.status
            )));
        }

        let segment_end = state.segment_start + self.settings.segment_duration;
        let open_cut = state.cuts.back().map_or(0, |c| c.video_samples);

        let Some(track) = state.track_mut(kind) else {
            return Err(Error::writer(format!("no {} input", kind)));
        };
        if track.finished {
            return Err(Error::writer(format!("{} input already finished", kind)));
        }

        let decode = sample.decode_time();
        if let Some(last) = track.last_decode {
            if decode < last {
                let reason = format!(
                    "{} decode time went backwards ({} after {})",
                    kind, decode, last
                );
                return Err(state.fail(reason));
            }
        }
        track.last_decode = Some(decode);

        let cut_at = (kind == MediaKind::Video
            && sample.is_sync
            && track.pending.len() > open_cut
            && sample.pts >= segment_end)
            .then_some((track.pending.len(), sample.pts));

        track.pending.push_back(sample);

        if let Some((video_samples, at)) = cut_at {
            state.cuts.push_back(Cut { video_samples, at });
            state.segment_start = at;
        }

        self.flush_ready(&mut state);
        Ok(())
    }

    fn mark_finished(&self, kind: MediaKind) {
        let mut state = self.state.lock();
        if let Some(track) = state.track_mut(kind) {
            track.finished = true;
        }
        if state.status == WriterStatus::Writing {
            self.flush_ready(&mut state);
        }
    }

    /// Emit every cut whose audio is complete.
    fn flush_ready(&self, state: &mut WriterState) {
        while let Some(cut) = state.cuts.front() {
            let audio_ready = state.audio.as_ref().map_or(true, |audio| {
                audio.finished || audio.last_decode.is_some_and(|t| t >= cut.at)
            });
            if !audio_ready {
                break;
            }
            self.emit_cut(state);
        }
    }

    fn emit_cut(&self, state: &mut WriterState) {
        let Some(cut) = state.cuts.pop_front() else {
            return;
        };
        for later in state.cuts.iter_mut() {
            later.video_samples -= cut.video_samples;
        }

        let video: Vec<Sample> = match state.video.as_mut() {
            Some(track) => {
                let take = cut.video_samples.min(track.pending.len());
                track.pending.drain(..take).collect()
            }
            None => Vec::new(),
        };
        let mut audio = Vec::new();
        if let Some(track) = state.audio.as_mut() {
            while track.pending.front().is_some_and(|s| s.pts < cut.at) {
                audio.extend(track.pending.pop_front());
            }
        }

        self.emit_fragment(state, video, audio);
    }

    fn emit_fragment(&self, state: &mut WriterState, video: Vec<Sample>, audio: Vec<Sample>) {
        if video.is_empty() && audio.is_empty() {
            return;
        }
        state.sequence += 1;

        let mut moof = MoofBuilder::new(state.sequence);
        let mut report = SegmentReport::default();
        let runs = [
            (MediaKind::Video, VIDEO_TRACK_ID, &video),
            (MediaKind::Audio, AUDIO_TRACK_ID, &audio),
        ];

        for (kind, track_id, samples) in runs {
            let (Some(track), Some(first)) = (state.track(kind), samples.first()) else {
                continue;
            };
            let timescale = track.description.timescale;
            let base = first.decode_time().convert_scale(timescale).value.max(0) as u64;
            let mut total = 0i64;
            let mut earliest = first.pts;

            let entries = samples
                .iter()
                .map(|sample| {
                    let duration = sample.duration.convert_scale(timescale).value.max(0);
                    total += duration;
                    earliest = earliest.min(sample.pts);
                    FragmentSample {
                        size: sample.data.len() as u32,
                        duration: duration as u32,
                        composition_offset: (sample.pts - sample.decode_time())
                            .convert_scale(timescale)
                            .value as i32,
                        is_sync: sample.is_sync,
                    }
                })
                .collect();

            moof = moof.track(track_id, base, entries);
            report.track_reports.push(TrackReport {
                kind,
                earliest_presentation_time: earliest,
                duration: MediaTime::new(total, timescale),
            });
        }

        let header = moof.build();
        let mut data = BytesMut::with_capacity(
            header.len() + video.iter().chain(&audio).map(|s| s.data.len()).sum::<usize>(),
        );
        data.extend_from_slice(&header);
        for sample in video.iter().chain(&audio) {
            data.extend_from_slice(&sample.data);
        }

        tracing::trace!(
            sequence = state.sequence,
            video_samples = video.len(),
            audio_samples = audio.len(),
            bytes = data.len(),
            "Emitting media segment"
        );
        self.delegate
            .did_output_segment(data.freeze(), SegmentKind::Media, Some(report));
    }
}

impl AssetWriter for FragmentWriter {
    fn add_input(&self, track: &TrackDescription) -> Result<Arc<dyn TrackInput>> {
        let mut state = self.shared.state.lock();
        if state.status != WriterStatus::Unknown {
            return Err(Error::track_attach(track.track_id, "writer already started"));
        }

        let (allowed, slot) = match track.kind {
            MediaKind::Video => (VIDEO_CODECS, &mut state.video),
            MediaKind::Audio => (AUDIO_CODECS, &mut state.audio),
        };
        if slot.is_some() {
            return Err(Error::track_attach(
                track.track_id,
                format!("writer already has a {} input", track.kind),
            ));
        }
        if !allowed.contains(&track.codec_tag()) {
            return Err(Error::track_attach(
                track.track_id,
                format!("codec {} cannot be passed through", track.codec_tag()),
            ));
        }
        *slot = Some(TrackState::new(track.clone()));

        Ok(Arc::new(FragmentTrackInput {
            kind: track.kind,
            shared: Arc::clone(&self.shared),
        }))
    }

    fn start_writing(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.status != WriterStatus::Unknown {
            return Err(Error::writer(format!(
                "cannot start writer in state {:?}",
                state.status
            )));
        }

        let init = match Shared::init_segment(&state) {
            Ok(init) => init,
            Err(e) => return Err(state.fail(e.to_string())),
        };
        state.status = WriterStatus::Writing;
        self.shared.delegate.did_output_segment(
            Bytes::from(init),
            SegmentKind::Initialization,
            None,
        );
        Ok(())
    }

    fn start_session(&self, at: MediaTime) {
        self.shared.state.lock().segment_start = at;
    }

    fn status(&self) -> WriterStatus {
        self.shared.state.lock().status
    }

    fn error(&self) -> Option<String> {
        self.shared.state.lock().error.clone()
    }

    fn finish_writing(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.status != WriterStatus::Writing {
            return Err(Error::writer(
                state
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("cannot finish writer in state {:?}", state.status)),
            ));
        }

        while !state.cuts.is_empty() {
            self.shared.emit_cut(&mut state);
        }
        let video: Vec<Sample> = state
            .video
            .as_mut()
            .map(|t| t.pending.drain(..).collect())
            .unwrap_or_default();
        let audio: Vec<Sample> = state
            .audio
            .as_mut()
            .map(|t| t.pending.drain(..).collect())
            .unwrap_or_default();
        self.shared.emit_fragment(&mut state, video, audio);

        state.status = WriterStatus::Completed;
        tracing::debug!(segments = state.sequence, "Segment writer finished");
        Ok(())
    }

    fn cancel_writing(&self) {
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        if matches!(state.status, WriterStatus::Unknown | WriterStatus::Writing) {
            state.status = WriterStatus::Cancelled;
        }
        state.cuts.clear();
        for track in [state.video.as_mut(), state.audio.as_mut()].into_iter().flatten() {
            track.pending.clear();
        }
    }
}

struct FragmentTrackInput {
    kind: MediaKind,
    shared: Arc<Shared>,
}

impl TrackInput for FragmentTrackInput {
    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn is_ready_for_more_media_data(&self) -> bool {
        self.shared.is_ready(self.kind)
    }

    fn append(&self, sample: Sample) -> Result<()> {
        self.shared.append(self.kind, sample)
    }

    fn mark_as_finished(&self) {
        self.shared.mark_finished(self.kind)
    }
}
