//! Conversion engine behaviour against a scripted media framework.

use assert_matches::assert_matches;
use bytes::Bytes;
use hlsforge::engine::{Configuration, HlsEngine};
use hlsforge::Error;
use hlsforge_media::{
    AssetReader, AssetWriter, MediaFramework, MediaKind, MediaTime, Sample, SegmentDelegate,
    SegmentKind, SegmentReport, TrackDescription, TrackInput, TrackOutput, TrackReport,
    WriterSettings, WriterStatus,
};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

/// Appends per media segment in the scripted writer.
const SEGMENT_EVERY: usize = 10;

fn track(track_id: u32, kind: MediaKind, timescale: u32) -> TrackDescription {
    TrackDescription {
        track_id,
        kind,
        codec: Some(match kind {
            MediaKind::Video => "avc1".to_string(),
            MediaKind::Audio => "mp4a".to_string(),
        }),
        timescale,
        duration: MediaTime::from_secs(4),
        width: (kind == MediaKind::Video).then_some(1280),
        height: (kind == MediaKind::Video).then_some(720),
        channels: None,
        sample_rate: None,
        codec_config: None,
    }
}

fn samples(count: usize, ticks: i64, timescale: u32, with_dts: bool) -> Vec<Sample> {
    (0..count)
        .map(|i| {
            let at = MediaTime::new(i as i64 * ticks, timescale);
            Sample {
                data: Bytes::from_static(b"x"),
                pts: at,
                dts: with_dts.then_some(at),
                duration: MediaTime::new(ticks, timescale),
                is_sync: i % 30 == 0,
            }
        })
        .collect()
}

#[derive(Default)]
struct Script {
    tracks: Vec<TrackDescription>,
    samples: Vec<(u32, Vec<Sample>)>,
    /// (track id, sample index) at which reading fails.
    read_failure: Option<(u32, usize)>,
    reject_appends: bool,
    /// Threads that performed sample reads.
    read_threads: Mutex<Vec<ThreadId>>,
}

struct ScriptedFramework {
    script: Arc<Script>,
    writer: Mutex<Option<Arc<WriterShared>>>,
}

impl ScriptedFramework {
    fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script: Arc::new(script),
            writer: Mutex::new(None),
        })
    }

    fn writer(&self) -> Arc<WriterShared> {
        self.writer.lock().clone().unwrap()
    }
}

impl MediaFramework for ScriptedFramework {
    fn load_tracks(&self, _input: &Path) -> hlsforge_media::Result<Vec<TrackDescription>> {
        Ok(self.script.tracks.clone())
    }

    fn create_reader(&self, _input: &Path) -> hlsforge_media::Result<Arc<dyn AssetReader>> {
        Ok(Arc::new(ScriptedReader {
            script: Arc::clone(&self.script),
            cancelled: Arc::new(AtomicBool::new(false)),
        }))
    }

    fn create_writer(
        &self,
        _settings: WriterSettings,
        delegate: Arc<dyn SegmentDelegate>,
    ) -> hlsforge_media::Result<Arc<dyn AssetWriter>> {
        let shared = Arc::new(WriterShared {
            delegate,
            reject: self.script.reject_appends,
            state: Mutex::new(WriterState::default()),
        });
        *self.writer.lock() = Some(Arc::clone(&shared));
        Ok(Arc::new(ScriptedWriter { shared }))
    }
}

struct ScriptedReader {
    script: Arc<Script>,
    cancelled: Arc<AtomicBool>,
}

impl AssetReader for ScriptedReader {
    fn add_output(&self, track: &TrackDescription) -> hlsforge_media::Result<Box<dyn TrackOutput>> {
        let samples = self
            .script
            .samples
            .iter()
            .find(|(id, _)| *id == track.track_id)
            .map(|(_, s)| s.clone())
            .unwrap_or_default();
        let fail_at = self
            .script
            .read_failure
            .filter(|(id, _)| *id == track.track_id)
            .map(|(_, at)| at);
        Ok(Box::new(ScriptedOutput {
            script: Arc::clone(&self.script),
            track: track.clone(),
            samples: samples.into_iter(),
            read: 0,
            fail_at,
            cancelled: Arc::clone(&self.cancelled),
        }))
    }

    fn start_reading(&self) -> hlsforge_media::Result<()> {
        Ok(())
    }

    fn cancel_reading(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

struct ScriptedOutput {
    script: Arc<Script>,
    track: TrackDescription,
    samples: std::vec::IntoIter<Sample>,
    read: usize,
    fail_at: Option<usize>,
    cancelled: Arc<AtomicBool>,
}

impl TrackOutput for ScriptedOutput {
    fn track(&self) -> &TrackDescription {
        &self.track
    }

    fn copy_next_sample(&mut self) -> hlsforge_media::Result<Option<Sample>> {
        self.script.read_threads.lock().push(std::thread::current().id());
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(hlsforge_media::Error::Cancelled);
        }
        if self.fail_at == Some(self.read) {
            return Err(hlsforge_media::Error::unsupported("source truncated"));
        }
        self.read += 1;
        Ok(self.samples.next())
    }
}

#[derive(Default)]
struct WriterState {
    status: Option<WriterStatus>,
    appended: Vec<(MediaKind, Sample)>,
    pending: usize,
    emitted: usize,
    polls: usize,
    stalls: usize,
}

/// Emits a media segment after every `SEGMENT_EVERY` appends from either
/// track, and reports "not ready" on every third readiness poll.
struct WriterShared {
    delegate: Arc<dyn SegmentDelegate>,
    reject: bool,
    state: Mutex<WriterState>,
}

impl WriterShared {
    fn emit(&self, state: &mut WriterState) {
        let start = MediaTime::from_secs(10 + state.emitted as i64);
        let report = SegmentReport {
            track_reports: vec![TrackReport {
                kind: MediaKind::Video,
                earliest_presentation_time: start,
                duration: MediaTime::from_secs(1),
            }],
        };
        state.emitted += 1;
        state.pending = 0;
        self.delegate
            .did_output_segment(Bytes::from_static(b"moof"), SegmentKind::Media, Some(report));
    }

    fn appended(&self) -> Vec<(MediaKind, Sample)> {
        self.state.lock().appended.clone()
    }

    fn stalls(&self) -> usize {
        self.state.lock().stalls
    }
}

struct ScriptedWriter {
    shared: Arc<WriterShared>,
}

struct ScriptedInput {
    kind: MediaKind,
    shared: Arc<WriterShared>,
    finished: AtomicBool,
}

impl TrackInput for ScriptedInput {
    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn is_ready_for_more_media_data(&self) -> bool {
        let mut state = self.shared.state.lock();
        state.polls += 1;
        if state.polls % 3 == 0 {
            state.stalls += 1;
            return false;
        }
        true
    }

    fn append(&self, sample: Sample) -> hlsforge_media::Result<()> {
        if self.shared.reject {
            return Err(hlsforge_media::Error::writer("sample out of order"));
        }
        let mut state = self.shared.state.lock();
        state.appended.push((self.kind, sample));
        state.pending += 1;
        if state.pending == SEGMENT_EVERY {
            self.shared.emit(&mut state);
        }
        Ok(())
    }

    fn mark_as_finished(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }
}

impl AssetWriter for ScriptedWriter {
    fn add_input(&self, track: &TrackDescription) -> hlsforge_media::Result<Arc<dyn TrackInput>> {
        Ok(Arc::new(ScriptedInput {
            kind: track.kind,
            shared: Arc::clone(&self.shared),
            finished: AtomicBool::new(false),
        }))
    }

    fn start_writing(&self) -> hlsforge_media::Result<()> {
        self.shared.state.lock().status = Some(WriterStatus::Writing);
        self.shared
            .delegate
            .did_output_segment(Bytes::from_static(b"moov"), SegmentKind::Initialization, None);
        Ok(())
    }

    fn start_session(&self, _at: MediaTime) {}

    fn status(&self) -> WriterStatus {
        self.shared.state.lock().status.unwrap_or(WriterStatus::Unknown)
    }

    fn error(&self) -> Option<String> {
        None
    }

    fn finish_writing(&self) -> hlsforge_media::Result<()> {
        let mut state = self.shared.state.lock();
        if state.pending > 0 {
            self.shared.emit(&mut state);
        }
        state.status = Some(WriterStatus::Completed);
        Ok(())
    }

    fn cancel_writing(&self) {
        self.shared.state.lock().status = Some(WriterStatus::Cancelled);
    }
}

fn av_script() -> Script {
    Script {
        tracks: vec![
            track(1, MediaKind::Video, 30),
            track(2, MediaKind::Audio, 48_000),
        ],
        samples: vec![
            (1, samples(90, 1, 30, true)),
            (2, samples(141, 1_024, 48_000, false)),
        ],
        ..Default::default()
    }
}

fn config(dir: &Path) -> Configuration {
    Configuration::new(dir.join("source.mp4"), dir.join("hls"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_indices_are_contiguous_across_concurrent_tracks() {
    for _ in 0..20 {
        let dir = tempfile::tempdir().unwrap();
        let framework = ScriptedFramework::new(av_script());
        let engine = HlsEngine::new(framework.clone());
        let config = config(dir.path());

        let source = hlsforge::engine::probe_source(framework.as_ref(), &config.input).unwrap();
        let segments = engine.generate_segments(&source, &config).await.unwrap();

        // 231 appends: 23 full segments, one remainder, one init.
        assert_eq!(segments.len(), 25);
        for (expected, segment) in segments.iter().enumerate() {
            assert_eq!(segment.index as usize, expected);
        }
        assert!(segments[0].is_initialization());
        assert!(segments[1..].iter().all(|s| !s.is_initialization()));
    }
}

#[tokio::test]
async fn test_conversion_writes_every_segment_and_playlist() {
    let dir = tempfile::tempdir().unwrap();
    let framework = ScriptedFramework::new(av_script());
    let config = config(dir.path());

    let output = HlsEngine::new(framework).convert(&config).await.unwrap();

    assert_eq!(output.segment_files.len(), 25);
    assert!(config.output_dir.join("fileSequence0.mp4").is_file());
    assert!(config.output_dir.join("fileSequence24.m4s").is_file());

    let manifest = std::fs::read_to_string(&output.manifest_path).unwrap();
    assert_eq!(manifest.matches("#EXTINF:1.00000,").count(), 24);
    assert!(manifest.ends_with("fileSequence24.m4s\n#EXT-X-ENDLIST\n"));
}

#[tokio::test]
async fn test_samples_are_shifted_by_start_offset() {
    let dir = tempfile::tempdir().unwrap();
    let framework = ScriptedFramework::new(av_script());

    HlsEngine::new(framework.clone())
        .convert(&config(dir.path()))
        .await
        .unwrap();

    let appended = framework.writer().appended();
    let video: Vec<&Sample> = appended
        .iter()
        .filter(|(kind, _)| *kind == MediaKind::Video)
        .map(|(_, s)| s)
        .collect();
    let audio: Vec<&Sample> = appended
        .iter()
        .filter(|(kind, _)| *kind == MediaKind::Audio)
        .map(|(_, s)| s)
        .collect();

    assert_eq!((video.len(), audio.len()), (90, 141));
    assert_eq!(video[0].pts, MediaTime::from_secs(10));
    assert_eq!(video[0].dts, Some(MediaTime::from_secs(10)));
    assert_eq!(video[30].pts, MediaTime::from_secs(11));
    assert!(video.windows(2).all(|w| w[0].pts < w[1].pts));

    assert_eq!(audio[0].pts, MediaTime::from_secs(10));
    assert!(audio.iter().all(|s| s.dts.is_none()));
}

#[tokio::test]
async fn test_backpressure_delays_but_delivers_everything() {
    let dir = tempfile::tempdir().unwrap();
    let framework = ScriptedFramework::new(av_script());

    HlsEngine::new(framework.clone())
        .convert(&config(dir.path()))
        .await
        .unwrap();

    let writer = framework.writer();
    assert!(writer.stalls() > 0);
    assert_eq!(writer.appended().len(), 231);
}

#[tokio::test]
async fn test_sample_reads_run_off_the_runtime_thread() {
    let dir = tempfile::tempdir().unwrap();
    let framework = ScriptedFramework::new(av_script());
    let runtime_thread = std::thread::current().id();

    HlsEngine::new(framework.clone())
        .convert(&config(dir.path()))
        .await
        .unwrap();

    let threads = framework.script.read_threads.lock();
    assert!(!threads.is_empty());
    assert!(threads.iter().all(|id| *id != runtime_thread));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_read_failure_cancels_sibling_and_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut script = av_script();
    script.samples[1].1 = samples(100_000, 1_024, 48_000, true);
    script.read_failure = Some((1, 40));
    let framework = ScriptedFramework::new(script);
    let config = config(dir.path());

    let result = HlsEngine::new(framework.clone()).convert(&config).await;

    let err = result.unwrap_err();
    assert!(!err.is_cancelled(), "root cause lost: {}", err);
    assert_matches!(err, Error::Media(hlsforge_media::Error::Unsupported(_)));
    assert!(!config.output_dir.exists());

    // The audio loop stopped long before exhausting its samples.
    let audio = framework
        .writer()
        .appended()
        .iter()
        .filter(|(kind, _)| *kind == MediaKind::Audio)
        .count();
    assert!(audio < 100_000);
    assert_eq!(framework.writer().state.lock().status, Some(WriterStatus::Cancelled));
}

#[tokio::test]
async fn test_rejected_append_is_encode_failure() {
    let dir = tempfile::tempdir().unwrap();
    let mut script = av_script();
    script.reject_appends = true;
    let config = config(dir.path());

    let result = HlsEngine::new(ScriptedFramework::new(script))
        .convert(&config)
        .await;

    assert_matches!(result, Err(Error::EncodeFailed(_)));
    assert!(!config.output_dir.exists());
}

#[tokio::test]
async fn test_missing_video_track() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());

    let audio_only = ScriptedFramework::new(Script {
        tracks: vec![track(2, MediaKind::Audio, 48_000)],
        samples: vec![(2, samples(10, 1_024, 48_000, true))],
        ..Default::default()
    });
    let result = HlsEngine::new(audio_only.clone()).convert(&config).await;
    assert_matches!(result, Err(Error::NoVideoTrack));
    assert!(audio_only.writer.lock().is_none());

    let mut undescribed = track(1, MediaKind::Video, 30);
    undescribed.codec = None;
    let no_format = ScriptedFramework::new(Script {
        tracks: vec![undescribed],
        ..Default::default()
    });
    let result = HlsEngine::new(no_format).convert(&config).await;
    assert_matches!(result, Err(Error::NoVideoTrack));

    assert!(!config.output_dir.exists());
}
