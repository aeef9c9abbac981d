//! Sample reader over a progressive MP4 file.

use crate::framework::{AssetReader, MediaTime, Sample, TrackDescription, TrackOutput};
use crate::mp4::{Mp4File, SampleEntry};
use crate::{Error, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct ReaderFlags {
    started: AtomicBool,
    cancelled: AtomicBool,
}

/// [`AssetReader`] backed by an MP4 sample table.
pub struct Mp4AssetReader {
    path: PathBuf,
    mp4: Mp4File,
    flags: Arc<ReaderFlags>,
    attached: Mutex<Vec<u32>>,
}

impl Mp4AssetReader {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            mp4: Mp4File::open(path)?,
            flags: Arc::default(),
            attached: Mutex::new(Vec::new()),
        })
    }
}

impl AssetReader for Mp4AssetReader {
    fn add_output(&self, track: &TrackDescription) -> Result<Box<dyn TrackOutput>> {
        if self.flags.started.load(Ordering::Acquire) {
            return Err(Error::track_attach(track.track_id, "reader already started"));
        }
        let info = self
            .mp4
            .track(track.track_id)
            .ok_or_else(|| Error::track_attach(track.track_id, "no such track in source"))?;
        if info.sample_table.samples.is_empty() {
            return Err(Error::track_attach(track.track_id, "track has no samples"));
        }

        let mut attached = self.attached.lock();
        if attached.contains(&track.track_id) {
            return Err(Error::track_attach(track.track_id, "track already has an output"));
        }

        let file = File::open(&self.path)?;
        attached.push(track.track_id);

        Ok(Box::new(Mp4TrackOutput {
            track: track.clone(),
            file: BufReader::new(file),
            samples: info.sample_table.samples.clone(),
            timescale: info.timescale,
            next: 0,
            flags: Arc::clone(&self.flags),
        }))
    }

    fn start_reading(&self) -> Result<()> {
        if self.attached.lock().is_empty() {
            return Err(Error::unsupported("reader has no outputs"));
        }
        self.flags.started.store(true, Ordering::Release);
        Ok(())
    }

    fn cancel_reading(&self) {
        self.flags.cancelled.store(true, Ordering::Release);
    }
}

/// Reads one track's samples in decode order.
struct Mp4TrackOutput {
    track: TrackDescription,
    file: BufReader<File>,
    samples: Vec<SampleEntry>,
    timescale: u32,
    next: usize,
    flags: Arc<ReaderFlags>,
}

impl Mp4TrackOutput {
    fn read_payload(&mut self, entry: &SampleEntry) -> Result<Bytes> {
        self.file.seek(SeekFrom::Start(entry.offset))?;
        let mut data = vec![0u8; entry.size as usize];
        self.file.read_exact(&mut data)?;
        Ok(Bytes::from(data))
    }
}

impl TrackOutput for Mp4TrackOutput {
    fn track(&self) -> &TrackDescription {
        &self.track
    }

    fn copy_next_sample(&mut self) -> Result<Option<Sample>> {
        if self.flags.cancelled.load(Ordering::Acquire) {
            return Err(Error::Cancelled);
        }
        if !self.flags.started.load(Ordering::Acquire) {
            return Err(Error::unsupported("reading has not started"));
        }

        let Some(entry) = self.samples.get(self.next).copied() else {
            return Ok(None);
        };
        self.next += 1;

        let data = self.read_payload(&entry)?;
        Ok(Some(Sample {
            data,
            pts: MediaTime::new(entry.pts(), self.timescale),
            dts: Some(MediaTime::new(entry.dts as i64, self.timescale)),
            duration: MediaTime::new(entry.duration as i64, self.timescale),
            is_sync: entry.is_keyframe,
        }))
    }
}
