//! Shared fixtures for integration tests.
//!
//! [`write_mp4`] synthesizes a small progressive MP4 with an H.264 video
//! track and, optionally, an AAC audio track. Sample payloads are filler;
//! only the container structure and timing are real.

#![allow(dead_code)]

use std::path::Path;

pub const VIDEO_TIMESCALE: u32 = 30_000;
pub const FRAME_TICKS: u32 = 1_000;
pub const FPS: u32 = 30;
pub const AUDIO_TIMESCALE: u32 = 48_000;
pub const AAC_FRAME: u32 = 1_024;

const AVCC: &[u8] = &[
    0x01, 0x42, 0xC0, 0x1E, 0xFF, 0xE1, 0x00, 0x04, 0x67, 0x42, 0xC0, 0x1E, 0x01, 0x00, 0x02, 0x68,
    0xCE,
];

const ESDS: &[u8] = &[
    0x00, 0x00, 0x00, 0x00, // version, flags
    0x03, 0x19, 0x00, 0x01, 0x00, // ES_Descriptor
    0x04, 0x11, 0x40, 0x15, 0x00, 0x00, 0x00, 0x00, 0x01, 0xF4, 0x00, 0x00, 0x01, 0xF4, 0x00,
    0x05, 0x02, 0x11, 0x90, // AudioSpecificConfig: AAC-LC, 48 kHz, stereo
    0x06, 0x01, 0x02,
];

/// Shape of a synthesized source.
#[derive(Debug, Clone, Copy)]
pub struct ClipShape {
    pub seconds: u32,
    /// Frames between keyframes.
    pub gop: u32,
    pub with_audio: bool,
}

impl Default for ClipShape {
    fn default() -> Self {
        Self {
            seconds: 10,
            gop: FPS,
            with_audio: true,
        }
    }
}

impl ClipShape {
    pub fn video_frames(&self) -> u32 {
        self.seconds * FPS
    }

    pub fn audio_frames(&self) -> u32 {
        (self.seconds * AUDIO_TIMESCALE).div_ceil(AAC_FRAME)
    }
}

fn boxed(name: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 8);
    out.extend_from_slice(&((payload.len() + 8) as u32).to_be_bytes());
    out.extend_from_slice(name);
    out.extend_from_slice(payload);
    out
}

fn full_box(name: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut payload = vec![0u8; 4];
    payload.extend_from_slice(body);
    boxed(name, &payload)
}

fn u32s(values: impl IntoIterator<Item = u32>) -> Vec<u8> {
    values.into_iter().flat_map(u32::to_be_bytes).collect()
}

fn counted(entries: &[u32], per_entry: usize) -> Vec<u8> {
    let mut body = ((entries.len() / per_entry) as u32).to_be_bytes().to_vec();
    body.extend(u32s(entries.iter().copied()));
    body
}

struct TrackLayout {
    id: u32,
    handler: [u8; 4],
    timescale: u32,
    delta: u32,
    sizes: Vec<u32>,
    sync: Option<Vec<u32>>,
    sample_entry: Vec<u8>,
    width: u32,
    height: u32,
}

impl TrackLayout {
    fn duration(&self) -> u32 {
        self.delta * self.sizes.len() as u32
    }

    fn trak(&self, offsets: &[u32]) -> Vec<u8> {
        let mut tkhd = vec![0u8; 80];
        tkhd[8..12].copy_from_slice(&self.id.to_be_bytes());
        tkhd[72..76].copy_from_slice(&(self.width << 16).to_be_bytes());
        tkhd[76..80].copy_from_slice(&(self.height << 16).to_be_bytes());

        let mut mdhd = vec![0u8; 20];
        mdhd[8..12].copy_from_slice(&self.timescale.to_be_bytes());
        mdhd[12..16].copy_from_slice(&self.duration().to_be_bytes());

        let mut hdlr = vec![0u8; 21];
        hdlr[4..8].copy_from_slice(&self.handler);

        let mut stsd = 1u32.to_be_bytes().to_vec();
        stsd.extend_from_slice(&self.sample_entry);

        let stts = counted(&[self.sizes.len() as u32, self.delta], 2);
        let stsc = counted(&[1, 1, 1], 3);
        let mut stsz = 0u32.to_be_bytes().to_vec();
        stsz.extend(counted(&self.sizes, 1));
        let stco = counted(offsets, 1);

        let mut stbl = full_box(b"stsd", &stsd);
        stbl.extend(full_box(b"stts", &stts));
        if let Some(sync) = &self.sync {
            stbl.extend(full_box(b"stss", &counted(sync, 1)));
        }
        stbl.extend(full_box(b"stsc", &stsc));
        stbl.extend(full_box(b"stsz", &stsz));
        stbl.extend(full_box(b"stco", &stco));

        let minf = boxed(b"stbl", &stbl);
        let mut mdia = full_box(b"mdhd", &mdhd);
        mdia.extend(full_box(b"hdlr", &hdlr));
        mdia.extend(boxed(b"minf", &minf));

        let mut trak = full_box(b"tkhd", &tkhd);
        trak.extend(boxed(b"mdia", &mdia));
        boxed(b"trak", &trak)
    }
}

fn avc1_entry(width: u16, height: u16) -> Vec<u8> {
    let mut body = vec![0u8; 78];
    body[6..8].copy_from_slice(&1u16.to_be_bytes());
    body[24..26].copy_from_slice(&width.to_be_bytes());
    body[26..28].copy_from_slice(&height.to_be_bytes());
    body[28..32].copy_from_slice(&0x0048_0000u32.to_be_bytes());
    body[32..36].copy_from_slice(&0x0048_0000u32.to_be_bytes());
    body[40..42].copy_from_slice(&1u16.to_be_bytes());
    body[74..76].copy_from_slice(&0x0018u16.to_be_bytes());
    body[76..78].copy_from_slice(&0xFFFFu16.to_be_bytes());
    body.extend(boxed(b"avcC", AVCC));
    boxed(b"avc1", &body)
}

fn mp4a_entry() -> Vec<u8> {
    let mut body = vec![0u8; 28];
    body[6..8].copy_from_slice(&1u16.to_be_bytes());
    body[16..18].copy_from_slice(&2u16.to_be_bytes());
    body[18..20].copy_from_slice(&16u16.to_be_bytes());
    body[24..28].copy_from_slice(&(AUDIO_TIMESCALE << 16).to_be_bytes());
    body.extend(boxed(b"esds", ESDS));
    boxed(b"mp4a", &body)
}

/// Synthesize an MP4 file (moov before mdat) at `path`.
pub fn write_mp4(path: &Path, clip: ClipShape) {
    let video = TrackLayout {
        id: 1,
        handler: *b"vide",
        timescale: VIDEO_TIMESCALE,
        delta: FRAME_TICKS,
        sizes: vec![120; clip.video_frames() as usize],
        sync: Some((0..clip.video_frames()).step_by(clip.gop as usize).map(|i| i + 1).collect()),
        sample_entry: avc1_entry(640, 360),
        width: 640,
        height: 360,
    };
    let mut tracks = vec![video];
    if clip.with_audio {
        tracks.push(TrackLayout {
            id: 2,
            handler: *b"soun",
            timescale: AUDIO_TIMESCALE,
            delta: AAC_FRAME,
            sizes: vec![24; clip.audio_frames() as usize],
            sync: None,
            sample_entry: mp4a_entry(),
            width: 0,
            height: 0,
        });
    }

    let ftyp = boxed(b"ftyp", b"isom\x00\x00\x02\x00isomiso2avc1mp41");
    let build_moov = |mdat_start: u32| {
        let mut mvhd = vec![0u8; 96];
        mvhd[8..12].copy_from_slice(&1000u32.to_be_bytes());
        mvhd[12..16].copy_from_slice(&(clip.seconds * 1000).to_be_bytes());
        mvhd[92..96].copy_from_slice(&3u32.to_be_bytes());
        let mut moov = full_box(b"mvhd", &mvhd);

        let mut offset = mdat_start + 8;
        for track in &tracks {
            let offsets: Vec<u32> = track
                .sizes
                .iter()
                .map(|size| {
                    let at = offset;
                    offset += size;
                    at
                })
                .collect();
            moov.extend(track.trak(&offsets));
        }
        boxed(b"moov", &moov)
    };

    // Offsets do not change the moov size, so measure with a placeholder.
    let moov_len = build_moov(0).len();
    let moov = build_moov((ftyp.len() + moov_len) as u32);

    let payload: Vec<u8> = tracks
        .iter()
        .flat_map(|t| t.sizes.iter().flat_map(|&size| vec![0xABu8; size as usize]))
        .collect();

    let mut file = ftyp;
    file.extend(moov);
    file.extend(boxed(b"mdat", &payload));
    std::fs::write(path, file).unwrap();
}
