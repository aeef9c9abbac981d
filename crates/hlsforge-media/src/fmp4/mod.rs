//! Fragmented MP4 (fMP4) serialization.
//!
//! - Init segment: ftyp + moov with empty sample tables and mvex/trex
//! - Media fragments: moof with one traf per track, followed by mdat

mod moof;

pub use moof::{FragmentSample, MoofBuilder};

use bytes::{BufMut, BytesMut};

/// fMP4 track id used for the video track.
pub const VIDEO_TRACK_ID: u32 = 1;
/// fMP4 track id used for the audio track.
pub const AUDIO_TRACK_ID: u32 = 2;

/// Write a box whose size is patched once `body` has written its payload.
pub(crate) fn write_box(buf: &mut BytesMut, name: &[u8; 4], body: impl FnOnce(&mut BytesMut)) {
    let start = buf.len();
    buf.put_u32(0);
    buf.put_slice(name);
    body(buf);
    let size = (buf.len() - start) as u32;
    buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
}

/// Write a full box (version + flags) around `body`.
pub(crate) fn write_full_box(
    buf: &mut BytesMut,
    name: &[u8; 4],
    version: u8,
    flags: u32,
    body: impl FnOnce(&mut BytesMut),
) {
    write_box(buf, name, |buf| {
        buf.put_u32(((version as u32) << 24) | (flags & 0x00FF_FFFF));
        body(buf);
    });
}

fn put_identity_matrix(buf: &mut BytesMut) {
    for value in [0x0001_0000u32, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000] {
        buf.put_u32(value);
    }
}

/// Video parameters for the init segment.
#[derive(Debug, Clone)]
struct VideoEntry {
    timescale: u32,
    width: u32,
    height: u32,
    /// Sample entry four-cc (`avc1`, `hvc1`, ...).
    codec: [u8; 4],
    /// Decoder configuration record, written as avcC or hvcC.
    config: Option<Vec<u8>>,
}

/// Audio parameters for the init segment.
#[derive(Debug, Clone)]
struct AudioEntry {
    timescale: u32,
    channels: u16,
    sample_rate: u32,
    /// esds payload (version/flags included).
    esds: Option<Vec<u8>>,
}

/// Builder for ftyp + moov initialization segments.
#[derive(Debug, Clone)]
pub struct InitSegmentBuilder {
    duration: u64,
    video: VideoEntry,
    audio: Option<AudioEntry>,
}

impl InitSegmentBuilder {
    pub fn new() -> Self {
        Self {
            duration: 0,
            video: VideoEntry {
                timescale: 90000,
                width: 1920,
                height: 1080,
                codec: *b"avc1",
                config: None,
            },
            audio: None,
        }
    }

    /// Set the video timescale, which is also used as the movie timescale.
    pub fn timescale(mut self, ts: u32) -> Self {
        self.video.timescale = ts;
        self
    }

    /// Set the duration in movie timescale units. Zero is valid for fragmented output.
    pub fn duration(mut self, d: u64) -> Self {
        self.duration = d;
        self
    }

    pub fn dimensions(mut self, width: u32, height: u32) -> Self {
        self.video.width = width;
        self.video.height = height;
        self
    }

    /// Set the video sample entry four-cc and its configuration record.
    pub fn video_codec(mut self, codec: [u8; 4], config: Vec<u8>) -> Self {
        self.video.codec = codec;
        self.video.config = Some(config);
        self
    }

    /// Add an audio track.
    pub fn with_audio(mut self, timescale: u32, channels: u16, sample_rate: u32) -> Self {
        self.audio = Some(AudioEntry {
            timescale,
            channels,
            sample_rate,
            esds: None,
        });
        self
    }

    /// Set the esds payload of the audio track. Ignored without [`Self::with_audio`].
    pub fn audio_codec(mut self, esds: Vec<u8>) -> Self {
        if let Some(audio) = self.audio.as_mut() {
            audio.esds = Some(esds);
        }
        self
    }

    /// Serialize the init segment.
    pub fn build(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(1024);
        self.write_ftyp(&mut buf);
        write_box(&mut buf, b"moov", |buf| {
            self.write_mvhd(buf);
            self.write_video_trak(buf);
            if let Some(audio) = &self.audio {
                self.write_audio_trak(buf, audio);
            }
            write_box(buf, b"mvex", |buf| {
                write_trex(buf, VIDEO_TRACK_ID);
                if self.audio.is_some() {
                    write_trex(buf, AUDIO_TRACK_ID);
                }
            });
        });
        buf.to_vec()
    }

    fn write_ftyp(&self, buf: &mut BytesMut) {
        write_box(buf, b"ftyp", |buf| {
            buf.put_slice(b"iso5"); // major brand
            buf.put_u32(0x200); // minor version
            for brand in [b"iso5", b"iso6", b"mp41", b"dash"] {
                buf.put_slice(brand);
            }
        });
    }

    fn write_mvhd(&self, buf: &mut BytesMut) {
        write_full_box(buf, b"mvhd", 1, 0, |buf| {
            buf.put_u64(0); // creation time
            buf.put_u64(0); // modification time
            buf.put_u32(self.video.timescale);
            buf.put_u64(self.duration);
            buf.put_u32(0x0001_0000); // rate 1.0
            buf.put_u16(0x0100); // volume 1.0
            buf.put_u16(0);
            buf.put_u64(0);
            put_identity_matrix(buf);
            for _ in 0..6 {
                buf.put_u32(0); // pre_defined
            }
            buf.put_u32(AUDIO_TRACK_ID + 1); // next track id
        });
    }

    fn write_tkhd(&self, buf: &mut BytesMut, track_id: u32, video: Option<(u32, u32)>) {
        // enabled | in_movie | in_preview
        write_full_box(buf, b"tkhd", 1, 0x7, |buf| {
            buf.put_u64(0);
            buf.put_u64(0);
            buf.put_u32(track_id);
            buf.put_u32(0);
            buf.put_u64(self.duration);
            buf.put_u64(0);
            buf.put_u16(0); // layer
            buf.put_u16(0); // alternate group
            buf.put_u16(if video.is_some() { 0 } else { 0x0100 });
            buf.put_u16(0);
            put_identity_matrix(buf);
            let (width, height) = video.unwrap_or((0, 0));
            buf.put_u32(width << 16);
            buf.put_u32(height << 16);
        });
    }

    fn write_video_trak(&self, buf: &mut BytesMut) {
        let video = &self.video;
        write_box(buf, b"trak", |buf| {
            self.write_tkhd(buf, VIDEO_TRACK_ID, Some((video.width, video.height)));
            write_box(buf, b"mdia", |buf| {
                write_mdhd(buf, video.timescale);
                write_hdlr(buf, b"vide", b"VideoHandler");
                write_box(buf, b"minf", |buf| {
                    write_full_box(buf, b"vmhd", 0, 1, |buf| {
                        buf.put_u16(0); // graphics mode
                        buf.put_slice(&[0; 6]); // opcolor
                    });
                    write_dinf(buf);
                    write_box(buf, b"stbl", |buf| {
                        write_full_box(buf, b"stsd", 0, 0, |buf| {
                            buf.put_u32(1);
                            write_visual_entry(buf, video);
                        });
                        write_empty_tables(buf);
                    });
                });
            });
        });
    }

    fn write_audio_trak(&self, buf: &mut BytesMut, audio: &AudioEntry) {
        write_box(buf, b"trak", |buf| {
            self.write_tkhd(buf, AUDIO_TRACK_ID, None);
            write_box(buf, b"mdia", |buf| {
                write_mdhd(buf, audio.timescale);
                write_hdlr(buf, b"soun", b"SoundHandler");
                write_box(buf, b"minf", |buf| {
                    write_full_box(buf, b"smhd", 0, 0, |buf| {
                        buf.put_u16(0); // balance
                        buf.put_u16(0);
                    });
                    write_dinf(buf);
                    write_box(buf, b"stbl", |buf| {
                        write_full_box(buf, b"stsd", 0, 0, |buf| {
                            buf.put_u32(1);
                            write_audio_entry(buf, audio);
                        });
                        write_empty_tables(buf);
                    });
                });
            });
        });
    }
}

impl Default for InitSegmentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn write_mdhd(buf: &mut BytesMut, timescale: u32) {
    write_full_box(buf, b"mdhd", 1, 0, |buf| {
        buf.put_u64(0);
        buf.put_u64(0);
        buf.put_u32(timescale);
        buf.put_u64(0); // duration lives in the fragments
        buf.put_u16(0x55C4); // language: und
        buf.put_u16(0);
    });
}

fn write_hdlr(buf: &mut BytesMut, handler: &[u8; 4], name: &[u8]) {
    write_full_box(buf, b"hdlr", 0, 0, |buf| {
        buf.put_u32(0); // pre_defined
        buf.put_slice(handler);
        buf.put_slice(&[0; 12]);
        buf.put_slice(name);
        buf.put_u8(0);
    });
}

fn write_dinf(buf: &mut BytesMut) {
    write_box(buf, b"dinf", |buf| {
        write_full_box(buf, b"dref", 0, 0, |buf| {
            buf.put_u32(1);
            // self-contained
            write_full_box(buf, b"url ", 0, 1, |_| {});
        });
    });
}

fn write_visual_entry(buf: &mut BytesMut, video: &VideoEntry) {
    write_box(buf, &video.codec, |buf| {
        buf.put_slice(&[0; 6]);
        buf.put_u16(1); // data reference index
        buf.put_slice(&[0; 16]); // pre_defined + reserved
        buf.put_u16(video.width as u16);
        buf.put_u16(video.height as u16);
        buf.put_u32(0x0048_0000); // 72 dpi
        buf.put_u32(0x0048_0000);
        buf.put_u32(0);
        buf.put_u16(1); // frame count
        buf.put_slice(&[0; 32]); // compressor name
        buf.put_u16(0x0018); // depth
        buf.put_i16(-1);

        if let Some(config) = &video.config {
            let name = match &video.codec {
                b"hvc1" | b"hev1" => b"hvcC",
                _ => b"avcC",
            };
            write_box(buf, name, |buf| buf.put_slice(config));
        }
    });
}

fn write_audio_entry(buf: &mut BytesMut, audio: &AudioEntry) {
    write_box(buf, b"mp4a", |buf| {
        buf.put_slice(&[0; 6]);
        buf.put_u16(1); // data reference index
        buf.put_u64(0);
        buf.put_u16(audio.channels);
        buf.put_u16(16); // sample size
        buf.put_u16(0);
        buf.put_u16(0);
        buf.put_u32(audio.sample_rate << 16);

        if let Some(esds) = &audio.esds {
            write_box(buf, b"esds", |buf| buf.put_slice(esds));
        }
    });
}

fn write_empty_tables(buf: &mut BytesMut) {
    for name in [b"stts", b"stsc", b"stco"] {
        write_full_box(buf, name, 0, 0, |buf| buf.put_u32(0));
    }
    write_full_box(buf, b"stsz", 0, 0, |buf| {
        buf.put_u32(0);
        buf.put_u32(0);
    });
}

fn write_trex(buf: &mut BytesMut, track_id: u32) {
    write_full_box(buf, b"trex", 0, 0, |buf| {
        buf.put_u32(track_id);
        buf.put_u32(1); // default sample description index
        buf.put_u32(0);
        buf.put_u32(0);
        buf.put_u32(0);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mp4::Mp4File;
    use std::io::Cursor;

    #[test]
    fn test_init_segment_parses_back() {
        let data = InitSegmentBuilder::new()
            .timescale(30000)
            .dimensions(1280, 720)
            .video_codec(*b"avc1", vec![1, 0x64, 0, 0x1f, 0xff])
            .with_audio(48000, 2, 48000)
            .audio_codec(vec![0, 0, 0, 0, 3, 0x19])
            .build();

        assert_eq!(&data[4..8], b"ftyp");

        let mp4 = Mp4File::parse(&mut Cursor::new(data)).unwrap();
        let video = mp4.video_track().unwrap();
        let audio = mp4.audio_track().unwrap();

        assert_eq!(video.track_id, VIDEO_TRACK_ID);
        assert_eq!(video.timescale, 30000);
        assert_eq!((video.width, video.height), (Some(1280), Some(720)));
        assert_eq!(video.codec, Some(*b"avc1"));
        assert_eq!(video.codec_data.as_deref(), Some(&[1, 0x64, 0, 0x1f, 0xff][..]));

        assert_eq!(audio.track_id, AUDIO_TRACK_ID);
        assert_eq!(audio.channels, Some(2));
        assert_eq!(audio.sample_rate, Some(48000));
        assert_eq!(audio.codec, Some(*b"mp4a"));
    }

    #[test]
    fn test_video_only_init_segment() {
        let data = InitSegmentBuilder::new()
            .audio_codec(vec![1, 2, 3])
            .build();
        let mp4 = Mp4File::parse(&mut Cursor::new(data)).unwrap();

        assert!(mp4.audio_track().is_none());
        assert_eq!(mp4.tracks.len(), 1);
    }

    #[test]
    fn test_hevc_config_box_name() {
        let data = InitSegmentBuilder::new()
            .video_codec(*b"hvc1", vec![9, 9])
            .build();

        assert!(data.windows(4).any(|w| w == b"hvcC"));
        assert!(!data.windows(4).any(|w| w == b"avcC"));
    }
}
