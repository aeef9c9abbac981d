//! Movie fragment (moof + mdat) builder.

use super::{write_box, write_full_box};
use bytes::{BufMut, BytesMut};

/// trun flags: data-offset, sample-duration, sample-size, sample-flags,
/// sample-composition-time-offset.
const TRUN_FLAGS: u32 = 0x000001 | 0x000100 | 0x000200 | 0x000400 | 0x000800;

/// tfhd flags: default-base-is-moof.
const TFHD_FLAGS: u32 = 0x020000;

const SYNC_SAMPLE_FLAGS: u32 = 0x0200_0000;
const NON_SYNC_SAMPLE_FLAGS: u32 = 0x0101_0000;

/// Per-sample fields carried in a trun.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentSample {
    pub size: u32,
    /// Duration in the track's timescale.
    pub duration: u32,
    /// Presentation minus decode time, in the track's timescale.
    pub composition_offset: i32,
    pub is_sync: bool,
}

struct TrackRun {
    track_id: u32,
    base_media_decode_time: u64,
    samples: Vec<FragmentSample>,
}

/// Builder for one movie fragment holding any number of track runs.
///
/// Sample payloads are expected in the mdat in the same order the tracks
/// were added.
pub struct MoofBuilder {
    sequence_number: u32,
    runs: Vec<TrackRun>,
}

impl MoofBuilder {
    pub fn new(sequence_number: u32) -> Self {
        Self {
            sequence_number,
            runs: Vec::new(),
        }
    }

    /// Add a track run. Empty runs are skipped.
    pub fn track(
        mut self,
        track_id: u32,
        base_media_decode_time: u64,
        samples: Vec<FragmentSample>,
    ) -> Self {
        if !samples.is_empty() {
            self.runs.push(TrackRun {
                track_id,
                base_media_decode_time,
                samples,
            });
        }
        self
    }

    /// Total payload bytes the mdat must carry.
    pub fn payload_size(&self) -> u64 {
        self.runs
            .iter()
            .flat_map(|run| run.samples.iter())
            .map(|s| s.size as u64)
            .sum()
    }

    /// Serialize the moof box followed by the mdat header. Sample data
    /// must be appended directly after the returned bytes.
    pub fn build(self) -> Vec<u8> {
        let payload = self.payload_size();
        let mdat_header_len: usize = if payload + 8 > u32::MAX as u64 { 16 } else { 8 };

        let mut buf = BytesMut::with_capacity(
            256 + self.runs.iter().map(|r| r.samples.len() * 16).sum::<usize>(),
        );
        let mut offset_fields = Vec::with_capacity(self.runs.len());

        write_box(&mut buf, b"moof", |buf| {
            write_full_box(buf, b"mfhd", 0, 0, |buf| buf.put_u32(self.sequence_number));
            for run in &self.runs {
                write_box(buf, b"traf", |buf| {
                    write_full_box(buf, b"tfhd", 0, TFHD_FLAGS, |buf| buf.put_u32(run.track_id));
                    write_full_box(buf, b"tfdt", 1, 0, |buf| {
                        buf.put_u64(run.base_media_decode_time)
                    });
                    // Version 1 makes composition offsets signed.
                    write_full_box(buf, b"trun", 1, TRUN_FLAGS, |buf| {
                        buf.put_u32(run.samples.len() as u32);
                        offset_fields.push(buf.len());
                        buf.put_i32(0);
                        for sample in &run.samples {
                            buf.put_u32(sample.duration);
                            buf.put_u32(sample.size);
                            buf.put_u32(if sample.is_sync {
                                SYNC_SAMPLE_FLAGS
                            } else {
                                NON_SYNC_SAMPLE_FLAGS
                            });
                            buf.put_i32(sample.composition_offset);
                        }
                    });
                });
            }
        });

        // Offsets are relative to the moof start, which is the buffer start.
        let mut data_offset = buf.len() + mdat_header_len;
        for (field, run) in offset_fields.iter().zip(&self.runs) {
            buf[*field..*field + 4].copy_from_slice(&(data_offset as i32).to_be_bytes());
            data_offset += run.samples.iter().map(|s| s.size as usize).sum::<usize>();
        }

        if mdat_header_len == 16 {
            buf.put_u32(1);
            buf.put_slice(b"mdat");
            buf.put_u64(payload + 16);
        } else {
            buf.put_u32((payload + 8) as u32);
            buf.put_slice(b"mdat");
        }

        buf.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn be_u32(data: &[u8], at: usize) -> u32 {
        u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
    }

    fn sample(size: u32, is_sync: bool) -> FragmentSample {
        FragmentSample {
            size,
            duration: 3000,
            composition_offset: 0,
            is_sync,
        }
    }

    fn trun_offsets(data: &[u8]) -> Vec<u32> {
        data.windows(4)
            .enumerate()
            .filter(|(_, w)| *w == b"trun")
            // name, version/flags, sample count, then data offset
            .map(|(at, _)| be_u32(data, at + 12))
            .collect()
    }

    #[test]
    fn test_single_track_fragment() {
        let header = MoofBuilder::new(1)
            .track(1, 0, vec![sample(1000, true), sample(500, false)])
            .build();

        assert_eq!(&header[4..8], b"moof");
        let moof_size = be_u32(&header, 0) as usize;
        assert_eq!(&header[moof_size + 4..moof_size + 8], b"mdat");
        assert_eq!(be_u32(&header, moof_size), 1500 + 8);
        assert_eq!(header.len(), moof_size + 8);
        assert_eq!(trun_offsets(&header), vec![(moof_size + 8) as u32]);
    }

    #[test]
    fn test_second_track_data_follows_first() {
        let header = MoofBuilder::new(7)
            .track(1, 90000, vec![sample(100, true), sample(200, false)])
            .track(2, 48000, vec![sample(10, true)])
            .build();

        let moof_size = be_u32(&header, 0) as usize;
        let offsets = trun_offsets(&header);

        assert_eq!(offsets.len(), 2);
        assert_eq!(offsets[0] as usize, moof_size + 8);
        assert_eq!(offsets[1] as usize, moof_size + 8 + 300);
        assert_eq!(be_u32(&header, moof_size), 310 + 8);
        // mfhd sequence number
        assert_eq!(be_u32(&header, 20), 7);
    }

    #[test]
    fn test_empty_runs_are_dropped() {
        let builder = MoofBuilder::new(1).track(1, 0, vec![]).track(2, 0, vec![sample(4, true)]);
        assert_eq!(builder.payload_size(), 4);

        let header = builder.build();
        assert_eq!(header.windows(4).filter(|w| *w == b"traf").count(), 1);
    }
}
