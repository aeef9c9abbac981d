//! Sample table resolution.
//!
//! A progressive MP4 spreads per-sample facts across several run-length
//! tables (`stts`, `ctts`, `stsc`, `stsz`, `stco`/`co64`, `stss`). The
//! builder collects them as parsed and [`SampleTableBuilder::build`] flattens
//! them into one [`SampleEntry`] per sample, in decode order.

use std::collections::HashSet;

/// One sample with its byte range and decode timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleEntry {
    /// Zero-based position in decode order.
    pub index: u32,
    /// Absolute file offset of the sample bytes.
    pub offset: u64,
    pub size: u32,
    /// Decode time in the track timescale.
    pub dts: u64,
    pub duration: u32,
    /// Composition offset from `ctts`; may be negative (version 1 boxes).
    pub cts_offset: i32,
    pub is_keyframe: bool,
}

impl SampleEntry {
    /// Presentation time in the track timescale. Negative values are kept so
    /// callers can shift them rather than collapse several frames onto zero.
    pub fn pts(&self) -> i64 {
        self.dts as i64 + i64::from(self.cts_offset)
    }
}

/// Resolved samples of a single track.
#[derive(Debug, Clone, Default)]
pub struct SampleTable {
    pub samples: Vec<SampleEntry>,
}

impl SampleTable {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SampleEntry> {
        self.samples.iter()
    }
}

/// Accumulates raw `stbl` tables until all of them have been read.
#[derive(Debug, Default)]
pub struct SampleTableBuilder {
    /// `(sample_count, sample_delta)`
    stts: Vec<(u32, u32)>,
    /// 1-based sample numbers; empty means every sample is sync.
    stss: Vec<u32>,
    /// `(first_chunk, samples_per_chunk, description_index)`, chunks 1-based.
    stsc: Vec<(u32, u32, u32)>,
    uniform_size: u32,
    sizes: Vec<u32>,
    chunk_offsets: Vec<u64>,
    /// `(sample_count, offset)`
    ctts: Vec<(u32, i32)>,
}

impl SampleTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_stts(&mut self, entries: Vec<(u32, u32)>) {
        self.stts = entries;
    }

    pub fn set_sync_samples(&mut self, samples: Vec<u32>) {
        self.stss = samples;
    }

    pub fn set_stsc(&mut self, entries: Vec<(u32, u32, u32)>) {
        self.stsc = entries;
    }

    /// `uniform_size > 0` overrides the per-sample list.
    pub fn set_stsz(&mut self, uniform_size: u32, sizes: Vec<u32>) {
        self.uniform_size = uniform_size;
        self.sizes = sizes;
    }

    pub fn set_chunk_offsets(&mut self, offsets: Vec<u64>) {
        self.chunk_offsets = offsets;
    }

    pub fn set_ctts(&mut self, entries: Vec<(u32, i32)>) {
        self.ctts = entries;
    }

    fn sample_count(&self) -> usize {
        if self.uniform_size > 0 {
            let timed: usize = self.stts.iter().map(|&(n, _)| n as usize).sum();
            timed.max(self.sizes.len())
        } else {
            self.sizes.len()
        }
    }

    fn size_of(&self, sample: usize) -> u32 {
        if self.uniform_size > 0 {
            self.uniform_size
        } else {
            self.sizes.get(sample).copied().unwrap_or(0)
        }
    }

    /// Zero-based chunk index of every sample.
    fn chunk_of_each(&self, count: usize) -> Vec<usize> {
        let chunks = self.chunk_offsets.len();
        let mut out = Vec::with_capacity(count);

        for (i, &(first, per_chunk, _)) in self.stsc.iter().enumerate() {
            let end = self
                .stsc
                .get(i + 1)
                .map_or(chunks, |next| (next.0 as usize).saturating_sub(1))
                .min(chunks);
            for chunk in (first as usize).saturating_sub(1)..end {
                let room = count - out.len();
                out.extend(std::iter::repeat(chunk).take((per_chunk as usize).min(room)));
            }
        }

        let last = out.last().copied().unwrap_or(0);
        out.resize(count, last);
        out
    }

    /// Resolve every table into per-sample entries.
    pub fn build(self) -> SampleTable {
        let count = self.sample_count();
        if count == 0 {
            return SampleTable::default();
        }

        let fallback_delta = self.stts.last().map_or(1, |&(_, d)| d);
        let durations = expand_runs(&self.stts, count, fallback_delta);
        let cts = expand_runs(&self.ctts, count, 0);
        let chunk_of = self.chunk_of_each(count);
        let sync: HashSet<u32> = self.stss.iter().copied().collect();

        let mut fill = vec![0u64; self.chunk_offsets.len()];
        let mut dts = 0u64;
        let samples = (0..count)
            .map(|i| {
                let size = self.size_of(i);
                let chunk = chunk_of[i];
                let base = self.chunk_offsets.get(chunk).copied().unwrap_or(0);
                let within = fill.get_mut(chunk);
                let offset = base + within.as_deref().copied().unwrap_or(0);
                if let Some(within) = within {
                    *within += u64::from(size);
                }

                let entry = SampleEntry {
                    index: i as u32,
                    offset,
                    size,
                    dts,
                    duration: durations[i],
                    cts_offset: cts[i],
                    is_keyframe: sync.is_empty() || sync.contains(&(i as u32 + 1)),
                };
                dts += u64::from(durations[i]);
                entry
            })
            .collect();

        SampleTable { samples }
    }
}

/// Expand `(count, value)` runs into exactly `len` values, padding with `pad`.
fn expand_runs<T: Copy>(runs: &[(u32, T)], len: usize, pad: T) -> Vec<T> {
    let mut out: Vec<T> = runs
        .iter()
        .flat_map(|&(n, v)| std::iter::repeat(v).take(n as usize))
        .take(len)
        .collect();
    out.resize(len, pad);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets_and_timing() {
        let mut builder = SampleTableBuilder::new();
        builder.set_stts(vec![(2, 1000), (1, 500)]);
        builder.set_sync_samples(vec![1]);
        builder.set_stsc(vec![(1, 3, 1)]);
        builder.set_stsz(0, vec![100, 200, 150]);
        builder.set_chunk_offsets(vec![1000]);

        let table = builder.build();

        let offsets: Vec<u64> = table.iter().map(|s| s.offset).collect();
        assert_eq!(offsets, vec![1000, 1100, 1300]);
        let dts: Vec<u64> = table.iter().map(|s| s.dts).collect();
        assert_eq!(dts, vec![0, 1000, 2000]);
        assert_eq!(table.samples[2].duration, 500);
        assert!(table.samples[0].is_keyframe);
        assert!(!table.samples[1].is_keyframe);
    }

    #[test]
    fn test_one_sample_per_chunk() {
        let mut builder = SampleTableBuilder::new();
        builder.set_stts(vec![(3, 1024)]);
        builder.set_stsc(vec![(1, 1, 1)]);
        builder.set_stsz(0, vec![10, 20, 30]);
        builder.set_chunk_offsets(vec![40, 400, 4000]);

        let table = builder.build();
        let offsets: Vec<u64> = table.iter().map(|s| s.offset).collect();

        assert_eq!(offsets, vec![40, 400, 4000]);
    }

    #[test]
    fn test_uniform_size_and_missing_stss() {
        let mut builder = SampleTableBuilder::new();
        builder.set_stts(vec![(4, 1024)]);
        builder.set_stsc(vec![(1, 2, 1)]);
        builder.set_stsz(10, Vec::new());
        builder.set_chunk_offsets(vec![500, 900]);

        let table = builder.build();
        let offsets: Vec<u64> = table.iter().map(|s| s.offset).collect();

        assert_eq!(table.len(), 4);
        assert_eq!(offsets, vec![500, 510, 900, 910]);
        assert!(table.iter().all(|s| s.is_keyframe));
    }

    #[test]
    fn test_negative_composition_offset() {
        let mut builder = SampleTableBuilder::new();
        builder.set_stts(vec![(3, 100)]);
        builder.set_stsc(vec![(1, 3, 1)]);
        builder.set_stsz(0, vec![1, 1, 1]);
        builder.set_chunk_offsets(vec![0]);
        builder.set_ctts(vec![(1, 200), (2, -150)]);

        let pts: Vec<i64> = builder.build().iter().map(|s| s.pts()).collect();

        assert_eq!(pts, vec![200, -50, 50]);
    }

    #[test]
    fn test_empty_tables() {
        assert!(SampleTableBuilder::new().build().is_empty());
    }
}
