//! MP4 file reader with atom parsing.

use super::{Atom, AtomType, HandlerType, Mp4File, SampleTableBuilder, TrackInfo};
use crate::Result;
use std::io::{Read, Seek, SeekFrom};

/// Maximum allowed atom data size (64 MB) to prevent OOM on malformed files.
const MAX_ATOM_DATA_SIZE: u64 = 64 * 1024 * 1024;

/// Offset of the first child box inside a VisualSampleEntry, relative to
/// the stsd payload.
const VISUAL_ENTRY_CHILDREN: usize = 94;

/// Offset of the first child box inside an AudioSampleEntry, relative to
/// the stsd payload.
const AUDIO_ENTRY_CHILDREN: usize = 44;

fn be_u16(data: &[u8], at: usize) -> Option<u16> {
    data.get(at..at + 2).map(|b| u16::from_be_bytes([b[0], b[1]]))
}

fn be_u32(data: &[u8], at: usize) -> Option<u32> {
    data.get(at..at + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

fn be_u64(data: &[u8], at: usize) -> Option<u64> {
    data.get(at..at + 8).map(|b| {
        u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
    })
}

/// Parse a full-box table of fixed-size records following a u32 entry count.
fn table<T>(data: &[u8], record: usize, parse: impl Fn(&[u8], usize) -> Option<T>) -> Vec<T> {
    let count = be_u32(data, 4).unwrap_or(0) as usize;
    (0..count)
        .map_while(|i| parse(data, 8 + i * record))
        .collect()
}

/// Find the payload of the first child box named `name`, scanning from `start`.
fn find_child<'a>(data: &'a [u8], start: usize, name: &[u8; 4]) -> Option<&'a [u8]> {
    let mut pos = start;
    while pos + 8 <= data.len() {
        let size = be_u32(data, pos)? as usize;
        if size < 8 || pos + size > data.len() {
            return None;
        }
        if &data[pos + 4..pos + 8] == name {
            return Some(&data[pos + 8..pos + size]);
        }
        pos += size;
    }
    None
}

/// MP4 file reader.
pub struct Mp4Reader<R> {
    reader: R,
    file_size: u64,
}

impl<R: Read + Seek> Mp4Reader<R> {
    /// Create a new MP4 reader.
    pub fn new(mut reader: R) -> Self {
        let file_size = reader.seek(SeekFrom::End(0)).unwrap_or(0);
        let _ = reader.seek(SeekFrom::Start(0));
        Self { reader, file_size }
    }

    /// Parse the MP4 file.
    pub fn parse(&mut self) -> Result<Mp4File> {
        let mut mp4 = Mp4File {
            duration: 0,
            timescale: 1000,
            tracks: Vec::new(),
            has_faststart: false,
        };

        let mut moov_offset = None;
        let mut mdat_offset = None;

        for atom in self.read_atoms(0, self.file_size)? {
            match atom.atom_type {
                AtomType::MOOV => {
                    moov_offset = Some(atom.start());
                    self.parse_moov(&atom, &mut mp4)?;
                }
                AtomType::MDAT => mdat_offset = Some(atom.start()),
                _ => {}
            }
        }

        let Some(moov_offset) = moov_offset else {
            return Err(crate::Error::invalid_mp4("no moov atom"));
        };
        mp4.has_faststart = mdat_offset.map_or(true, |mdat| moov_offset < mdat);

        Ok(mp4)
    }

    /// Read sibling atoms between `start` and `end`.
    fn read_atoms(&mut self, start: u64, end: u64) -> Result<Vec<Atom>> {
        let mut atoms = Vec::new();
        let mut pos = start;

        while pos + 8 <= end {
            self.reader.seek(SeekFrom::Start(pos))?;

            let mut header = [0u8; 8];
            if self.reader.read_exact(&mut header).is_err() {
                break;
            }

            let size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as u64;
            let atom_type = AtomType::from_bytes([header[4], header[5], header[6], header[7]]);

            let (actual_size, header_size) = match size {
                1 => {
                    let mut ext = [0u8; 8];
                    self.reader.read_exact(&mut ext)?;
                    (u64::from_be_bytes(ext), 16u8)
                }
                0 => (end - pos, 8u8),
                _ => (size, 8u8),
            };

            if actual_size < header_size as u64 {
                break;
            }

            atoms.push(Atom {
                atom_type,
                size: actual_size,
                data_offset: pos + header_size as u64,
                header_size,
            });

            pos += actual_size;
        }

        Ok(atoms)
    }

    /// Read atom payload, rejecting oversized atoms.
    fn read_atom_data(&mut self, atom: &Atom) -> Result<Vec<u8>> {
        let size = atom.data_size();
        if size > MAX_ATOM_DATA_SIZE {
            return Err(crate::Error::invalid_mp4(format!(
                "Atom {} data size {} exceeds maximum {}",
                atom.atom_type, size, MAX_ATOM_DATA_SIZE
            )));
        }
        self.reader.seek(SeekFrom::Start(atom.data_offset))?;
        let mut data = vec![0u8; size as usize];
        self.reader.read_exact(&mut data)?;
        Ok(data)
    }

    fn parse_moov(&mut self, moov: &Atom, mp4: &mut Mp4File) -> Result<()> {
        for child in self.read_atoms(moov.data_offset, moov.end())? {
            match child.atom_type {
                AtomType::MVHD => self.parse_mvhd(&child, mp4)?,
                AtomType::TRAK => match self.parse_trak(&child) {
                    Ok(track) if !matches!(track.handler_type, HandlerType::Unknown(_)) => {
                        mp4.tracks.push(track);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(offset = child.start(), error = %e, "Skipping unreadable trak");
                    }
                },
                _ => {}
            }
        }

        Ok(())
    }

    fn parse_mvhd(&mut self, atom: &Atom, mp4: &mut Mp4File) -> Result<()> {
        let data = self.read_atom_data(atom)?;

        match data.first() {
            Some(0) => {
                mp4.timescale = be_u32(&data, 12).unwrap_or(mp4.timescale);
                mp4.duration = be_u32(&data, 16).map(u64::from).unwrap_or(0);
            }
            Some(_) => {
                mp4.timescale = be_u32(&data, 20).unwrap_or(mp4.timescale);
                mp4.duration = be_u64(&data, 24).unwrap_or(0);
            }
            None => {}
        }

        Ok(())
    }

    fn parse_trak(&mut self, trak: &Atom) -> Result<TrackInfo> {
        let mut track = TrackInfo::new(0);

        for child in self.read_atoms(trak.data_offset, trak.end())? {
            match child.atom_type {
                AtomType::TKHD => self.parse_tkhd(&child, &mut track)?,
                AtomType::MDIA => self.parse_mdia(&child, &mut track)?,
                _ => {}
            }
        }

        Ok(track)
    }

    fn parse_tkhd(&mut self, atom: &Atom, track: &mut TrackInfo) -> Result<()> {
        let data = self.read_atom_data(atom)?;

        // Version 1 widens the creation/modification times and duration.
        let (id_at, size_at) = match data.first() {
            Some(0) => (12, 76),
            Some(_) => (20, 88),
            None => return Ok(()),
        };

        if let Some(id) = be_u32(&data, id_at) {
            track.track_id = id;
        }
        // 16.16 fixed point
        if let (Some(w), Some(h)) = (be_u32(&data, size_at), be_u32(&data, size_at + 4)) {
            track.width = Some(w >> 16);
            track.height = Some(h >> 16);
        }

        Ok(())
    }

    fn parse_mdia(&mut self, mdia: &Atom, track: &mut TrackInfo) -> Result<()> {
        let children = self.read_atoms(mdia.data_offset, mdia.end())?;

        // hdlr decides how stsd is interpreted, so it goes first regardless of
        // the order the muxer wrote the boxes in.
        for child in children.iter().filter(|c| c.atom_type != AtomType::MINF) {
            match child.atom_type {
                AtomType::MDHD => self.parse_mdhd(child, track)?,
                AtomType::HDLR => self.parse_hdlr(child, track)?,
                _ => {}
            }
        }
        for child in children.iter().filter(|c| c.atom_type == AtomType::MINF) {
            self.parse_minf(child, track)?;
        }

        Ok(())
    }

    fn parse_mdhd(&mut self, atom: &Atom, track: &mut TrackInfo) -> Result<()> {
        let data = self.read_atom_data(atom)?;

        match data.first() {
            Some(0) => {
                track.timescale = be_u32(&data, 12).unwrap_or(track.timescale);
                track.duration = be_u32(&data, 16).map(u64::from).unwrap_or(0);
            }
            Some(_) => {
                track.timescale = be_u32(&data, 20).unwrap_or(track.timescale);
                track.duration = be_u64(&data, 24).unwrap_or(0);
            }
            None => {}
        }

        Ok(())
    }

    fn parse_hdlr(&mut self, atom: &Atom, track: &mut TrackInfo) -> Result<()> {
        let data = self.read_atom_data(atom)?;

        if data.len() >= 12 {
            track.handler_type = HandlerType::from_bytes([data[8], data[9], data[10], data[11]]);
        }

        Ok(())
    }

    fn parse_minf(&mut self, minf: &Atom, track: &mut TrackInfo) -> Result<()> {
        for child in self.read_atoms(minf.data_offset, minf.end())? {
            if child.atom_type == AtomType::STBL {
                self.parse_stbl(&child, track)?;
            }
        }

        Ok(())
    }

    fn parse_stbl(&mut self, stbl: &Atom, track: &mut TrackInfo) -> Result<()> {
        let mut builder = SampleTableBuilder::new();

        for child in self.read_atoms(stbl.data_offset, stbl.end())? {
            if child.atom_type == AtomType::STSD {
                self.parse_stsd(&child, track)?;
                continue;
            }

            let data = match child.atom_type {
                AtomType::STTS
                | AtomType::STSS
                | AtomType::STSC
                | AtomType::STSZ
                | AtomType::STCO
                | AtomType::CO64
                | AtomType::CTTS => self.read_atom_data(&child)?,
                _ => continue,
            };

            match child.atom_type {
                AtomType::STTS => builder.set_stts(table(&data, 8, |d, at| {
                    Some((be_u32(d, at)?, be_u32(d, at + 4)?))
                })),
                AtomType::STSS => builder.set_sync_samples(table(&data, 4, be_u32)),
                AtomType::STSC => builder.set_stsc(table(&data, 12, |d, at| {
                    Some((be_u32(d, at)?, be_u32(d, at + 4)?, be_u32(d, at + 8)?))
                })),
                AtomType::STSZ => {
                    let uniform = be_u32(&data, 4).unwrap_or(0);
                    let count = be_u32(&data, 8).unwrap_or(0) as usize;
                    let sizes = if uniform == 0 {
                        (0..count).map_while(|i| be_u32(&data, 12 + i * 4)).collect()
                    } else {
                        // Uniform size still needs the count to size the table.
                        vec![uniform; count]
                    };
                    builder.set_stsz(uniform, sizes);
                }
                AtomType::STCO => builder.set_chunk_offsets(table(&data, 4, |d, at| {
                    be_u32(d, at).map(u64::from)
                })),
                AtomType::CO64 => builder.set_chunk_offsets(table(&data, 8, be_u64)),
                AtomType::CTTS => {
                    // Version 0 stores unsigned offsets; in practice writers put
                    // signed values there too, so both are read as i32.
                    builder.set_ctts(table(&data, 8, |d, at| {
                        Some((be_u32(d, at)?, be_u32(d, at + 4)? as i32))
                    }))
                }
                _ => {}
            }
        }

        track.sample_table = builder.build();
        Ok(())
    }

    /// Parse stsd: codec four-cc, audio layout and codec configuration.
    fn parse_stsd(&mut self, atom: &Atom, track: &mut TrackInfo) -> Result<()> {
        let data = self.read_atom_data(atom)?;

        if data.len() < 16 {
            return Ok(());
        }

        // version/flags (4), entry count (4), then the first entry's box header.
        track.codec = Some([data[12], data[13], data[14], data[15]]);

        if track.handler_type.is_audio() && data.len() >= AUDIO_ENTRY_CHILDREN {
            track.channels = be_u16(&data, 32);
            track.sample_rate = be_u32(&data, 40).map(|rate| rate >> 16);
            track.codec_data = find_child(&data, AUDIO_ENTRY_CHILDREN, b"esds")
                .filter(|esds| esds.len() > 4)
                .map(<[u8]>::to_vec);
        }

        if track.handler_type.is_video() && data.len() > VISUAL_ENTRY_CHILDREN {
            track.codec_data = find_child(&data, VISUAL_ENTRY_CHILDREN, b"avcC")
                .or_else(|| find_child(&data, VISUAL_ENTRY_CHILDREN, b"hvcC"))
                .map(<[u8]>::to_vec);
        }

        Ok(())
    }
}
