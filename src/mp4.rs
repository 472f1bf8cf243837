// ISO-BMFF / QuickTime box walking and in-place PCM audio patching

use crate::error::{CodecError, Result};
use crate::pcm::{decode_samples, encode_samples, PcmBuffer, SampleFormat};

/// Read a 16-bit big-endian integer
fn read_u16_be(buf: &[u8], pos: usize) -> u16 {
    u16::from_be_bytes([buf[pos], buf[pos + 1]])
}

/// Read a 32-bit big-endian integer
fn read_u32_be(buf: &[u8], pos: usize) -> u32 {
    u32::from_be_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]])
}

/// Read a 64-bit big-endian integer
fn read_u64_be(buf: &[u8], pos: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[pos..pos + 8]);
    u64::from_be_bytes(b)
}

pub fn is_iso_bmff(bytes: &[u8]) -> bool {
    bytes.len() >= 8 && &bytes[4..8] == b"ftyp"
}

#[derive(Debug, Clone, Copy)]
struct BoxHeader {
    kind: [u8; 4],
    body_start: usize,
    end: usize,
}

impl BoxHeader {
    fn body<'a>(&self, buf: &'a [u8]) -> &'a [u8] {
        &buf[self.body_start..self.end]
    }
}

fn kind_str(kind: &[u8; 4]) -> String {
    String::from_utf8_lossy(kind).into_owned()
}

/// Parse the sibling boxes laid out in `buf[start..end]`.
fn child_boxes(buf: &[u8], start: usize, end: usize) -> Result<Vec<BoxHeader>> {
    let mut out = Vec::new();
    let mut pos = start;
    while pos + 8 <= end {
        let size32 = read_u32_be(buf, pos) as u64;
        let mut kind = [0u8; 4];
        kind.copy_from_slice(&buf[pos + 4..pos + 8]);

        let (size, header) = match size32 {
            // Box extends to the end of its parent
            0 => ((end - pos) as u64, 8),
            // 64-bit largesize follows the type
            1 => {
                if pos + 16 > end {
                    return Err(CodecError::CorruptMedia(format!(
                        "truncated largesize header for '{}' box",
                        kind_str(&kind)
                    )));
                }
                (read_u64_be(buf, pos + 8), 16)
            }
            n => (n, 8),
        };

        let box_end = (pos as u64).checked_add(size).unwrap_or(u64::MAX);
        if size < header as u64 || box_end > end as u64 {
            return Err(CodecError::CorruptMedia(format!(
                "'{}' box at byte {} has invalid size {}",
                kind_str(&kind),
                pos,
                size
            )));
        }

        out.push(BoxHeader {
            kind,
            body_start: pos + header,
            end: box_end as usize,
        });
        pos = box_end as usize;
    }
    // Fewer than 8 trailing bytes (e.g. a QuickTime terminator) are ignored.
    Ok(out)
}

fn find_child(buf: &[u8], parent: &BoxHeader, kind: &[u8; 4]) -> Result<Option<BoxHeader>> {
    Ok(child_boxes(buf, parent.body_start, parent.end)?
        .into_iter()
        .find(|b| &b.kind == kind))
}

fn require_child(buf: &[u8], parent: &BoxHeader, kind: &[u8; 4]) -> Result<BoxHeader> {
    find_child(buf, parent, kind)?.ok_or_else(|| {
        CodecError::CorruptMedia(format!(
            "'{}' box missing inside '{}'",
            kind_str(kind),
            kind_str(&parent.kind)
        ))
    })
}

fn require_len(body: &[u8], needed: usize, kind: &str) -> Result<()> {
    if body.len() < needed {
        return Err(CodecError::CorruptMedia(format!(
            "'{}' box too short: {} bytes, need {}",
            kind,
            body.len(),
            needed
        )));
    }
    Ok(())
}

/// Raw PCM audio track laid out as chunks inside the file.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmTrack {
    pub format: SampleFormat,
    pub channels: u16,
    pub sample_rate: u32,
    /// (byte offset, byte length) of each chunk, in presentation order.
    pub chunks: Vec<(usize, usize)>,
}

impl PcmTrack {
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * self.format.bytes_per_sample()
    }

    pub fn frames(&self) -> usize {
        self.chunks.iter().map(|&(_, len)| len).sum::<usize>() / self.frame_bytes()
    }
}

/// The first sound track of a movie.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioTrack {
    /// Uncompressed samples that can be rewritten in place.
    Pcm(PcmTrack),
    /// Anything else, identified by its sample entry code.
    Other { codec: String },
}

struct SampleEntry {
    codec: [u8; 4],
    channels: u16,
    sample_size: u16,
    sample_rate: u32,
}

fn parse_stsd(body: &[u8]) -> Result<SampleEntry> {
    // version/flags, entry_count, then the first sample entry
    require_len(body, 8 + 36, "stsd")?;
    let entry = &body[8..];
    let mut codec = [0u8; 4];
    codec.copy_from_slice(&entry[4..8]);
    // size(4) format(4) reserved(6) data_ref_index(2) version(2) revision(2) vendor(4)
    let channels = read_u16_be(entry, 24);
    let sample_size = read_u16_be(entry, 26);
    // 16.16 fixed point
    let sample_rate = read_u32_be(entry, 32) >> 16;
    Ok(SampleEntry {
        codec,
        channels,
        sample_size,
        sample_rate,
    })
}

fn parse_u32_table(body: &[u8], kind: &str, entry_words: usize, skip: usize) -> Result<Vec<u32>> {
    require_len(body, skip + 4, kind)?;
    let count = read_u32_be(body, skip) as usize;
    let needed = count
        .checked_mul(entry_words * 4)
        .and_then(|n| n.checked_add(skip + 4))
        .ok_or_else(|| CodecError::CorruptMedia(format!("'{}' entry count overflows", kind)))?;
    require_len(body, needed, kind)?;
    Ok((0..count * entry_words)
        .map(|i| read_u32_be(body, skip + 4 + i * 4))
        .collect())
}

fn chunk_offsets(buf: &[u8], stbl: &BoxHeader) -> Result<Vec<u64>> {
    if let Some(stco) = find_child(buf, stbl, b"stco")? {
        return Ok(parse_u32_table(stco.body(buf), "stco", 1, 4)?
            .into_iter()
            .map(u64::from)
            .collect());
    }
    let co64 = require_child(buf, stbl, b"co64")?;
    let body = co64.body(buf);
    require_len(body, 8, "co64")?;
    let count = read_u32_be(body, 4) as usize;
    let needed = count
        .checked_mul(8)
        .and_then(|n| n.checked_add(8))
        .ok_or_else(|| CodecError::CorruptMedia("'co64' entry count overflows".to_string()))?;
    require_len(body, needed, "co64")?;
    Ok((0..count).map(|i| read_u64_be(body, 8 + i * 8)).collect())
}

/// Samples in each chunk, expanded from the run-length `stsc` table.
fn samples_per_chunk(stsc: &[u32], chunk_count: usize) -> Result<Vec<usize>> {
    let runs: Vec<(usize, usize)> = stsc
        .chunks_exact(3)
        .map(|e| (e[0] as usize, e[1] as usize))
        .collect();
    if runs.is_empty() || runs[0].0 != 1 {
        return Err(CodecError::CorruptMedia(
            "'stsc' table must start at chunk 1".to_string(),
        ));
    }
    let mut out = Vec::with_capacity(chunk_count);
    for (i, &(first, per_chunk)) in runs.iter().enumerate() {
        let next_first = runs.get(i + 1).map(|r| r.0).unwrap_or(chunk_count + 1);
        if next_first <= first {
            return Err(CodecError::CorruptMedia(
                "'stsc' entries are not increasing".to_string(),
            ));
        }
        for _ in first..next_first.min(chunk_count + 1) {
            out.push(per_chunk);
        }
    }
    Ok(out)
}

fn parse_pcm_track(
    buf: &[u8],
    stbl: &BoxHeader,
    format: SampleFormat,
    entry: &SampleEntry,
    timescale: u32,
) -> Result<PcmTrack> {
    let sample_rate = if entry.sample_rate > 0 {
        entry.sample_rate
    } else {
        timescale
    };
    if entry.channels == 0 || sample_rate == 0 {
        return Err(CodecError::CorruptMedia(format!(
            "sound sample entry declares {} channels at {} Hz",
            entry.channels, sample_rate
        )));
    }
    let frame_bytes = entry.channels as usize * format.bytes_per_sample();

    let offsets = chunk_offsets(buf, stbl)?;
    let stsc = parse_u32_table(require_child(buf, stbl, b"stsc")?.body(buf), "stsc", 3, 4)?;
    let per_chunk = samples_per_chunk(&stsc, offsets.len())?;

    let stsz = require_child(buf, stbl, b"stsz")?;
    let stsz_body = stsz.body(buf);
    require_len(stsz_body, 12, "stsz")?;
    let uniform_size = read_u32_be(stsz_body, 4) as usize;
    let sizes = if uniform_size == 0 {
        parse_u32_table(stsz_body, "stsz", 1, 8)?
    } else {
        Vec::new()
    };

    let mut chunks = Vec::with_capacity(offsets.len());
    let mut sample_cursor = 0usize;
    for (&offset, &count) in offsets.iter().zip(per_chunk.iter()) {
        let len = if uniform_size == 0 {
            let end = sample_cursor + count;
            if end > sizes.len() {
                return Err(CodecError::CorruptMedia(
                    "'stsz' has fewer entries than 'stsc' describes".to_string(),
                ));
            }
            sizes[sample_cursor..end].iter().map(|&s| s as usize).sum()
        } else if uniform_size == 1 {
            // QuickTime convention: one sample per PCM frame
            count * frame_bytes
        } else {
            count * uniform_size
        };
        sample_cursor += count;

        let offset = offset as usize;
        if offset.checked_add(len).map_or(true, |end| end > buf.len()) {
            return Err(CodecError::CorruptMedia(format!(
                "audio chunk at byte {} ({} bytes) runs past end of file",
                offset, len
            )));
        }
        if len % frame_bytes != 0 {
            return Err(CodecError::CorruptMedia(format!(
                "audio chunk of {} bytes is not a whole number of {}-byte frames",
                len, frame_bytes
            )));
        }
        chunks.push((offset, len));
    }

    Ok(PcmTrack {
        format,
        channels: entry.channels,
        sample_rate,
        chunks,
    })
}

/// Locate the first sound track of a movie. `None` when there is none.
pub fn find_audio_track(buf: &[u8]) -> Result<Option<AudioTrack>> {
    let top = child_boxes(buf, 0, buf.len())?;
    let moov = top
        .iter()
        .find(|b| &b.kind == b"moov")
        .ok_or_else(|| CodecError::CorruptMedia("no 'moov' box".to_string()))?;

    for trak in child_boxes(buf, moov.body_start, moov.end)?
        .iter()
        .filter(|b| &b.kind == b"trak")
    {
        let mdia = match find_child(buf, trak, b"mdia")? {
            Some(m) => m,
            None => continue,
        };
        let hdlr = require_child(buf, &mdia, b"hdlr")?;
        let hdlr_body = hdlr.body(buf);
        require_len(hdlr_body, 12, "hdlr")?;
        if &hdlr_body[8..12] != b"soun" {
            continue;
        }

        let timescale = match find_child(buf, &mdia, b"mdhd")? {
            Some(mdhd) => {
                let body = mdhd.body(buf);
                require_len(body, 4, "mdhd")?;
                // Version 1 uses 64-bit creation/modification times
                let ts_pos = if body[0] == 1 { 20 } else { 12 };
                require_len(body, ts_pos + 4, "mdhd")?;
                read_u32_be(body, ts_pos)
            }
            None => 0,
        };

        let minf = require_child(buf, &mdia, b"minf")?;
        let stbl = require_child(buf, &minf, b"stbl")?;
        let entry = parse_stsd(require_child(buf, &stbl, b"stsd")?.body(buf))?;

        let format = match (&entry.codec, entry.sample_size) {
            (b"sowt", 16) => SampleFormat::I16Le,
            (b"twos", 16) => SampleFormat::I16Be,
            _ => {
                return Ok(Some(AudioTrack::Other {
                    codec: kind_str(&entry.codec),
                }))
            }
        };
        return parse_pcm_track(buf, &stbl, format, &entry, timescale)
            .map(|t| Some(AudioTrack::Pcm(t)));
    }
    Ok(None)
}

/// Decode a PCM track by concatenating its chunks in order.
pub fn extract_pcm(buf: &[u8], track: &PcmTrack) -> Result<PcmBuffer> {
    let mut samples = Vec::with_capacity(track.frames() * track.channels as usize);
    for &(offset, len) in &track.chunks {
        decode_samples(track.format, &buf[offset..offset + len], &mut samples);
    }
    PcmBuffer::new(track.sample_rate, track.channels, samples)
}

/// Return a copy of `buf` with the PCM track's chunks overwritten by `pcm`.
///
/// Only bytes inside the audio chunks change; video samples, the `moov`
/// index and every other box are copied unchanged.
pub fn reinject(buf: &[u8], pcm: &PcmBuffer) -> Result<Vec<u8>> {
    let track = match find_audio_track(buf)? {
        Some(AudioTrack::Pcm(track)) => track,
        Some(AudioTrack::Other { codec }) => {
            return Err(CodecError::UnsupportedContainer(format!(
                "cannot rewrite '{}' audio in place; only sowt/twos PCM tracks are supported",
                codec
            )))
        }
        None => {
            return Err(CodecError::UnsupportedContainer(
                "movie has no sound track".to_string(),
            ))
        }
    };

    if track.sample_rate != pcm.sample_rate()
        || track.channels != pcm.channels()
        || track.frames() != pcm.frames()
    {
        return Err(CodecError::LayoutMismatch(format!(
            "movie audio holds {} frames x {} channels at {} Hz, got {} frames x {} channels at {} Hz",
            track.frames(),
            track.channels,
            track.sample_rate,
            pcm.frames(),
            pcm.channels(),
            pcm.sample_rate()
        )));
    }

    let mut out = buf.to_vec();
    let width = track.format.bytes_per_sample();
    let mut cursor = 0usize;
    for &(offset, len) in &track.chunks {
        let n = len / width;
        encode_samples(
            track.format,
            &pcm.samples()[cursor..cursor + n],
            &mut out[offset..offset + len],
        );
        cursor += n;
    }
    Ok(out)
}
