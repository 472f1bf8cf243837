// RIFF/WAVE reading and in-place audio patching

use crate::error::{CodecError, Result};
use crate::pcm::{decode_samples, encode_samples, PcmBuffer, SampleFormat};

const WAVE_FORMAT_PCM: u16 = 0x0001;
const WAVE_FORMAT_IEEE_FLOAT: u16 = 0x0003;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Where the audio lives inside a WAV file and how it is encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct WavLayout {
    pub format: SampleFormat,
    pub channels: u16,
    pub sample_rate: u32,
    /// Byte offset of the `data` chunk payload.
    pub data_offset: usize,
    /// Payload length in bytes, as declared by the chunk header.
    pub data_len: usize,
}

impl WavLayout {
    pub fn block_align(&self) -> usize {
        self.channels as usize * self.format.bytes_per_sample()
    }

    pub fn frames(&self) -> usize {
        self.data_len / self.block_align()
    }
}

pub fn is_wav(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

fn read_u16_le(buf: &[u8], pos: usize) -> u16 {
    u16::from_le_bytes([buf[pos], buf[pos + 1]])
}

fn read_u32_le(buf: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]])
}

struct FmtChunk {
    format: SampleFormat,
    channels: u16,
    sample_rate: u32,
}

fn parse_fmt(body: &[u8]) -> Result<FmtChunk> {
    if body.len() < 16 {
        return Err(CodecError::CorruptMedia(format!(
            "fmt chunk too short: {} bytes",
            body.len()
        )));
    }
    let mut tag = read_u16_le(body, 0);
    let channels = read_u16_le(body, 2);
    let sample_rate = read_u32_le(body, 4);
    let block_align = read_u16_le(body, 12) as usize;
    let bits = read_u16_le(body, 14);

    if tag == WAVE_FORMAT_EXTENSIBLE {
        if body.len() < 40 {
            return Err(CodecError::CorruptMedia(
                "WAVE_FORMAT_EXTENSIBLE fmt chunk missing sub-format".to_string(),
            ));
        }
        // First two bytes of the sub-format GUID carry the real tag.
        tag = read_u16_le(body, 24);
    }

    if channels == 0 || sample_rate == 0 {
        return Err(CodecError::CorruptMedia(format!(
            "fmt chunk declares {} channels at {} Hz",
            channels, sample_rate
        )));
    }

    let format = match (tag, bits) {
        (WAVE_FORMAT_PCM, 8) => SampleFormat::U8,
        (WAVE_FORMAT_PCM, 16) => SampleFormat::I16Le,
        (WAVE_FORMAT_PCM, 24) => SampleFormat::I24Le,
        (WAVE_FORMAT_PCM, 32) => SampleFormat::I32Le,
        (WAVE_FORMAT_IEEE_FLOAT, 32) => SampleFormat::F32Le,
        _ => {
            return Err(CodecError::UnsupportedContainer(format!(
                "WAV format tag {:#06x} with {} bits per sample",
                tag, bits
            )))
        }
    };

    if block_align != channels as usize * format.bytes_per_sample() {
        return Err(CodecError::CorruptMedia(format!(
            "block align {} does not match {} channels of {} bits",
            block_align, channels, bits
        )));
    }

    Ok(FmtChunk {
        format,
        channels,
        sample_rate,
    })
}

/// Walk the RIFF chunks and locate `fmt ` and `data`.
pub fn parse_layout(bytes: &[u8]) -> Result<WavLayout> {
    if !is_wav(bytes) {
        return Err(CodecError::CorruptMedia("missing RIFF/WAVE header".to_string()));
    }

    let mut fmt: Option<FmtChunk> = None;
    let mut pos = 12;
    while pos + 8 <= bytes.len() {
        let id = &bytes[pos..pos + 4];
        let size = read_u32_le(bytes, pos + 4) as usize;
        let body_start = pos + 8;
        let body_end = body_start
            .checked_add(size)
            .filter(|&end| end <= bytes.len())
            .ok_or_else(|| {
                CodecError::CorruptMedia(format!(
                    "chunk '{}' at byte {} runs past end of file",
                    String::from_utf8_lossy(id),
                    pos
                ))
            })?;

        match id {
            b"fmt " => fmt = Some(parse_fmt(&bytes[body_start..body_end])?),
            b"data" => {
                let fmt = fmt.ok_or_else(|| {
                    CodecError::CorruptMedia("data chunk precedes fmt chunk".to_string())
                })?;
                return Ok(WavLayout {
                    format: fmt.format,
                    channels: fmt.channels,
                    sample_rate: fmt.sample_rate,
                    data_offset: body_start,
                    data_len: size,
                });
            }
            _ => {}
        }

        // Chunks are word aligned.
        pos = body_end + (size & 1);
    }

    Err(CodecError::CorruptMedia("no data chunk found".to_string()))
}

/// Decode the audio of a WAV file.
pub fn extract(bytes: &[u8]) -> Result<PcmBuffer> {
    let layout = parse_layout(bytes)?;
    let payload_len = layout.frames() * layout.block_align();
    let payload = &bytes[layout.data_offset..layout.data_offset + payload_len];
    let mut samples = Vec::with_capacity(layout.frames() * layout.channels as usize);
    decode_samples(layout.format, payload, &mut samples);
    PcmBuffer::new(layout.sample_rate, layout.channels, samples)
}

/// Return a copy of `bytes` with the `data` payload replaced by `pcm`.
///
/// Every byte outside the sample payload (other chunks, padding, a trailing
/// partial frame) is copied unchanged.
pub fn reinject(bytes: &[u8], pcm: &PcmBuffer) -> Result<Vec<u8>> {
    let layout = parse_layout(bytes)?;
    check_layout(&layout, pcm)?;

    let mut out = bytes.to_vec();
    let payload_len = layout.frames() * layout.block_align();
    encode_samples(
        layout.format,
        pcm.samples(),
        &mut out[layout.data_offset..layout.data_offset + payload_len],
    );
    Ok(out)
}

fn check_layout(layout: &WavLayout, pcm: &PcmBuffer) -> Result<()> {
    if layout.sample_rate != pcm.sample_rate()
        || layout.channels != pcm.channels()
        || layout.frames() != pcm.frames()
    {
        return Err(CodecError::LayoutMismatch(format!(
            "WAV holds {} frames x {} channels at {} Hz, got {} frames x {} channels at {} Hz",
            layout.frames(),
            layout.channels,
            layout.sample_rate,
            pcm.frames(),
            pcm.channels(),
            pcm.sample_rate()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(id);
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(body);
        if body.len() % 2 == 1 {
            out.push(0);
        }
        out
    }

    fn fmt_body(tag: u16, channels: u16, sample_rate: u32, bits: u16) -> Vec<u8> {
        let block_align = channels * bits / 8;
        let mut b = Vec::new();
        b.extend_from_slice(&tag.to_le_bytes());
        b.extend_from_slice(&channels.to_le_bytes());
        b.extend_from_slice(&sample_rate.to_le_bytes());
        b.extend_from_slice(&(sample_rate * block_align as u32).to_le_bytes());
        b.extend_from_slice(&block_align.to_le_bytes());
        b.extend_from_slice(&bits.to_le_bytes());
        b
    }

    fn riff(chunks: &[Vec<u8>]) -> Vec<u8> {
        let body: Vec<u8> = chunks.concat();
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(body.len() as u32 + 4).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(&body);
        out
    }

    #[test]
    fn parses_layout_after_odd_sized_chunk() {
        let data: Vec<u8> = (0..16i16).flat_map(|v| (v * 100).to_le_bytes()).collect();
        let file = riff(&[
            chunk(b"fmt ", &fmt_body(WAVE_FORMAT_PCM, 2, 8_000, 16)),
            chunk(b"LIST", b"odd"),
            chunk(b"data", &data),
        ]);
        let layout = parse_layout(&file).unwrap();
        assert_eq!(layout.format, SampleFormat::I16Le);
        assert_eq!(layout.channels, 2);
        assert_eq!(layout.frames(), 8);

        let pcm = extract(&file).unwrap();
        assert_eq!(pcm.frames(), 8);
        assert_eq!(pcm.samples()[1], 100.0 / 32_768.0);
    }

    #[test]
    fn reinject_unmodified_is_byte_identical() {
        let data: Vec<u8> = (0..64u8).collect();
        let file = riff(&[
            chunk(b"fmt ", &fmt_body(WAVE_FORMAT_PCM, 1, 8_000, 16)),
            chunk(b"data", &data),
            chunk(b"cue ", b"trailing metadata"),
        ]);
        let pcm = extract(&file).unwrap();
        assert_eq!(reinject(&file, &pcm).unwrap(), file);
    }

    #[test]
    fn reinject_rejects_different_layout() {
        let file = riff(&[
            chunk(b"fmt ", &fmt_body(WAVE_FORMAT_PCM, 1, 8_000, 16)),
            chunk(b"data", &[0u8; 32]),
        ]);
        let pcm = PcmBuffer::silence(8_000, 1, 15).unwrap();
        assert!(matches!(
            reinject(&file, &pcm),
            Err(CodecError::LayoutMismatch(_))
        ));
    }

    #[test]
    fn truncated_chunk_is_corrupt() {
        let mut file = riff(&[
            chunk(b"fmt ", &fmt_body(WAVE_FORMAT_PCM, 1, 8_000, 16)),
            chunk(b"data", &[0u8; 32]),
        ]);
        file.truncate(file.len() - 10);
        assert!(matches!(parse_layout(&file), Err(CodecError::CorruptMedia(_))));
    }

    #[test]
    fn compressed_wav_is_unsupported() {
        // 0x0055 is MPEG layer 3 inside a WAV wrapper.
        let file = riff(&[
            chunk(b"fmt ", &fmt_body(0x0055, 1, 8_000, 16)),
            chunk(b"data", &[0u8; 32]),
        ]);
        assert!(matches!(
            parse_layout(&file),
            Err(CodecError::UnsupportedContainer(_))
        ));
    }

    #[test]
    fn data_before_fmt_is_corrupt() {
        let file = riff(&[
            chunk(b"data", &[0u8; 32]),
            chunk(b"fmt ", &fmt_body(WAVE_FORMAT_PCM, 1, 8_000, 16)),
        ]);
        assert!(matches!(parse_layout(&file), Err(CodecError::CorruptMedia(_))));
    }
}
