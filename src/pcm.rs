use crate::error::{CodecError, Result};

/// Interleaved floating point audio at a fixed sample rate and channel count.
///
/// Samples are nominally in [-1.0, 1.0]. The layout never changes after
/// construction; operations that modify audio return a new buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    sample_rate: u32,
    channels: u16,
    samples: Vec<f32>,
}

impl PcmBuffer {
    pub fn new(sample_rate: u32, channels: u16, samples: Vec<f32>) -> Result<Self> {
        if sample_rate == 0 {
            return Err(CodecError::InvalidParameter(
                "sample rate must be positive".to_string(),
            ));
        }
        if channels == 0 {
            return Err(CodecError::InvalidParameter(
                "channel count must be positive".to_string(),
            ));
        }
        if samples.len() % channels as usize != 0 {
            return Err(CodecError::InvalidParameter(format!(
                "{} samples do not divide into {} channels",
                samples.len(),
                channels
            )));
        }
        Ok(Self {
            sample_rate,
            channels,
            samples,
        })
    }

    /// A buffer of digital silence.
    pub fn silence(sample_rate: u32, channels: u16, frames: usize) -> Result<Self> {
        Self::new(sample_rate, channels, vec![0.0; frames * channels as usize])
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    /// Number of sample frames (one sample per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn duration_seconds(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Average all channels into a single channel.
    pub fn to_mono(&self) -> Vec<f32> {
        if self.channels == 1 {
            return self.samples.clone();
        }
        let ch = self.channels as usize;
        self.samples
            .chunks_exact(ch)
            .map(|frame| frame.iter().sum::<f32>() / ch as f32)
            .collect()
    }

    /// Whether `other` can replace this buffer in a container.
    pub fn same_layout(&self, other: &PcmBuffer) -> bool {
        self.sample_rate == other.sample_rate
            && self.channels == other.channels
            && self.frames() == other.frames()
    }
}

/// On-disk encoding of a single PCM sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// 8-bit unsigned, offset binary (WAV).
    U8,
    I16Le,
    I16Be,
    I24Le,
    I32Le,
    F32Le,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::I16Le | SampleFormat::I16Be => 2,
            SampleFormat::I24Le => 3,
            SampleFormat::I32Le | SampleFormat::F32Le => 4,
        }
    }

    /// Decode one sample. `bytes` must hold exactly `bytes_per_sample` bytes.
    pub fn decode(self, bytes: &[u8]) -> f32 {
        match self {
            SampleFormat::U8 => (bytes[0] as f32 - 128.0) / 128.0,
            SampleFormat::I16Le => i16::from_le_bytes([bytes[0], bytes[1]]) as f32 / 32_768.0,
            SampleFormat::I16Be => i16::from_be_bytes([bytes[0], bytes[1]]) as f32 / 32_768.0,
            SampleFormat::I24Le => {
                // Sign-extend through the top byte of an i32.
                let v = i32::from_le_bytes([0, bytes[0], bytes[1], bytes[2]]) >> 8;
                v as f32 / 8_388_608.0
            }
            SampleFormat::I32Le => {
                let v = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                (v as f64 / 2_147_483_648.0) as f32
            }
            SampleFormat::F32Le => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        }
    }

    /// Encode one sample into `out`, which must hold `bytes_per_sample` bytes.
    ///
    /// Integer formats round to nearest and saturate. Up to 24 bits,
    /// `encode(decode(x))` reproduces `x` exactly; 32-bit integers lose the
    /// low bits to the f32 mantissa.
    pub fn encode(self, value: f32, out: &mut [u8]) {
        match self {
            SampleFormat::U8 => {
                let v = (value as f64 * 128.0).round().clamp(-128.0, 127.0) as i32 + 128;
                out[0] = v as u8;
            }
            SampleFormat::I16Le => out.copy_from_slice(&quantize_i16(value).to_le_bytes()),
            SampleFormat::I16Be => out.copy_from_slice(&quantize_i16(value).to_be_bytes()),
            SampleFormat::I24Le => {
                let v = (value as f64 * 8_388_608.0)
                    .round()
                    .clamp(-8_388_608.0, 8_388_607.0) as i32;
                let b = v.to_le_bytes();
                out.copy_from_slice(&b[..3]);
            }
            SampleFormat::I32Le => {
                let v = (value as f64 * 2_147_483_648.0)
                    .round()
                    .clamp(-2_147_483_648.0, 2_147_483_647.0) as i32;
                out.copy_from_slice(&v.to_le_bytes());
            }
            SampleFormat::F32Le => out.copy_from_slice(&value.to_le_bytes()),
        }
    }
}

fn quantize_i16(value: f32) -> i16 {
    (value as f64 * 32_768.0).round().clamp(-32_768.0, 32_767.0) as i16
}

/// Decode a run of interleaved samples.
pub fn decode_samples(format: SampleFormat, bytes: &[u8], out: &mut Vec<f32>) {
    let width = format.bytes_per_sample();
    out.extend(bytes.chunks_exact(width).map(|b| format.decode(b)));
}

/// Encode interleaved samples over an existing byte run of matching length.
pub fn encode_samples(format: SampleFormat, samples: &[f32], out: &mut [u8]) {
    let width = format.bytes_per_sample();
    for (chunk, &s) in out.chunks_exact_mut(width).zip(samples.iter()) {
        format.encode(s, chunk);
    }
}
