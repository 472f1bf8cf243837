use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::constants::{MAX_WATERMARK_FREQUENCY_HZ, MIN_WATERMARK_FREQUENCY_HZ};
use crate::error::{CodecError, CodecWarning, Result};
use crate::pcm::PcmBuffer;
use crate::tone::{check_frequency, tone_samples, ToneParams};

/// Frames mixed between cancellation checks.
const CANCEL_CHECK_FRAMES: usize = 4096;

/// Where, how loud, and at what pitch to embed a tone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatermarkSpec {
    pub frequency_hz: f64,
    pub start_time_seconds: f64,
    pub duration_seconds: f64,
    /// Fraction of full scale, in (0, 1].
    pub amplitude: f32,
}

impl WatermarkSpec {
    pub fn validate(&self, sample_rate: u32) -> Result<()> {
        if !(MIN_WATERMARK_FREQUENCY_HZ..=MAX_WATERMARK_FREQUENCY_HZ).contains(&self.frequency_hz) {
            return Err(CodecError::InvalidFrequency {
                frequency_hz: self.frequency_hz,
                reason: format!(
                    "outside the watermark band {}-{} Hz",
                    MIN_WATERMARK_FREQUENCY_HZ, MAX_WATERMARK_FREQUENCY_HZ
                ),
            });
        }
        check_frequency(self.frequency_hz, sample_rate)?;
        if !self.start_time_seconds.is_finite() || self.start_time_seconds < 0.0 {
            return Err(CodecError::InvalidParameter(format!(
                "start time must be non-negative, got {}",
                self.start_time_seconds
            )));
        }
        if !self.duration_seconds.is_finite() || self.duration_seconds <= 0.0 {
            return Err(CodecError::InvalidParameter(format!(
                "duration must be positive, got {}",
                self.duration_seconds
            )));
        }
        if !(self.amplitude > 0.0 && self.amplitude <= 1.0) {
            return Err(CodecError::InvalidParameter(format!(
                "amplitude must be in (0, 1], got {}",
                self.amplitude
            )));
        }
        Ok(())
    }

    /// First frame and frame count of the tone at `sample_rate`.
    pub fn frame_window(&self, sample_rate: u32) -> (usize, usize) {
        let sr = sample_rate as f64;
        let start = (self.start_time_seconds * sr).round() as usize;
        let len = (self.duration_seconds * sr).round() as usize;
        (start, len)
    }
}

/// Result of a successful encode.
#[derive(Debug, Clone)]
pub struct EncodeOutcome {
    pub pcm: PcmBuffer,
    pub requested_amplitude: f32,
    /// Amplitude actually mixed in; lower than requested when it would clip.
    pub applied_amplitude: f32,
    pub warnings: Vec<CodecWarning>,
}

/// Mix a watermark tone into `base`.
pub fn encode(base: &PcmBuffer, spec: &WatermarkSpec) -> Result<EncodeOutcome> {
    encode_with_cancel(base, spec, &CancelToken::new())
}

/// Mix a watermark tone into `base`, polling `cancel` between blocks.
///
/// The tone is added on top of every channel; samples outside the window
/// are copied unchanged. A window that would run past the end of the audio
/// is rejected rather than truncated.
pub fn encode_with_cancel(
    base: &PcmBuffer,
    spec: &WatermarkSpec,
    cancel: &CancelToken,
) -> Result<EncodeOutcome> {
    let sample_rate = base.sample_rate();
    spec.validate(sample_rate)?;

    let (start, len) = spec.frame_window(sample_rate);
    if len == 0 {
        return Err(CodecError::InvalidParameter(format!(
            "duration {}s is shorter than one frame at {} Hz",
            spec.duration_seconds, sample_rate
        )));
    }
    // Saturates for start times far beyond any buffer
    let end = start.saturating_add(len);
    if end > base.frames() {
        return Err(CodecError::OutOfRange {
            start,
            end,
            len: base.frames(),
        });
    }

    let unit = tone_samples(&ToneParams::new(
        spec.frequency_hz,
        spec.duration_seconds,
        sample_rate,
        1.0,
    ));
    let channels = base.channels() as usize;
    let window = &base.samples()[start * channels..end * channels];

    let limit = amplitude_limit(window, &unit, channels, cancel)?;
    if limit <= f64::EPSILON {
        return Err(CodecError::InsufficientHeadroom { start, end });
    }

    let requested = spec.amplitude;
    let mut warnings = Vec::new();
    let applied = if (requested as f64) <= limit {
        requested
    } else {
        let applied = limit as f32;
        let warning = CodecWarning::AmplitudeClipped { requested, applied };
        warn!("{}", warning);
        warnings.push(warning);
        applied
    };

    let mut samples = base.samples().to_vec();
    let out = &mut samples[start * channels..end * channels];
    for (block_idx, block) in out.chunks_mut(CANCEL_CHECK_FRAMES * channels).enumerate() {
        cancel.check()?;
        let first = block_idx * CANCEL_CHECK_FRAMES;
        for (i, frame) in block.chunks_exact_mut(channels).enumerate() {
            let t = applied * unit[first + i];
            for s in frame.iter_mut() {
                *s = (*s + t).clamp(-1.0, 1.0);
            }
        }
    }

    debug!(
        "Embedded {} Hz tone at frames {}..{} (amplitude {:.4})",
        spec.frequency_hz, start, end, applied
    );

    Ok(EncodeOutcome {
        pcm: PcmBuffer::new(sample_rate, base.channels(), samples)?,
        requested_amplitude: requested,
        applied_amplitude: applied,
        warnings,
    })
}

/// Largest tone amplitude that keeps every mixed sample within [-1, 1].
fn amplitude_limit(
    window: &[f32],
    unit: &[f32],
    channels: usize,
    cancel: &CancelToken,
) -> Result<f64> {
    let mut limit = f64::INFINITY;
    for (block_idx, block) in window.chunks(CANCEL_CHECK_FRAMES * channels).enumerate() {
        cancel.check()?;
        let first = block_idx * CANCEL_CHECK_FRAMES;
        for (i, frame) in block.chunks_exact(channels).enumerate() {
            let t = unit[first + i] as f64;
            if t == 0.0 {
                continue;
            }
            for &b in frame {
                let b = b as f64;
                let room = if t > 0.0 { (1.0 - b) / t } else { (1.0 + b) / -t };
                limit = limit.min(room);
            }
        }
    }
    Ok(limit)
}
