use std::f64::consts::PI;

use crate::constants::FADE_SECONDS;
use crate::error::{CodecError, Result};
use crate::pcm::PcmBuffer;

/// Parameters for a single sinusoidal burst.
#[derive(Debug, Clone, PartialEq)]
pub struct ToneParams {
    pub frequency_hz: f64,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    /// Peak amplitude as a fraction of full scale, in (0, 1].
    pub amplitude: f32,
    /// Initial phase in radians.
    pub phase: f64,
}

impl ToneParams {
    pub fn new(frequency_hz: f64, duration_seconds: f64, sample_rate: u32, amplitude: f32) -> Self {
        Self {
            frequency_hz,
            duration_seconds,
            sample_rate,
            amplitude,
            phase: 0.0,
        }
    }

    pub fn with_phase(self, phase: f64) -> Self {
        Self { phase, ..self }
    }

    /// Number of frames the burst occupies at this sample rate.
    pub fn frames(&self) -> usize {
        (self.duration_seconds * self.sample_rate as f64).round() as usize
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(CodecError::InvalidParameter(
                "sample rate must be positive".to_string(),
            ));
        }
        check_frequency(self.frequency_hz, self.sample_rate)?;
        if !self.duration_seconds.is_finite() || self.duration_seconds <= 0.0 {
            return Err(CodecError::InvalidParameter(format!(
                "tone duration must be positive, got {}",
                self.duration_seconds
            )));
        }
        if !(self.amplitude > 0.0 && self.amplitude <= 1.0) {
            return Err(CodecError::InvalidParameter(format!(
                "tone amplitude must be in (0, 1], got {}",
                self.amplitude
            )));
        }
        if !self.phase.is_finite() {
            return Err(CodecError::InvalidParameter("tone phase must be finite".to_string()));
        }
        Ok(())
    }
}

/// Reject frequencies that are non-positive or at/above Nyquist.
pub fn check_frequency(frequency_hz: f64, sample_rate: u32) -> Result<()> {
    let nyquist = sample_rate as f64 / 2.0;
    if !frequency_hz.is_finite() || frequency_hz <= 0.0 {
        return Err(CodecError::InvalidFrequency {
            frequency_hz,
            reason: "frequency must be positive".to_string(),
        });
    }
    if frequency_hz >= nyquist {
        return Err(CodecError::InvalidFrequency {
            frequency_hz,
            reason: format!("at or above Nyquist ({} Hz at {} Hz)", nyquist, sample_rate),
        });
    }
    Ok(())
}

/// Synthesize a mono tone burst starting at phase zero.
pub fn synthesize(
    frequency_hz: f64,
    duration_seconds: f64,
    sample_rate: u32,
    amplitude: f32,
) -> Result<PcmBuffer> {
    synthesize_with(&ToneParams::new(
        frequency_hz,
        duration_seconds,
        sample_rate,
        amplitude,
    ))
}

/// Synthesize a mono tone burst.
///
/// The burst is shaped with a raised-cosine fade at both ends so it starts
/// and stops at zero without a broadband click. Output is a pure function
/// of `params`.
pub fn synthesize_with(params: &ToneParams) -> Result<PcmBuffer> {
    params.validate()?;
    let samples = tone_samples(params);
    PcmBuffer::new(params.sample_rate, 1, samples)
}

pub(crate) fn tone_samples(params: &ToneParams) -> Vec<f32> {
    let frames = params.frames();
    let sr = params.sample_rate as f64;
    let step = 2.0 * PI * params.frequency_hz / sr;
    let fade = fade_frames(frames, params.sample_rate);
    let amplitude = params.amplitude as f64;

    (0..frames)
        .map(|i| {
            let env = envelope(i, frames, fade);
            (amplitude * env * (step * i as f64 + params.phase).sin()) as f32
        })
        .collect()
}

fn fade_frames(frames: usize, sample_rate: u32) -> usize {
    let fade = (FADE_SECONDS * sample_rate as f64).round() as usize;
    fade.min(frames / 2)
}

/// Raised-cosine ramp over `fade` frames at each end, 1.0 in between.
fn envelope(i: usize, frames: usize, fade: usize) -> f64 {
    if fade == 0 {
        return 1.0;
    }
    let from_edge = i.min(frames - 1 - i);
    if from_edge >= fade {
        return 1.0;
    }
    0.5 * (1.0 - (PI * from_edge as f64 / fade as f64).cos())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spectrum::band_energy_ratio;

    #[test]
    fn rejects_frequency_above_nyquist() {
        let err = synthesize(25_000.0, 0.1, 44_100, 0.05).unwrap_err();
        assert!(matches!(err, CodecError::InvalidFrequency { .. }));
    }

    #[test]
    fn rejects_frequency_at_nyquist_and_zero() {
        assert!(matches!(
            synthesize(22_050.0, 0.1, 44_100, 0.05),
            Err(CodecError::InvalidFrequency { .. })
        ));
        assert!(matches!(
            synthesize(0.0, 0.1, 44_100, 0.05),
            Err(CodecError::InvalidFrequency { .. })
        ));
        assert!(matches!(
            synthesize(-19_000.0, 0.1, 44_100, 0.05),
            Err(CodecError::InvalidFrequency { .. })
        ));
    }

    #[test]
    fn rejects_bad_amplitude_and_duration() {
        assert!(synthesize(19_000.0, 0.1, 44_100, 0.0).is_err());
        assert!(synthesize(19_000.0, 0.1, 44_100, 1.5).is_err());
        assert!(synthesize(19_000.0, 0.0, 44_100, 0.05).is_err());
    }

    #[test]
    fn deterministic_output() {
        let a = synthesize(19_000.0, 0.25, 48_000, 0.05).unwrap();
        let b = synthesize(19_000.0, 0.25, 48_000, 0.05).unwrap();
        let bits_a: Vec<u32> = a.samples().iter().map(|s| s.to_bits()).collect();
        let bits_b: Vec<u32> = b.samples().iter().map(|s| s.to_bits()).collect();
        assert_eq!(bits_a, bits_b);
    }

    #[test]
    fn length_and_peak() {
        let tone = synthesize(19_000.0, 0.5, 44_100, 0.05).unwrap();
        assert_eq!(tone.frames(), 22_050);
        assert_eq!(tone.channels(), 1);
        let peak = tone.samples().iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(peak <= 0.05 + 1e-6, "peak {peak} exceeds amplitude");
        assert!(peak > 0.049, "peak {peak} too low");
    }

    #[test]
    fn fades_start_and_end_at_zero() {
        let tone = synthesize(18_500.0, 0.2, 44_100, 0.5).unwrap();
        let s = tone.samples();
        assert!(s[0].abs() < 1e-6);
        assert!(s[s.len() - 1].abs() < 1e-3);
        // Inside the first millisecond the envelope is still well below full scale.
        let early_peak = s[..44].iter().fold(0.0f32, |m, v| m.max(v.abs()));
        assert!(early_peak < 0.15, "fade-in too abrupt: {early_peak}");
    }

    #[test]
    fn phase_shifts_waveform() {
        let params = ToneParams::new(1_000.0, 0.05, 8_000, 0.5);
        let zero = synthesize_with(&params).unwrap();
        let shifted = synthesize_with(&params.clone().with_phase(PI / 2.0)).unwrap();
        assert_ne!(zero.samples(), shifted.samples());
    }

    #[test]
    fn energy_concentrated_at_frequency() {
        for &(freq, sr) in &[(19_000.0, 44_100u32), (18_000.0, 48_000), (1_000.0, 8_000)] {
            let tone = synthesize(freq, 0.5, sr, 0.05).unwrap();
            let ratio = band_energy_ratio(tone.samples(), sr, freq, 200.0).unwrap();
            assert!(ratio > 0.95, "{freq} Hz at {sr} Hz: only {ratio} in band");
            let off = band_energy_ratio(tone.samples(), sr, freq - 2_000.0, 200.0).unwrap();
            assert!(off < 0.01, "{freq} Hz leaked {off} two kHz away");
        }
    }
}
