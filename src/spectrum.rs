use realfft::num_complex::Complex32;
use realfft::{RealFftPlanner, RealToComplex};
use std::sync::Arc;

use crate::constants::SILENCE_FLOOR;
use crate::error::{CodecError, Result};

/// Hann window of the given size.
pub fn hann_window(size: usize) -> Vec<f32> {
    let n = size as f32;
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n).cos()))
        .collect()
}

/// Pre-allocated windowed FFT for measuring band energy in fixed-size frames.
pub struct SpectrumAnalyzer {
    window_size: usize,
    forward: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    time_buf: Vec<f32>,
    freq_buf: Vec<Complex32>,
    scratch: Vec<Complex32>,
}

impl SpectrumAnalyzer {
    pub fn new(window_size: usize) -> Result<Self> {
        if window_size < 2 {
            return Err(CodecError::InvalidParameter(format!(
                "analysis window must hold at least 2 samples, got {}",
                window_size
            )));
        }
        let mut planner = RealFftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(window_size);
        let freq_buf = forward.make_output_vec();
        let scratch = forward.make_scratch_vec();

        Ok(Self {
            window_size,
            forward,
            window: hann_window(window_size),
            time_buf: vec![0.0; window_size],
            freq_buf,
            scratch,
        })
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Fraction of the frame's spectral energy inside `[low_hz, high_hz]`.
    ///
    /// `frame` must hold exactly `window_size` samples. Frames quieter than
    /// the silence floor report 0.0.
    pub fn band_ratio(
        &mut self,
        frame: &[f32],
        sample_rate: u32,
        low_hz: f64,
        high_hz: f64,
    ) -> Result<f64> {
        if frame.len() != self.window_size {
            return Err(CodecError::Fft(format!(
                "expected {} samples, got {}",
                self.window_size,
                frame.len()
            )));
        }

        let mut mean_square = 0.0f64;
        for ((dst, &s), &w) in self.time_buf.iter_mut().zip(frame).zip(&self.window) {
            *dst = s * w;
            mean_square += (*dst as f64) * (*dst as f64);
        }
        mean_square /= self.window_size as f64;
        if mean_square < SILENCE_FLOOR {
            return Ok(0.0);
        }

        self.forward
            .process_with_scratch(&mut self.time_buf, &mut self.freq_buf, &mut self.scratch)
            .map_err(|e| CodecError::Fft(e.to_string()))?;

        let bin_hz = sample_rate as f64 / self.window_size as f64;
        let mut total = 0.0f64;
        let mut band = 0.0f64;
        for (k, c) in self.freq_buf.iter().enumerate() {
            let energy = c.norm_sqr() as f64;
            total += energy;
            let f = k as f64 * bin_hz;
            if f >= low_hz && f <= high_hz {
                band += energy;
            }
        }

        if total <= 0.0 {
            return Ok(0.0);
        }
        Ok(band / total)
    }
}

/// Band energy ratio of a whole signal, analysed as a single Hann-windowed frame.
pub fn band_energy_ratio(
    samples: &[f32],
    sample_rate: u32,
    center_hz: f64,
    band_width_hz: f64,
) -> Result<f64> {
    let mut analyzer = SpectrumAnalyzer::new(samples.len())?;
    let half = band_width_hz / 2.0;
    analyzer.band_ratio(samples, sample_rate, center_hz - half, center_hz + half)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn hann_window_endpoints() {
        let w = hann_window(1024);
        assert!(w[0].abs() < 1e-6);
        assert!((w[512] - 1.0).abs() < 0.01);
    }

    #[test]
    fn pure_tone_lands_in_band() {
        let mut analyzer = SpectrumAnalyzer::new(4096).unwrap();
        let frame = sine(19_000.0, 44_100, 4096);
        let ratio = analyzer.band_ratio(&frame, 44_100, 18_900.0, 19_100.0).unwrap();
        assert!(ratio > 0.99, "ratio {ratio}");
        let other = analyzer.band_ratio(&frame, 44_100, 5_000.0, 5_200.0).unwrap();
        assert!(other < 1e-3, "ratio {other}");
    }

    #[test]
    fn silence_reports_zero() {
        let mut analyzer = SpectrumAnalyzer::new(512).unwrap();
        let ratio = analyzer.band_ratio(&[0.0; 512], 8_000, 900.0, 1_100.0).unwrap();
        assert_eq!(ratio, 0.0);
    }

    #[test]
    fn wrong_frame_size() {
        let mut analyzer = SpectrumAnalyzer::new(1024).unwrap();
        assert!(analyzer.band_ratio(&[0.0; 512], 8_000, 0.0, 100.0).is_err());
    }
}
