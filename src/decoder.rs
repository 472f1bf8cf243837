use log::debug;
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::constants::MIN_WINDOW_SECONDS;
use crate::error::{CodecError, Result};
use crate::pcm::PcmBuffer;
use crate::spectrum::SpectrumAnalyzer;
use crate::tone::check_frequency;

/// A tone found in the audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub timestamp_seconds: f64,
    pub frequency_hz: f64,
    /// Band energy as a fraction of total window energy, in [0, 1].
    pub confidence: f32,
}

/// What to look for and how sure to be.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectParams {
    pub target_frequency_hz: f64,
    pub band_width_hz: f64,
    pub min_confidence: f32,
}

impl DetectParams {
    pub fn new(target_frequency_hz: f64, band_width_hz: f64, min_confidence: f32) -> Self {
        Self {
            target_frequency_hz,
            band_width_hz,
            min_confidence,
        }
    }

    pub fn validate(&self, sample_rate: u32) -> Result<()> {
        check_frequency(self.target_frequency_hz, sample_rate)?;
        if !self.band_width_hz.is_finite() || self.band_width_hz <= 0.0 {
            return Err(CodecError::InvalidParameter(format!(
                "band width must be positive, got {}",
                self.band_width_hz
            )));
        }
        if !(0.0..1.0).contains(&self.min_confidence) {
            return Err(CodecError::InvalidParameter(format!(
                "min confidence must be in [0, 1), got {}",
                self.min_confidence
            )));
        }
        Ok(())
    }
}

/// Analysis window length for a sample rate: the next power of two that
/// covers at least 50 ms.
pub fn window_size_for(sample_rate: u32) -> usize {
    let min = (MIN_WINDOW_SECONDS * sample_rate as f64).ceil() as usize;
    min.max(2).next_power_of_two()
}

/// Scan `pcm` for a tone and collect every detection.
///
/// No tone is a valid outcome and yields an empty list.
pub fn detect(
    pcm: &PcmBuffer,
    target_frequency_hz: f64,
    band_width_hz: f64,
    min_confidence: f32,
) -> Result<Vec<DetectionEvent>> {
    let params = DetectParams::new(target_frequency_hz, band_width_hz, min_confidence);
    detect_with_cancel(pcm, &params, &CancelToken::new())
}

pub fn detect_with_cancel(
    pcm: &PcmBuffer,
    params: &DetectParams,
    cancel: &CancelToken,
) -> Result<Vec<DetectionEvent>> {
    let events = scan(pcm, params, cancel.clone())?.collect::<Result<Vec<_>>>()?;
    debug!(
        "Found {} detection(s) at {} Hz in {:.2}s of audio",
        events.len(),
        params.target_frequency_hz,
        pcm.duration_seconds()
    );
    Ok(events)
}

/// Lazily scan `pcm`, yielding merged detections in time order.
///
/// Windows overlap by half, so a tone straddling a window edge is still
/// seen whole by a neighbour. Consecutive hits closer than one window
/// duration collapse into a single event that keeps the earliest timestamp
/// and the highest confidence. The iterator is single-pass.
pub fn scan(pcm: &PcmBuffer, params: &DetectParams, cancel: CancelToken) -> Result<DetectionScan> {
    let sample_rate = pcm.sample_rate();
    params.validate(sample_rate)?;
    let window_size = window_size_for(sample_rate);
    let half = params.band_width_hz / 2.0;

    Ok(DetectionScan {
        mono: pcm.to_mono(),
        sample_rate,
        analyzer: SpectrumAnalyzer::new(window_size)?,
        hop: window_size / 2,
        low_hz: params.target_frequency_hz - half,
        high_hz: params.target_frequency_hz + half,
        frequency_hz: params.target_frequency_hz,
        min_confidence: params.min_confidence as f64,
        cancel,
        next_offset: 0,
        pending: None,
        finished: false,
    })
}

struct PendingEvent {
    first_offset: usize,
    last_offset: usize,
    confidence: f64,
}

pub struct DetectionScan {
    mono: Vec<f32>,
    sample_rate: u32,
    analyzer: SpectrumAnalyzer,
    hop: usize,
    low_hz: f64,
    high_hz: f64,
    frequency_hz: f64,
    min_confidence: f64,
    cancel: CancelToken,
    next_offset: usize,
    pending: Option<PendingEvent>,
    finished: bool,
}

impl DetectionScan {
    pub fn window_size(&self) -> usize {
        self.analyzer.window_size()
    }

    fn event_from(&self, pending: &PendingEvent) -> DetectionEvent {
        let center = pending.first_offset as f64 + self.window_size() as f64 / 2.0;
        DetectionEvent {
            timestamp_seconds: center / self.sample_rate as f64,
            frequency_hz: self.frequency_hz,
            confidence: pending.confidence as f32,
        }
    }

    /// Analyse the next window. `None` once the buffer is exhausted.
    fn next_window(&mut self) -> Option<Result<(usize, f64)>> {
        let window_size = self.window_size();
        if self.mono.is_empty() || self.next_offset >= self.mono.len() {
            return None;
        }
        // Stop once the previous window already reached the end.
        if self.next_offset > 0 && self.next_offset - self.hop + window_size >= self.mono.len() {
            return None;
        }
        if let Err(e) = self.cancel.check() {
            return Some(Err(e));
        }

        let offset = self.next_offset;
        self.next_offset += self.hop;

        let end = (offset + window_size).min(self.mono.len());
        let ratio = if end - offset == window_size {
            self.analyzer
                .band_ratio(&self.mono[offset..end], self.sample_rate, self.low_hz, self.high_hz)
        } else {
            // Zero-pad the short tail window.
            let mut frame = vec![0.0f32; window_size];
            frame[..end - offset].copy_from_slice(&self.mono[offset..end]);
            self.analyzer
                .band_ratio(&frame, self.sample_rate, self.low_hz, self.high_hz)
        };
        Some(ratio.map(|r| (offset, r)))
    }
}

impl Iterator for DetectionScan {
    type Item = Result<DetectionEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            match self.next_window() {
                None => {
                    self.finished = true;
                    return self.pending.take().map(|p| Ok(self.event_from(&p)));
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e));
                }
                Some(Ok((offset, ratio))) => {
                    if ratio <= self.min_confidence {
                        continue;
                    }
                    let window_size = self.window_size();
                    match self.pending.as_mut() {
                        Some(p) if offset - p.last_offset <= window_size => {
                            p.last_offset = offset;
                            p.confidence = p.confidence.max(ratio);
                        }
                        _ => {
                            let done = self.pending.replace(PendingEvent {
                                first_offset: offset,
                                last_offset: offset,
                                confidence: ratio,
                            });
                            if let Some(p) = done {
                                return Some(Ok(self.event_from(&p)));
                            }
                        }
                    }
                }
            }
        }
    }
}
