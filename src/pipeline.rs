// End-to-end jobs over a media asset

use log::info;

use crate::campaign::encoded_file_name;
use crate::cancel::CancelToken;
use crate::decoder::{detect_with_cancel, DetectParams, DetectionEvent};
use crate::encoder::{encode_with_cancel, WatermarkSpec};
use crate::error::{CodecWarning, Result};
use crate::media::{extract_audio, reinject_audio, MediaAsset};

/// An encoded asset and what was actually embedded.
#[derive(Debug, Clone)]
pub struct EncodedAsset {
    pub asset: MediaAsset,
    pub requested_amplitude: f32,
    pub applied_amplitude: f32,
    pub warnings: Vec<CodecWarning>,
}

/// Extract the audio of `asset`, embed the tone described by `spec`, and
/// write it back. The result is named after `title`.
pub fn encode_asset(
    asset: &MediaAsset,
    spec: &WatermarkSpec,
    title: &str,
    cancel: &CancelToken,
) -> Result<EncodedAsset> {
    let pcm = extract_audio(asset)?;
    cancel.check()?;
    // Clipping warnings are logged by the encoder and returned to the caller
    let outcome = encode_with_cancel(&pcm, spec, cancel)?;
    cancel.check()?;
    let encoded = reinject_audio(asset, &outcome.pcm)?;
    let name = encoded_file_name(title, asset.extension().as_deref());
    info!(
        "Encoded {} Hz tone at {:.3}s into {} as {} (amplitude {:.4})",
        spec.frequency_hz,
        spec.start_time_seconds,
        asset.name(),
        name,
        outcome.applied_amplitude
    );
    Ok(EncodedAsset {
        asset: encoded.renamed(name),
        requested_amplitude: outcome.requested_amplitude,
        applied_amplitude: outcome.applied_amplitude,
        warnings: outcome.warnings,
    })
}

/// Extract the audio of `asset` and scan it for the tone in `params`.
pub fn detect_asset(
    asset: &MediaAsset,
    params: &DetectParams,
    cancel: &CancelToken,
) -> Result<Vec<DetectionEvent>> {
    let pcm = extract_audio(asset)?;
    cancel.check()?;
    let events = detect_with_cancel(&pcm, params, cancel)?;
    info!(
        "{}: {} detection(s) at {} Hz",
        asset.name(),
        events.len(),
        params.target_frequency_hz
    );
    Ok(events)
}
