use bytes::Bytes;
use log::{debug, info, warn};
use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{CodecError, Result};
use crate::mp4::{self, AudioTrack};
use crate::pcm::PcmBuffer;
use crate::wav;

/// A user-supplied media file held in memory.
///
/// Cloning is cheap and never copies the payload. Nothing here mutates the
/// bytes; re-injection builds a new asset.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaAsset {
    name: String,
    data: Bytes,
}

/// How the audio of an asset can be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// RIFF/WAVE: read and rewritten in place.
    Wav,
    /// ISO-BMFF/QuickTime: PCM tracks rewritten in place, others read only.
    IsoBmff,
    /// Anything symphonia can probe; read only.
    Other,
}

impl MediaAsset {
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Read a file into memory. The handle is closed before returning.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        debug!("Loaded {} ({} bytes)", path.display(), data.len());
        Ok(Self::from_bytes(name, data))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn bytes(&self) -> Bytes {
        self.data.clone()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Lower-cased file extension, if the name has one.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
    }

    pub fn container(&self) -> ContainerKind {
        if wav::is_wav(&self.data) {
            return ContainerKind::Wav;
        }
        if mp4::is_iso_bmff(&self.data) {
            return ContainerKind::IsoBmff;
        }
        match self.extension().as_deref() {
            Some("wav") | Some("wave") => ContainerKind::Wav,
            Some("mp4") | Some("m4v") | Some("m4a") | Some("mov") => ContainerKind::IsoBmff,
            _ => ContainerKind::Other,
        }
    }

    /// Same payload under a different file name.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: self.data.clone(),
        }
    }

    /// Write the asset into `dir` under its own name.
    ///
    /// The bytes go to a temporary file in the same directory that is
    /// renamed into place only after a complete write, so a failure never
    /// leaves a partial output behind.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        let target = dir.join(&self.name);
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&self.data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&target).map_err(|e| CodecError::Io(e.error))?;
        info!("Wrote {} ({} bytes)", target.display(), self.data.len());
        Ok(target)
    }
}

/// Decode the audio track of `asset` into PCM.
///
/// Deterministic: the same unmodified asset always yields the same samples.
pub fn extract_audio(asset: &MediaAsset) -> Result<PcmBuffer> {
    if asset.is_empty() {
        return Err(CodecError::CorruptMedia(format!("'{}' is empty", asset.name())));
    }
    let pcm = match asset.container() {
        ContainerKind::Wav => wav::extract(asset.data())?,
        ContainerKind::IsoBmff => match mp4::find_audio_track(asset.data())? {
            Some(AudioTrack::Pcm(track)) => mp4::extract_pcm(asset.data(), &track)?,
            Some(AudioTrack::Other { codec }) => {
                debug!("'{}' carries '{}' audio, decoding with symphonia", asset.name(), codec);
                decode_with_symphonia(asset)?
            }
            None => {
                return Err(CodecError::UnsupportedContainer(format!(
                    "'{}' has no sound track",
                    asset.name()
                )))
            }
        },
        ContainerKind::Other => decode_with_symphonia(asset)?,
    };
    info!(
        "Extracted {} frames ({} ch @ {} Hz) from {}",
        pcm.frames(),
        pcm.channels(),
        pcm.sample_rate(),
        asset.name()
    );
    Ok(pcm)
}

/// Build a new asset whose audio track is `pcm` and whose other bytes are
/// copied from `asset` unchanged.
pub fn reinject_audio(asset: &MediaAsset, pcm: &PcmBuffer) -> Result<MediaAsset> {
    let data = match asset.container() {
        ContainerKind::Wav => wav::reinject(asset.data(), pcm)?,
        ContainerKind::IsoBmff => mp4::reinject(asset.data(), pcm)?,
        ContainerKind::Other => {
            return Err(CodecError::UnsupportedContainer(format!(
                "cannot rewrite audio in '{}' ({}); only WAV and PCM MP4/MOV are writable",
                asset.name(),
                asset.extension().unwrap_or_else(|| "unknown".to_string())
            )))
        }
    };
    Ok(MediaAsset::from_bytes(asset.name(), data))
}

fn map_symphonia_error(e: SymphoniaError) -> CodecError {
    match e {
        SymphoniaError::Unsupported(what) => CodecError::UnsupportedContainer(what.to_string()),
        SymphoniaError::IoError(e) => CodecError::CorruptMedia(format!("unreadable stream: {}", e)),
        other => CodecError::CorruptMedia(other.to_string()),
    }
}

/// Decode the first audio track with symphonia, for containers and codecs
/// that are read but never rewritten.
fn decode_with_symphonia(asset: &MediaAsset) -> Result<PcmBuffer> {
    let source = Cursor::new(asset.bytes());
    let mss = MediaSourceStream::new(Box::new(source), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = asset.extension() {
        hint.with_extension(&ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(map_symphonia_error)?;
    let mut format = probed.format;

    // Find the first audio track
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| {
            CodecError::UnsupportedContainer(format!("no audio track in '{}'", asset.name()))
        })?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(map_symphonia_error)?;

    let mut layout: Option<(u32, u16)> = None;
    let mut samples: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(map_symphonia_error(e)),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                let this_layout = (spec.rate, spec.channels.count() as u16);
                match layout {
                    None => layout = Some(this_layout),
                    Some(l) if l != this_layout => {
                        return Err(CodecError::CorruptMedia(format!(
                            "audio layout changed mid-stream from {:?} to {:?}",
                            l, this_layout
                        )))
                    }
                    Some(_) => {}
                }

                let duration = decoded.capacity() as u64;
                let mut sample_buf = SampleBuffer::<f32>::new(duration, spec);
                sample_buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(sample_buf.samples());
            }
            Err(SymphoniaError::DecodeError(e)) => {
                warn!("Skipping undecodable packet in {}: {}", asset.name(), e);
                continue;
            }
            Err(e) => return Err(map_symphonia_error(e)),
        }
    }

    let (sample_rate, channels) = layout.ok_or_else(|| {
        CodecError::CorruptMedia(format!("no audio could be decoded from '{}'", asset.name()))
    })?;
    PcmBuffer::new(sample_rate, channels, samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_sniffing_prefers_magic_over_extension() {
        let wav_bytes = b"RIFF\x04\0\0\0WAVE".to_vec();
        assert_eq!(
            MediaAsset::from_bytes("clip.mp3", wav_bytes).container(),
            ContainerKind::Wav
        );
        assert_eq!(
            MediaAsset::from_bytes("clip.MOV", vec![0u8; 4]).container(),
            ContainerKind::IsoBmff
        );
        assert_eq!(
            MediaAsset::from_bytes("clip.ogg", vec![0u8; 4]).container(),
            ContainerKind::Other
        );
    }

    #[test]
    fn empty_asset_is_corrupt() {
        let asset = MediaAsset::from_bytes("empty.wav", Vec::new());
        assert!(matches!(
            extract_audio(&asset),
            Err(CodecError::CorruptMedia(_))
        ));
    }

    #[test]
    fn garbage_is_not_decodable() {
        let asset = MediaAsset::from_bytes("noise.bin", vec![0x5Au8; 4096]);
        assert!(matches!(
            extract_audio(&asset),
            Err(CodecError::UnsupportedContainer(_)) | Err(CodecError::CorruptMedia(_))
        ));
    }

    #[test]
    fn rewriting_unknown_containers_is_unsupported() {
        let asset = MediaAsset::from_bytes("song.mp3", vec![0u8; 64]);
        let pcm = PcmBuffer::silence(44_100, 1, 10).unwrap();
        assert!(matches!(
            reinject_audio(&asset, &pcm),
            Err(CodecError::UnsupportedContainer(_))
        ));
    }
}
