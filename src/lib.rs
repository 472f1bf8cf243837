// Library interface for the CLI, the HTTP service and tests

pub mod campaign;
pub mod cancel;
pub mod config;
pub mod constants;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod media;
pub mod mp4;
pub mod pcm;
pub mod pipeline;
pub mod pool;
pub mod serve;
pub mod spectrum;
pub mod tone;
pub mod wav;

pub use decoder::{detect, DetectionEvent};
pub use encoder::{encode, EncodeOutcome, WatermarkSpec};
pub use error::{CodecError, CodecWarning, Result};
pub use media::{extract_audio, reinject_audio, MediaAsset};
pub use pcm::PcmBuffer;
pub use tone::synthesize;
