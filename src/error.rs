use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unsupported container: {0}")]
    UnsupportedContainer(String),

    #[error("corrupt media: {0}")]
    CorruptMedia(String),

    #[error("invalid frequency {frequency_hz} Hz: {reason}")]
    InvalidFrequency { frequency_hz: f64, reason: String },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("watermark window {start}..{end} exceeds audio length of {len} frames")]
    OutOfRange { start: usize, end: usize, len: usize },

    #[error("no headroom for a tone between frames {start} and {end}: audio is at full scale")]
    InsufficientHeadroom { start: usize, end: usize },

    #[error("pcm layout mismatch: {0}")]
    LayoutMismatch(String),

    #[error("FFT error: {0}")]
    Fft(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Non-fatal conditions reported alongside a successful encode.
#[derive(Debug, Clone, PartialEq)]
pub enum CodecWarning {
    /// The requested tone amplitude would have clipped and was scaled down.
    AmplitudeClipped { requested: f32, applied: f32 },
}

impl std::fmt::Display for CodecWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecWarning::AmplitudeClipped { requested, applied } => write!(
                f,
                "tone amplitude reduced from {:.4} to {:.4} to avoid clipping",
                requested, applied
            ),
        }
    }
}

pub type Result<T> = std::result::Result<T, CodecError>;

/// Failures talking to the remote Campaign Store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("campaign store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("campaign store returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid campaign: {0}")]
    InvalidCampaign(String),

    #[error("invalid campaign store URL '{0}'")]
    InvalidBaseUrl(String),

    #[error("campaign '{0}' not found")]
    NotFound(String),
}

/// Rejections from the worker pool.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("worker pool saturated: {queued} jobs already queued")]
    Saturated { queued: usize },

    #[error("worker pool has shut down")]
    ShutDown,
}
