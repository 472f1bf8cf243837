/// Lowest tone frequency accepted for a watermark (Hz).
/// Most adult listeners cannot hear above this.
pub const MIN_WATERMARK_FREQUENCY_HZ: f64 = 18_000.0;

/// Highest tone frequency accepted for a watermark (Hz).
pub const MAX_WATERMARK_FREQUENCY_HZ: f64 = 20_000.0;

/// Default tone frequency, matching the campaign form default.
pub const DEFAULT_FREQUENCY_HZ: f64 = 19_000.0;

/// Length of the raised-cosine fade applied at each end of a tone burst.
pub const FADE_SECONDS: f64 = 0.005;

/// Default tone amplitude as a fraction of full scale.
pub const DEFAULT_AMPLITUDE: f32 = 0.02;

/// Default tone duration in seconds.
pub const DEFAULT_DURATION_SECONDS: f64 = 0.5;

/// Default detection band width around the target frequency (Hz).
pub const DEFAULT_BAND_WIDTH_HZ: f64 = 200.0;

/// Default minimum band-energy ratio for a detection.
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.3;

/// Minimum analysis window length; the actual window is the next power of two.
pub const MIN_WINDOW_SECONDS: f64 = 0.05;

/// Mean-square energy per sample below which a window counts as silence.
pub const SILENCE_FLOOR: f64 = 1e-12;

/// Environment variable overriding the configured Campaign Store base URL.
pub const API_BASE_ENV: &str = "SONIC_BARCODE_API_BASE";

/// Largest request body accepted by the HTTP service.
pub const MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;
