use serde::Deserialize;
use std::path::Path;

use crate::constants::{
    API_BASE_ENV, DEFAULT_AMPLITUDE, DEFAULT_BAND_WIDTH_HZ, DEFAULT_DURATION_SECONDS,
    DEFAULT_MIN_CONFIDENCE,
};

fn default_listen_port() -> u16 {
    3000
}

fn default_queue_depth() -> usize {
    16
}

/// Tone parameters that a campaign does not carry itself.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WatermarkDefaults {
    /// Tone length in seconds (default: 0.5)
    pub duration_seconds: f64,
    /// Tone amplitude as a fraction of full scale (default: 0.02)
    pub amplitude: f32,
    /// Detection band width around the target frequency in Hz (default: 200)
    pub band_width_hz: f64,
    /// Minimum band energy ratio for a detection (default: 0.3)
    pub min_confidence: f32,
}

impl Default for WatermarkDefaults {
    fn default() -> Self {
        Self {
            duration_seconds: DEFAULT_DURATION_SECONDS,
            amplitude: DEFAULT_AMPLITUDE,
            band_width_hz: DEFAULT_BAND_WIDTH_HZ,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }
}

/// Application configuration file structure
///
/// Read once at startup and never changed afterwards.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Base URL of the Campaign Store (overridden by SONIC_BARCODE_API_BASE)
    pub api_base_url: Option<String>,
    /// Worker threads for encode/detect jobs (default: available cores)
    pub workers: Option<usize>,
    /// Jobs allowed to wait for a worker before new ones are rejected (default: 16)
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    /// Port for the `serve` command (default: 3000)
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Tone defaults (maps to [watermark] section in TOML)
    #[serde(default)]
    pub watermark: WatermarkDefaults,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: None,
            workers: None,
            queue_depth: default_queue_depth(),
            listen_port: default_listen_port(),
            watermark: WatermarkDefaults::default(),
        }
    }
}

impl AppConfig {
    /// Parse a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| format!("Failed to parse config: {}", e))
    }

    /// Load configuration from an optional file, then apply the environment
    /// override for the API base URL, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self, String> {
        let config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    format!("Failed to read config file '{}': {}", path.display(), e)
                })?;
                Self::from_toml(&content)
                    .map_err(|e| format!("{} ('{}')", e, path.display()))?
            }
            None => Self::default(),
        };
        let config = config.with_env_override(std::env::var(API_BASE_ENV).ok());
        config.validate()?;
        Ok(config)
    }

    /// Replace the API base URL when the environment provides one.
    pub fn with_env_override(self, api_base: Option<String>) -> Self {
        match api_base.filter(|v| !v.trim().is_empty()) {
            Some(url) => Self {
                api_base_url: Some(url),
                ..self
            },
            None => self,
        }
    }

    /// Worker count, falling back to the number of available cores.
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    /// The Campaign Store URL, or an error naming how to set it.
    pub fn require_api_base(&self) -> Result<&str, String> {
        self.api_base_url.as_deref().ok_or_else(|| {
            format!(
                "no campaign store configured: set api_base_url in the config file or {}",
                API_BASE_ENV
            )
        })
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(url) = &self.api_base_url {
            let parsed = url::Url::parse(url)
                .map_err(|e| format!("api_base_url '{}' is not a valid URL: {}", url, e))?;
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                return Err(format!("api_base_url '{}' must use http or https", url));
            }
        }
        if self.workers == Some(0) {
            return Err("workers must be at least 1".to_string());
        }
        if self.queue_depth == 0 {
            return Err("queue_depth must be at least 1".to_string());
        }

        let wm = &self.watermark;
        if !(wm.duration_seconds > 0.0) {
            return Err(format!(
                "watermark.duration_seconds must be positive, got {}",
                wm.duration_seconds
            ));
        }
        if !(wm.amplitude > 0.0 && wm.amplitude <= 1.0) {
            return Err(format!(
                "watermark.amplitude must be in (0, 1], got {}",
                wm.amplitude
            ));
        }
        if !(wm.band_width_hz > 0.0) {
            return Err(format!(
                "watermark.band_width_hz must be positive, got {}",
                wm.band_width_hz
            ));
        }
        if !(0.0..1.0).contains(&wm.min_confidence) {
            return Err(format!(
                "watermark.min_confidence must be in [0, 1), got {}",
                wm.min_confidence
            ));
        }
        Ok(())
    }
}
