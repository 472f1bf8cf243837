// Campaign records and the blocking client for the remote Campaign Store

use log::{debug, info};
use reqwest::blocking::Client;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::time::Duration;

use crate::config::WatermarkDefaults;
use crate::constants::{DEFAULT_FREQUENCY_HZ, MAX_WATERMARK_FREQUENCY_HZ, MIN_WATERMARK_FREQUENCY_HZ};
use crate::encoder::WatermarkSpec;
use crate::error::StoreError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Identifier assigned by the store. Some stores hand out integers, others
/// strings, so both are kept as received.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CampaignId {
    Number(i64),
    Text(String),
}

impl fmt::Display for CampaignId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CampaignId::Number(n) => write!(f, "{}", n),
            CampaignId::Text(s) => f.write_str(s),
        }
    }
}

/// The store accepts form values, so numbers travel as strings. Reading
/// back accepts either.
#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(f64),
    Text(String),
}

fn number_as_string<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_string())
}

fn lenient_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::Text(s) => s.trim().parse::<f64>().map_err(|_| {
            serde::de::Error::custom(format!("expected a number, got '{}'", s))
        }),
    }
}

fn empty_as_none<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

/// A campaign before the store has assigned it an id.
///
/// Values are never edited in place; each `with_*` call returns a new draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignDraft {
    title: String,
    brand: String,
    #[serde(
        rename = "barcodeId",
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    barcode_id: Option<String>,
    #[serde(
        rename = "timestamp",
        serialize_with = "number_as_string",
        deserialize_with = "lenient_number"
    )]
    timestamp_seconds: f64,
    #[serde(
        rename = "frequency",
        serialize_with = "number_as_string",
        deserialize_with = "lenient_number"
    )]
    frequency_hz: f64,
    #[serde(rename = "url", default)]
    redirect_url: String,
}

impl CampaignDraft {
    pub fn new(title: impl Into<String>, brand: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            brand: brand.into(),
            barcode_id: None,
            timestamp_seconds: 0.0,
            frequency_hz: DEFAULT_FREQUENCY_HZ,
            redirect_url: String::new(),
        }
    }

    pub fn with_title(self, title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..self
        }
    }

    pub fn with_brand(self, brand: impl Into<String>) -> Self {
        Self {
            brand: brand.into(),
            ..self
        }
    }

    pub fn with_barcode_id(self, barcode_id: Option<String>) -> Self {
        Self {
            barcode_id: barcode_id.filter(|s| !s.trim().is_empty()),
            ..self
        }
    }

    pub fn with_timestamp_seconds(self, timestamp_seconds: f64) -> Self {
        Self {
            timestamp_seconds,
            ..self
        }
    }

    pub fn with_frequency_hz(self, frequency_hz: f64) -> Self {
        Self {
            frequency_hz,
            ..self
        }
    }

    pub fn with_redirect_url(self, redirect_url: impl Into<String>) -> Self {
        Self {
            redirect_url: redirect_url.into(),
            ..self
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn brand(&self) -> &str {
        &self.brand
    }

    pub fn barcode_id(&self) -> Option<&str> {
        self.barcode_id.as_deref()
    }

    pub fn timestamp_seconds(&self) -> f64 {
        self.timestamp_seconds
    }

    pub fn frequency_hz(&self) -> f64 {
        self.frequency_hz
    }

    pub fn redirect_url(&self) -> &str {
        &self.redirect_url
    }

    /// Check the draft before it is sent to the store.
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("title must not be empty".to_string());
        }
        if self.brand.trim().is_empty() {
            return Err("brand must not be empty".to_string());
        }
        if !self.timestamp_seconds.is_finite() || self.timestamp_seconds < 0.0 {
            return Err(format!(
                "timestamp must be a non-negative number of seconds, got {}",
                self.timestamp_seconds
            ));
        }
        if !(MIN_WATERMARK_FREQUENCY_HZ..=MAX_WATERMARK_FREQUENCY_HZ).contains(&self.frequency_hz)
        {
            return Err(format!(
                "frequency must be between {} and {} Hz, got {}",
                MIN_WATERMARK_FREQUENCY_HZ, MAX_WATERMARK_FREQUENCY_HZ, self.frequency_hz
            ));
        }
        let url = url::Url::parse(&self.redirect_url)
            .map_err(|e| format!("redirect url '{}' is invalid: {}", self.redirect_url, e))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(format!(
                "redirect url '{}' must use http or https",
                self.redirect_url
            ));
        }
        Ok(())
    }

    /// Tone placement for this campaign, with the remaining parameters
    /// taken from configuration.
    pub fn watermark_spec(&self, defaults: &WatermarkDefaults) -> WatermarkSpec {
        WatermarkSpec {
            frequency_hz: self.frequency_hz,
            start_time_seconds: self.timestamp_seconds,
            duration_seconds: defaults.duration_seconds,
            amplitude: defaults.amplitude,
        }
    }
}

/// A campaign as stored remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    #[serde(flatten)]
    pub draft: CampaignDraft,
}

impl Campaign {
    pub fn watermark_spec(&self, defaults: &WatermarkDefaults) -> WatermarkSpec {
        self.draft.watermark_spec(defaults)
    }
}

/// Download name for an encoded asset: `<title>_encoded.<ext>`.
///
/// Whitespace runs collapse to `_`. Path separators, double quotes and
/// control characters are dropped so the name is a single path component
/// that can sit inside a quoted `Content-Disposition` filename.
pub fn encoded_file_name(title: &str, extension: Option<&str>) -> String {
    let mut stem = String::with_capacity(title.len());
    let mut in_space = false;
    for c in title.trim().chars() {
        if c.is_whitespace() {
            if !in_space {
                stem.push('_');
                in_space = true;
            }
            continue;
        }
        in_space = false;
        if c == '/' || c == '\\' || c == '"' || c.is_control() {
            continue;
        }
        stem.push(c);
    }
    // A title made only of dots would name a directory.
    if stem.chars().all(|c| c == '.' || c == '_') {
        stem = "campaign".to_string();
    }
    match extension {
        Some(ext) if !ext.is_empty() => format!("{}_encoded.{}", stem, ext),
        _ => format!("{}_encoded", stem),
    }
}

/// Blocking HTTP client for the Campaign Store.
pub struct CampaignClient {
    client: Client,
    base_url: String,
}

impl CampaignClient {
    pub fn new(base_url: &str) -> Result<Self, StoreError> {
        let parsed = url::Url::parse(base_url)
            .map_err(|_| StoreError::InvalidBaseUrl(base_url.to_string()))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(StoreError::InvalidBaseUrl(base_url.to_string()));
        }
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn campaigns_url(&self) -> String {
        format!("{}/campaigns", self.base_url)
    }

    /// Fetch every campaign.
    pub fn list(&self) -> Result<Vec<Campaign>, StoreError> {
        let url = self.campaigns_url();
        debug!("GET {}", url);
        let response = self.client.get(&url).send()?;
        let body = read_success(response)?;
        let campaigns: Vec<Campaign> = serde_json::from_str(&body)
            .map_err(|e| StoreError::InvalidCampaign(format!("unreadable campaign list: {}", e)))?;
        info!("Fetched {} campaign(s) from {}", campaigns.len(), self.base_url);
        Ok(campaigns)
    }

    /// Validate `draft` and register it with the store.
    pub fn create(&self, draft: &CampaignDraft) -> Result<Campaign, StoreError> {
        draft.validate().map_err(StoreError::InvalidCampaign)?;
        let url = self.campaigns_url();
        debug!("POST {} ({})", url, draft.title());
        let response = self.client.post(&url).json(draft).send()?;
        let body = read_success(response)?;
        let campaign: Campaign = serde_json::from_str(&body).map_err(|e| {
            StoreError::InvalidCampaign(format!("unreadable created campaign: {}", e))
        })?;
        info!("Created campaign {} ('{}')", campaign.id, campaign.draft.title());
        Ok(campaign)
    }

    /// Look a campaign up by id among the listed ones.
    pub fn find(&self, id: &str) -> Result<Campaign, StoreError> {
        self.list()?
            .into_iter()
            .find(|c| c.id.to_string() == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

fn read_success(response: reqwest::blocking::Response) -> Result<String, StoreError> {
    let status = response.status();
    let body = response.text()?;
    if !status.is_success() {
        return Err(StoreError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> CampaignDraft {
        CampaignDraft::new("Summer Sale", "Acme")
            .with_timestamp_seconds(5.0)
            .with_redirect_url("https://acme.example/summer")
    }

    #[test]
    fn draft_serializes_with_store_keys() {
        let json = serde_json::to_value(draft().with_barcode_id(Some("B-1".into()))).unwrap();
        assert_eq!(json["title"], "Summer Sale");
        assert_eq!(json["barcodeId"], "B-1");
        assert_eq!(json["timestamp"], "5");
        assert_eq!(json["frequency"], "19000");
        assert_eq!(json["url"], "https://acme.example/summer");
    }

    #[test]
    fn empty_barcode_is_omitted() {
        let json = serde_json::to_value(draft().with_barcode_id(Some(" ".into()))).unwrap();
        assert!(json.get("barcodeId").is_none());
    }

    #[test]
    fn campaign_accepts_numbers_or_strings() {
        let from_strings: Campaign = serde_json::from_str(
            r#"{"id":"c1","title":"A","brand":"B","barcodeId":"","timestamp":"2.5","frequency":"18500","url":"https://x.example"}"#,
        )
        .unwrap();
        assert_eq!(from_strings.id, CampaignId::Text("c1".into()));
        assert_eq!(from_strings.draft.timestamp_seconds(), 2.5);
        assert_eq!(from_strings.draft.frequency_hz(), 18_500.0);
        assert_eq!(from_strings.draft.barcode_id(), None);

        let from_numbers: Campaign = serde_json::from_str(
            r#"{"id":7,"title":"A","brand":"B","timestamp":2.5,"frequency":18500,"url":"https://x.example"}"#,
        )
        .unwrap();
        assert_eq!(from_numbers.id.to_string(), "7");
        assert_eq!(from_numbers.draft, from_strings.draft);
    }

    #[test]
    fn blank_timestamp_is_rejected() {
        let result: Result<Campaign, _> = serde_json::from_str(
            r#"{"id":1,"title":"A","brand":"B","timestamp":"","frequency":"19000","url":""}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn edits_leave_the_original_untouched() {
        let original = draft();
        let edited = original.clone().with_frequency_hz(18_200.0);
        assert_eq!(original.frequency_hz(), DEFAULT_FREQUENCY_HZ);
        assert_eq!(edited.frequency_hz(), 18_200.0);
        assert_eq!(edited.title(), original.title());
    }

    #[test]
    fn validation_rules() {
        assert!(draft().validate().is_ok());
        assert!(draft().with_title("  ").validate().is_err());
        assert!(draft().with_brand("").validate().is_err());
        assert!(draft().with_timestamp_seconds(-1.0).validate().is_err());
        assert!(draft().with_frequency_hz(15_000.0).validate().is_err());
        assert!(draft().with_redirect_url("not a url").validate().is_err());
        assert!(draft().with_redirect_url("ftp://acme.example").validate().is_err());
    }

    #[test]
    fn watermark_spec_uses_campaign_placement() {
        let defaults = WatermarkDefaults::default();
        let spec = draft().with_frequency_hz(18_800.0).watermark_spec(&defaults);
        assert_eq!(spec.frequency_hz, 18_800.0);
        assert_eq!(spec.start_time_seconds, 5.0);
        assert_eq!(spec.duration_seconds, defaults.duration_seconds);
        assert_eq!(spec.amplitude, defaults.amplitude);
    }

    #[test]
    fn encoded_names_are_single_components() {
        assert_eq!(encoded_file_name("Summer  Sale", Some("mp4")), "Summer_Sale_encoded.mp4");
        assert_eq!(encoded_file_name("a/b\\c", Some("wav")), "abc_encoded.wav");
        assert_eq!(encoded_file_name("", Some("mov")), "campaign_encoded.mov");
        assert_eq!(encoded_file_name("..", None), "campaign_encoded");
        assert_eq!(encoded_file_name("tab\there", Some("wav")), "tab_here_encoded.wav");
        assert_eq!(encoded_file_name("Big \"Sale\"", Some("mp4")), "Big_Sale_encoded.mp4");
        assert_eq!(encoded_file_name("\"\"", Some("mp4")), "campaign_encoded.mp4");
    }

    #[test]
    fn client_rejects_bad_base_url() {
        assert!(matches!(
            CampaignClient::new("campaign store"),
            Err(StoreError::InvalidBaseUrl(_))
        ));
        let client = CampaignClient::new("http://localhost:9/api/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:9/api");
    }
}
