use clap::{Parser, Subcommand};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::path::{Path, PathBuf};

use sonic_barcode::campaign::{CampaignClient, CampaignDraft};
use sonic_barcode::cancel::CancelToken;
use sonic_barcode::config::AppConfig;
use sonic_barcode::constants::DEFAULT_FREQUENCY_HZ;
use sonic_barcode::decoder::DetectParams;
use sonic_barcode::encoder::WatermarkSpec;
use sonic_barcode::media::{extract_audio, MediaAsset};
use sonic_barcode::pipeline::{detect_asset, encode_asset};
use sonic_barcode::serve::serve;

#[derive(Parser, Debug)]
#[command(author, version, about = "Embed and detect inaudible sonic barcodes in media files")]
struct Args {
    /// Path to config file (TOML format)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Embed a tone into a media file
    Encode {
        /// Media file to watermark (WAV, or MP4/MOV with PCM audio)
        input: PathBuf,

        /// Directory for the encoded file (default: next to the input)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Take frequency, timestamp and title from this stored campaign
        #[arg(long)]
        campaign: Option<String>,

        /// Tone frequency in Hz (default: 19000, or the campaign's)
        #[arg(short, long)]
        frequency: Option<f64>,

        /// Tone start in seconds (default: 0, or the campaign's)
        #[arg(short, long)]
        timestamp: Option<f64>,

        /// Tone length in seconds (overrides config file)
        #[arg(short, long)]
        duration: Option<f64>,

        /// Tone amplitude in (0, 1] (overrides config file)
        #[arg(short, long)]
        amplitude: Option<f32>,

        /// Title used to name the output (default: input file stem)
        #[arg(long)]
        title: Option<String>,
    },
    /// Scan a media file for a tone
    Detect {
        input: PathBuf,

        /// Target frequency in Hz
        #[arg(short, long, default_value_t = DEFAULT_FREQUENCY_HZ)]
        frequency: f64,

        /// Band width around the target in Hz (overrides config file)
        #[arg(short, long)]
        band_width: Option<f64>,

        /// Minimum band energy ratio in [0, 1) (overrides config file)
        #[arg(short, long)]
        min_confidence: Option<f32>,

        /// Print detections as JSON
        #[arg(long)]
        json: bool,
    },
    /// Dump the audio track of a media file to a 32-bit float WAV
    Extract { input: PathBuf, output: PathBuf },
    /// Manage campaigns in the Campaign Store
    Campaigns {
        #[command(subcommand)]
        action: CampaignAction,
    },
    /// Serve the encode/detect HTTP API
    Serve {
        /// Port to listen on (overrides config file)
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[derive(Subcommand, Debug)]
enum CampaignAction {
    /// List stored campaigns
    List,
    /// Register a new campaign
    Add {
        #[arg(long)]
        title: String,
        #[arg(long)]
        brand: String,
        /// Tone start in seconds
        #[arg(long)]
        timestamp: f64,
        /// Redirect URL opened when the tone is heard
        #[arg(long)]
        url: String,
        #[arg(long, default_value_t = DEFAULT_FREQUENCY_HZ)]
        frequency: f64,
        #[arg(long)]
        barcode_id: Option<String>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = AppConfig::load(args.config.as_deref())?;

    match args.command {
        Command::Encode {
            input,
            output_dir,
            campaign,
            frequency,
            timestamp,
            duration,
            amplitude,
            title,
        } => {
            let request = EncodeRequest {
                campaign,
                frequency,
                timestamp,
                duration,
                amplitude,
                title,
            };
            encode(&config, &input, output_dir.as_deref(), request)
        }
        Command::Detect {
            input,
            frequency,
            band_width,
            min_confidence,
            json,
        } => {
            let params = DetectParams::new(
                frequency,
                band_width.unwrap_or(config.watermark.band_width_hz),
                min_confidence.unwrap_or(config.watermark.min_confidence),
            );
            detect(&input, &params, json)
        }
        Command::Extract { input, output } => extract(&input, &output),
        Command::Campaigns { action } => campaigns(&config, action),
        Command::Serve { port } => {
            let config = AppConfig {
                listen_port: port.unwrap_or(config.listen_port),
                ..config
            };
            serve(config)
        }
    }
}

struct EncodeRequest {
    campaign: Option<String>,
    frequency: Option<f64>,
    timestamp: Option<f64>,
    duration: Option<f64>,
    amplitude: Option<f32>,
    title: Option<String>,
}

fn encode(
    config: &AppConfig,
    input: &Path,
    output_dir: Option<&Path>,
    request: EncodeRequest,
) -> Result<(), Box<dyn std::error::Error>> {
    let asset = MediaAsset::open(input)?;

    // Campaign values first, explicit flags win
    let (mut spec, campaign_title) = match &request.campaign {
        Some(id) => {
            let client = CampaignClient::new(config.require_api_base()?)?;
            let campaign = client.find(id)?;
            println!(
                "Campaign {}: '{}' ({}) at {}s, {} Hz",
                campaign.id,
                campaign.draft.title(),
                campaign.draft.brand(),
                campaign.draft.timestamp_seconds(),
                campaign.draft.frequency_hz()
            );
            let spec = campaign.watermark_spec(&config.watermark);
            (spec, Some(campaign.draft.title().to_string()))
        }
        None => (
            WatermarkSpec {
                frequency_hz: DEFAULT_FREQUENCY_HZ,
                start_time_seconds: 0.0,
                duration_seconds: config.watermark.duration_seconds,
                amplitude: config.watermark.amplitude,
            },
            None,
        ),
    };
    if let Some(f) = request.frequency {
        spec.frequency_hz = f;
    }
    if let Some(t) = request.timestamp {
        spec.start_time_seconds = t;
    }
    if let Some(d) = request.duration {
        spec.duration_seconds = d;
    }
    if let Some(a) = request.amplitude {
        spec.amplitude = a;
    }

    let title = request
        .title
        .or(campaign_title)
        .or_else(|| {
            input
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
        })
        .unwrap_or_default();

    println!(
        "Embedding {} Hz tone at {}s for {}s into {}",
        spec.frequency_hz,
        spec.start_time_seconds,
        spec.duration_seconds,
        input.display()
    );
    let encoded = encode_asset(&asset, &spec, &title, &CancelToken::new())?;
    for warning in &encoded.warnings {
        eprintln!("Warning: {}", warning);
    }

    let dir = match output_dir {
        Some(dir) => dir.to_path_buf(),
        None => input
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    };
    std::fs::create_dir_all(&dir)
        .map_err(|e| format!("Failed to create output directory '{}': {}", dir.display(), e))?;
    let path = encoded.asset.write_to(&dir)?;
    println!(
        "Wrote {} (amplitude {:.4})",
        path.display(),
        encoded.applied_amplitude
    );
    Ok(())
}

fn detect(input: &Path, params: &DetectParams, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let asset = MediaAsset::open(input)?;
    let events = detect_asset(&asset, params, &CancelToken::new())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&events)?);
        return Ok(());
    }
    if events.is_empty() {
        println!("No {} Hz tone found in {}", params.target_frequency_hz, input.display());
        return Ok(());
    }
    for event in &events {
        println!(
            "{:>10.3}s  {} Hz  confidence {:.3}",
            event.timestamp_seconds, event.frequency_hz, event.confidence
        );
    }
    Ok(())
}

fn extract(input: &Path, output: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let asset = MediaAsset::open(input)?;
    let pcm = extract_audio(&asset)?;

    let spec = WavSpec {
        channels: pcm.channels(),
        sample_rate: pcm.sample_rate(),
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(output, spec)?;
    for &sample in pcm.samples() {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;

    println!(
        "Wrote {} ({} frames, {} ch @ {} Hz, {:.2}s)",
        output.display(),
        pcm.frames(),
        pcm.channels(),
        pcm.sample_rate(),
        pcm.duration_seconds()
    );
    Ok(())
}

fn campaigns(config: &AppConfig, action: CampaignAction) -> Result<(), Box<dyn std::error::Error>> {
    let client = CampaignClient::new(config.require_api_base()?)?;
    match action {
        CampaignAction::List => {
            let campaigns = client.list()?;
            if campaigns.is_empty() {
                println!("No campaigns");
            }
            for c in &campaigns {
                println!(
                    "{}  {} ({})  {}s @ {} Hz  -> {}{}",
                    c.id,
                    c.draft.title(),
                    c.draft.brand(),
                    c.draft.timestamp_seconds(),
                    c.draft.frequency_hz(),
                    c.draft.redirect_url(),
                    c.draft
                        .barcode_id()
                        .map(|b| format!("  [barcode {}]", b))
                        .unwrap_or_default()
                );
            }
        }
        CampaignAction::Add {
            title,
            brand,
            timestamp,
            url,
            frequency,
            barcode_id,
        } => {
            let draft = CampaignDraft::new(title, brand)
                .with_timestamp_seconds(timestamp)
                .with_frequency_hz(frequency)
                .with_redirect_url(url)
                .with_barcode_id(barcode_id);
            let created = client.create(&draft)?;
            println!("Created campaign {} ('{}')", created.id, created.draft.title());
        }
    }
    Ok(())
}
