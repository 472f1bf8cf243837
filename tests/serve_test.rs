use hound::{SampleFormat, WavSpec, WavWriter};
use serde_json::Value;
use std::io::Cursor;
use std::sync::Arc;

use sonic_barcode::config::{AppConfig, WatermarkDefaults};
use sonic_barcode::pool::WorkerPool;
use sonic_barcode::serve::{router, AppState};

/// Helper to build an in-memory 16-bit mono WAV of silence
fn silent_wav(sample_rate: u32, seconds: u32) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
        for _ in 0..sample_rate * seconds {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

/// Helper to start the service on an ephemeral port
async fn start_service() -> String {
    let state = Arc::new(AppState {
        pool: WorkerPool::new(2, 4).unwrap(),
        defaults: WatermarkDefaults::default(),
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn encode_then_detect_over_http() {
    let base = start_service().await;
    let wav = silent_wav(44_100, 4);

    let (status, disposition, amplitude, encoded, detected) =
        tokio::task::spawn_blocking(move || {
            let client = reqwest::blocking::Client::new();
            let response = client
                .post(format!(
                    "{}/api/encode?frequency=19000&timestamp=2&title=Spring%20Promo&name=ad.wav",
                    base
                ))
                .body(wav)
                .send()
                .unwrap();
            let status = response.status().as_u16();
            let header = |name: &str| {
                response
                    .headers()
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string()
            };
            let disposition = header("content-disposition");
            let amplitude = header("x-applied-amplitude");
            let encoded = response.bytes().unwrap().to_vec();

            let detected: Value = client
                .post(format!("{}/api/detect?frequency=19000&name=ad.wav", base))
                .body(encoded.clone())
                .send()
                .unwrap()
                .json()
                .unwrap();
            (status, disposition, amplitude, encoded, detected)
        })
        .await
        .unwrap();

    assert_eq!(status, 200);
    assert_eq!(disposition, "attachment; filename=\"Spring_Promo_encoded.wav\"");
    assert!((amplitude.parse::<f32>().unwrap() - 0.02).abs() < 1e-6);
    assert_eq!(&encoded[0..4], b"RIFF");

    let events = detected["events"].as_array().unwrap();
    assert_eq!(events.len(), 1, "events: {events:?}");
    let timestamp = events[0]["timestamp_seconds"].as_f64().unwrap();
    assert!((timestamp - 2.0).abs() < 0.1);
}

#[tokio::test]
async fn codec_errors_map_to_status_codes() {
    let base = start_service().await;
    let wav = silent_wav(44_100, 1);

    let (out_of_range, far_future, bad_frequency, unsupported, empty) =
        tokio::task::spawn_blocking(move || {
            let client = reqwest::blocking::Client::new();
            let post = |query: &str, body: Vec<u8>| {
                client
                    .post(format!("{}/api/encode?{}", base, query))
                    .body(body)
                    .send()
                    .unwrap()
                    .status()
                    .as_u16()
            };
            (
                post("timestamp=0.9&name=a.wav", wav.clone()),
                post("timestamp=1e30&name=a.wav", wav.clone()),
                post("frequency=15000&name=a.wav", wav.clone()),
                post("name=song.mp3", vec![0u8; 256]),
                post("name=a.wav", Vec::new()),
            )
        })
        .await
        .unwrap();

    assert_eq!(out_of_range, 422);
    assert_eq!(far_future, 422);
    assert_eq!(bad_frequency, 422);
    assert!(unsupported == 415 || unsupported == 422, "got {}", unsupported);
    assert_eq!(empty, 400);
}

#[tokio::test]
async fn quoted_title_yields_a_clean_attachment_name() {
    let base = start_service().await;
    let wav = silent_wav(44_100, 1);

    let (status, disposition) = tokio::task::spawn_blocking(move || {
        let response = reqwest::blocking::Client::new()
            .post(format!(
                "{}/api/encode?timestamp=0.2&title=Big%20%22Sale%22&name=ad.wav",
                base
            ))
            .body(wav)
            .send()
            .unwrap();
        let disposition = response
            .headers()
            .get("content-disposition")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        (response.status().as_u16(), disposition)
    })
    .await
    .unwrap();

    assert_eq!(status, 200);
    assert_eq!(disposition, "attachment; filename=\"Big_Sale_encoded.wav\"");
}

#[tokio::test]
async fn health_reports_workers() {
    let base = start_service().await;
    let health: Value = tokio::task::spawn_blocking(move || {
        reqwest::blocking::get(format!("{}/api/health", base))
            .unwrap()
            .json()
            .unwrap()
    })
    .await
    .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["workers"], 2);
}

#[test]
fn config_file_drives_service_defaults() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("sonic.toml");
    std::fs::write(
        &path,
        "workers = 3\nlisten_port = 9000\n[watermark]\namplitude = 0.04\n",
    )
    .unwrap();

    let config = AppConfig::load(Some(path.as_path())).unwrap();
    assert_eq!(config.worker_count(), 3);
    assert_eq!(config.listen_port, 9000);
    assert_eq!(config.watermark.amplitude, 0.04);

    std::fs::write(&path, "workers = \"many\"\n").unwrap();
    assert!(AppConfig::load(Some(path.as_path())).is_err());
    assert!(AppConfig::load(Some(temp_dir.path().join("missing.toml").as_path())).is_err());
}
