use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State},
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc as StdArc;
use tower_http::cors::{Any, CorsLayer};

use crate::cancel::CancelToken;
use crate::config::{AppConfig, WatermarkDefaults};
use crate::constants::{DEFAULT_FREQUENCY_HZ, MAX_UPLOAD_BYTES};
use crate::decoder::{DetectParams, DetectionEvent};
use crate::encoder::WatermarkSpec;
use crate::error::{CodecError, PoolError};
use crate::media::MediaAsset;
use crate::pipeline::{self, EncodedAsset};
use crate::pool::{JobHandle, WorkerPool};

const APPLIED_AMPLITUDE_HEADER: HeaderName = HeaderName::from_static("x-applied-amplitude");

// Shared state for request handlers
pub struct AppState {
    pub pool: WorkerPool,
    pub defaults: WatermarkDefaults,
}

pub fn serve(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let port = config.listen_port;
    let pool = WorkerPool::new(config.worker_count(), config.queue_depth)?;

    println!("Workers: {} (queue depth {})", pool.worker_count(), pool.queue_depth());
    println!("Listening on: http://[::]:{} (IPv4 + IPv6)", port);
    println!("Endpoints:");
    println!("  POST /api/encode?frequency=<Hz>&timestamp=<s>&name=<file>&title=<t>  - Embed a tone");
    println!("  POST /api/detect?frequency=<Hz>&name=<file>  - Find tones");
    println!("  GET  /api/health  - Health check");

    // Create tokio runtime and run server
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let app_state = StdArc::new(AppState {
            pool,
            defaults: config.watermark.clone(),
        });
        let app = router(app_state);

        let listener = tokio::net::TcpListener::bind(format!("[::]:{}", port))
            .await
            .map_err(|e| format!("Failed to bind to port {}: {}", port, e))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| format!("Server error: {}", e))?;

        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

pub fn router(state: StdArc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([header::CONTENT_DISPOSITION, APPLIED_AMPLITUDE_HEADER]);

    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/encode", post(encode_handler))
        .route("/api/detect", post(detect_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(state)
}

fn codec_status(e: &CodecError) -> StatusCode {
    match e {
        CodecError::UnsupportedContainer(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        CodecError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        CodecError::Io(_) | CodecError::Fft(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

fn pool_error_response(e: PoolError) -> Response {
    warn!("Rejecting request: {}", e);
    (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
}

fn content_type_for(extension: Option<&str>) -> &'static str {
    match extension {
        Some("wav") | Some("wave") => "audio/wav",
        Some("mp4") | Some("m4v") => "video/mp4",
        Some("m4a") => "audio/mp4",
        Some("mov") => "video/quicktime",
        Some("mp3") => "audio/mpeg",
        _ => "application/octet-stream",
    }
}

/// Cancels the job if the request goes away before it finishes.
struct CancelOnDrop(CancelToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Wait for a pool job without blocking the runtime.
async fn await_job<T: Send + 'static>(handle: JobHandle<T>) -> Result<T, Response> {
    let _guard = CancelOnDrop(handle.cancel_token().clone());
    match tokio::task::spawn_blocking(move || handle.wait()).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(pool_error_response(e)),
        Err(e) => {
            error!("Job waiter failed: {}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, "Job failed").into_response())
        }
    }
}

async fn health_handler(State(state): State<StdArc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        workers: state.pool.worker_count(),
        queued: state.pool.queued(),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    workers: usize,
    queued: usize,
}

// Query parameters for encode
#[derive(Deserialize)]
struct EncodeQuery {
    frequency: Option<f64>,
    timestamp: Option<f64>,
    duration: Option<f64>,
    amplitude: Option<f32>,
    title: Option<String>,
    /// Upload file name; its extension helps identify the container.
    name: Option<String>,
}

async fn encode_handler(
    State(state): State<StdArc<AppState>>,
    Query(query): Query<EncodeQuery>,
    body: Bytes,
) -> Response {
    if body.is_empty() {
        return (StatusCode::BAD_REQUEST, "Request body is empty").into_response();
    }
    let spec = WatermarkSpec {
        frequency_hz: query.frequency.unwrap_or(DEFAULT_FREQUENCY_HZ),
        start_time_seconds: query.timestamp.unwrap_or(0.0),
        duration_seconds: query.duration.unwrap_or(state.defaults.duration_seconds),
        amplitude: query.amplitude.unwrap_or(state.defaults.amplitude),
    };
    let asset = MediaAsset::from_bytes(query.name.unwrap_or_else(|| "upload".to_string()), body);
    let title = query.title.unwrap_or_default();

    let handle = match state
        .pool
        .submit(move |token| pipeline::encode_asset(&asset, &spec, &title, token))
    {
        Ok(handle) => handle,
        Err(e) => return pool_error_response(e),
    };
    let job_id = handle.id();

    let encoded: EncodedAsset = match await_job(handle).await {
        Ok(Ok(encoded)) => encoded,
        Ok(Err(e)) => {
            warn!("Encode job {} failed: {}", job_id, e);
            return (codec_status(&e), e.to_string()).into_response();
        }
        Err(response) => return response,
    };
    info!(
        "Encode job {} produced {} ({} bytes)",
        job_id,
        encoded.asset.name(),
        encoded.asset.len()
    );

    let extension = encoded.asset.extension();
    (
        StatusCode::OK,
        [
            (
                header::CONTENT_TYPE,
                content_type_for(extension.as_deref()).to_string(),
            ),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", encoded.asset.name()),
            ),
            (
                APPLIED_AMPLITUDE_HEADER,
                format!("{:.6}", encoded.applied_amplitude),
            ),
        ],
        encoded.asset.bytes(),
    )
        .into_response()
}

// Query parameters for detect
#[derive(Deserialize)]
struct DetectQuery {
    frequency: Option<f64>,
    band_width: Option<f64>,
    min_confidence: Option<f32>,
    name: Option<String>,
}

#[derive(Serialize)]
struct DetectResponse {
    frequency_hz: f64,
    events: Vec<DetectionEvent>,
}

async fn detect_handler(
    State(state): State<StdArc<AppState>>,
    Query(query): Query<DetectQuery>,
    body: Bytes,
) -> Response {
    if body.is_empty() {
        return (StatusCode::BAD_REQUEST, "Request body is empty").into_response();
    }
    let params = DetectParams::new(
        query.frequency.unwrap_or(DEFAULT_FREQUENCY_HZ),
        query.band_width.unwrap_or(state.defaults.band_width_hz),
        query.min_confidence.unwrap_or(state.defaults.min_confidence),
    );
    let frequency_hz = params.target_frequency_hz;
    let asset = MediaAsset::from_bytes(query.name.unwrap_or_else(|| "upload".to_string()), body);

    let handle = match state
        .pool
        .submit(move |token| pipeline::detect_asset(&asset, &params, token))
    {
        Ok(handle) => handle,
        Err(e) => return pool_error_response(e),
    };
    let job_id = handle.id();

    match await_job(handle).await {
        Ok(Ok(events)) => Json(DetectResponse {
            frequency_hz,
            events,
        })
        .into_response(),
        Ok(Err(e)) => {
            warn!("Detect job {} failed: {}", job_id, e);
            (codec_status(&e), e.to_string()).into_response()
        }
        Err(response) => response,
    }
}
