//! HTTP surface: routes, error responses, request tracing, and metrics.

pub mod metrics;

use std::sync::Arc;

use axum::body::Body;
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::middleware::from_fn;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::TryStreamExt;
use serde::Serialize;
use serde_json::json;
use tower_http::trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnResponse, TraceLayer};
use tracing::{Level, debug, error, warn};

use crate::engine::{Transcription, TranscriptionEngine, WhisperClient};
use crate::error::Error;
use crate::files::BYTES_PER_MB;
use crate::pipeline::{Origin, Pipeline};
use crate::transcoder::{FfmpegTranscoder, Transcoder};

/// Room for multipart boundaries and part headers on top of the file size limit.
pub const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Shared, read-only handler state.
pub struct AppState<T: Transcoder = FfmpegTranscoder, E: TranscriptionEngine = WhisperClient> {
    pipeline: Arc<Pipeline<T, E>>,
}

impl<T: Transcoder, E: TranscriptionEngine> Clone for AppState<T, E> {
    fn clone(&self) -> Self {
        Self {
            pipeline: Arc::clone(&self.pipeline),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub engine_reachable: bool,
    pub engine_url: String,
}

struct AppError {
    status: StatusCode,
    message: String,
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        Self {
            status: err.status_code(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            detail: self.message,
        });
        (self.status, body).into_response()
    }
}

/// Build the application router around a shared pipeline.
pub fn router<T, E>(pipeline: Arc<Pipeline<T, E>>) -> Router
where
    T: Transcoder + 'static,
    E: TranscriptionEngine + 'static,
{
    let body_limit = usize::try_from(pipeline.store().max_file_size_bytes())
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    let state = AppState { pipeline };

    Router::new()
        .route("/", get(root))
        .route("/health", get(health::<T, E>))
        .route("/metrics", get(metrics::prometheus_metrics))
        .route("/transcribe", post(transcribe::<T, E>))
        .route("/transcribe-raw", post(transcribe_raw::<T, E>))
        .route_layer(from_fn(metrics::track_http_metrics))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(
                    DefaultMakeSpan::new()
                        .level(Level::INFO)
                        .include_headers(false),
                )
                .on_response(DefaultOnResponse::new().level(Level::INFO))
                .on_failure(DefaultOnFailure::new().level(Level::ERROR)),
        )
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "name": "whisper-wrap",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "HTTP wrapper for whisper.cpp with universal audio format support",
        "endpoints": {
            "transcribe": "POST /transcribe - Upload audio file for transcription (multipart/form-data)",
            "transcribe-raw": "POST /transcribe-raw - Send raw audio data for transcription (iOS Shortcuts compatible)",
            "health": "GET /health - Service health status",
            "metrics": "GET /metrics - Prometheus metrics",
        },
    }))
}

async fn health<T, E>(State(state): State<AppState<T, E>>) -> Json<HealthResponse>
where
    T: Transcoder,
    E: TranscriptionEngine,
{
    let engine = state.pipeline.engine();
    let engine_reachable = engine.health_check().await;

    Json(HealthResponse {
        status: if engine_reachable {
            "healthy"
        } else {
            "degraded"
        },
        engine_reachable,
        engine_url: engine.base_url().to_owned(),
    })
}

async fn transcribe<T, E>(
    State(state): State<AppState<T, E>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, AppError>
where
    T: Transcoder,
    E: TranscriptionEngine,
{
    finish(transcribe_multipart(&state.pipeline, multipart).await)
}

async fn transcribe_multipart<T, E>(
    pipeline: &Pipeline<T, E>,
    multipart: Result<Multipart, MultipartRejection>,
) -> crate::Result<Transcription>
where
    T: Transcoder,
    E: TranscriptionEngine,
{
    let max_mb = pipeline.store().max_file_size_bytes() / BYTES_PER_MB;

    let mut multipart = multipart.map_err(|rejection| {
        debug!(error = %rejection, "request is not a multipart upload");
        Error::MissingFile
    })?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| multipart_error(err, max_mb))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let origin = Origin::Multipart {
            filename: field.file_name().map(str::to_owned),
        };
        let body = field.map_err(move |err| multipart_error(err, max_mb));
        return pipeline.run(origin, body).await;
    }

    Err(Error::MissingFile)
}

async fn transcribe_raw<T, E>(
    State(state): State<AppState<T, E>>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError>
where
    T: Transcoder,
    E: TranscriptionEngine,
{
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    let origin = Origin::Raw { content_type };
    let body = body
        .into_data_stream()
        .map_err(|err| Error::InvalidUpload(err.to_string()));
    finish(state.pipeline.run(origin, body).await)
}

fn multipart_error(err: MultipartError, max_mb: u64) -> Error {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Error::TooLarge { max_mb }
    } else {
        Error::InvalidUpload(err.body_text())
    }
}

fn finish(result: crate::Result<Transcription>) -> Result<Response, AppError> {
    match result {
        Ok(transcription) => {
            metrics::record_outcome("ok");
            Ok((
                [(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                )],
                String::from(transcription),
            )
                .into_response())
        }
        Err(err) => {
            metrics::record_outcome(err.kind());
            if err.status_code().is_server_error() {
                error!(kind = err.kind(), error = %err, "transcription failed");
            } else {
                warn!(kind = err.kind(), error = %err, "transcription request rejected");
            }
            Err(err.into())
        }
    }
}
