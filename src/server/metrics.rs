use std::sync::OnceLock;
use std::time::Instant;

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::Request;
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use prometheus::core::Collector;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts as PromOpts, Registry,
    TextEncoder,
};

struct Metrics {
    registry: Registry,
    http_requests_total: IntCounterVec,
    http_request_duration_seconds: HistogramVec,
    http_in_flight_requests: IntGauge,
    pipeline_outcomes_total: IntCounterVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

const LATENCY_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

fn register<C>(registry: &Registry, collector: C) -> C
where
    C: Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .expect("metrics must register");
    collector
}

fn metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let registry = Registry::new();

        let http_requests_total = register(
            &registry,
            IntCounterVec::new(
                PromOpts::new(
                    "whisper_wrap_http_requests_total",
                    "Total HTTP requests served by whisper-wrap.",
                ),
                &["route", "status"],
            )
            .expect("metrics definition must be valid"),
        );

        let http_request_duration_seconds = register(
            &registry,
            HistogramVec::new(
                HistogramOpts::new(
                    "whisper_wrap_http_request_duration_seconds",
                    "HTTP request latency in seconds.",
                )
                .buckets(LATENCY_BUCKETS.to_vec()),
                &["route", "status"],
            )
            .expect("metrics definition must be valid"),
        );

        let http_in_flight_requests = register(
            &registry,
            IntGauge::new(
                "whisper_wrap_http_in_flight_requests",
                "Current number of in-flight HTTP requests.",
            )
            .expect("metrics definition must be valid"),
        );

        let pipeline_outcomes_total = register(
            &registry,
            IntCounterVec::new(
                PromOpts::new(
                    "whisper_wrap_pipeline_outcomes_total",
                    "Transcription pipeline invocations by outcome.",
                ),
                &["outcome"],
            )
            .expect("metrics definition must be valid"),
        );

        Metrics {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            http_in_flight_requests,
            pipeline_outcomes_total,
        }
    })
}

/// Count one pipeline invocation under `outcome` (`"ok"` or an error kind).
pub fn record_outcome(outcome: &str) {
    metrics()
        .pipeline_outcomes_total
        .with_label_values(&[outcome])
        .inc();
}

pub async fn prometheus_metrics() -> Response {
    let families = metrics().registry.gather();
    let mut buf = Vec::new();
    if TextEncoder::new().encode(&families, &mut buf).is_err() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed to encode metrics",
        )
            .into_response();
    }

    (
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
        )],
        buf,
    )
        .into_response()
}

pub async fn track_http_metrics(req: Request<Body>, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());

    if route == "/metrics" || route == "/health" {
        return next.run(req).await;
    }

    let start = Instant::now();

    metrics().http_in_flight_requests.inc();
    let response = next.run(req).await;
    metrics().http_in_flight_requests.dec();

    let status = response.status().as_u16().to_string();
    metrics()
        .http_requests_total
        .with_label_values(&[route.as_str(), status.as_str()])
        .inc();
    metrics()
        .http_request_duration_seconds
        .with_label_values(&[route.as_str(), status.as_str()])
        .observe(start.elapsed().as_secs_f64());

    response
}
