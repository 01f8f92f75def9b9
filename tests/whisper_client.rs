use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::{Multipart, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use tokio::net::TcpListener;

use whisper_wrap::{EngineError, TranscriptionEngine, WhisperClient};

const ENGINE_JSON: &str = r#"{"text":" And so my fellow Americans",  "language":"en"}"#;

#[derive(Clone, Default)]
struct Received {
    fields: Arc<Mutex<Vec<(String, String)>>>,
}

impl Received {
    fn snapshot(&self) -> Vec<(String, String)> {
        self.fields.lock().map(|f| f.clone()).unwrap_or_default()
    }
}

async fn inference(State(received): State<Received>, mut multipart: Multipart) -> impl IntoResponse {
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_owned();
        let value = if name == "file" {
            let filename = field.file_name().unwrap_or_default().to_owned();
            let content_type = field.content_type().unwrap_or_default().to_owned();
            let len = field.bytes().await.map(|b| b.len()).unwrap_or_default();
            format!("{filename}|{content_type}|{len}")
        } else {
            field.text().await.unwrap_or_default()
        };
        if let Ok(mut fields) = received.fields.lock() {
            fields.push((name, value));
        }
    }
    ([(header::CONTENT_TYPE, "application/json")], ENGINE_JSON)
}

async fn spawn_engine(app: Router) -> anyhow::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{addr}"))
}

/// A base URL nothing is listening on.
async fn closed_url() -> anyhow::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(format!("http://{addr}"))
}

fn write_wav(dir: &Path, samples: u32) -> anyhow::Result<PathBuf> {
    let path = dir.join("input.wav");
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec)?;
    for _ in 0..samples {
        writer.write_sample(0i16)?;
    }
    writer.finalize()?;
    Ok(path)
}

#[tokio::test]
async fn uploads_wav_and_relays_json_verbatim() -> anyhow::Result<()> {
    let received = Received::default();
    let app = Router::new()
        .route("/inference", post(inference))
        .with_state(received.clone());
    let url = spawn_engine(app).await?;

    let dir = tempfile::tempdir()?;
    let wav = write_wav(dir.path(), 1600)?;
    let wav_len = std::fs::metadata(&wav)?.len();

    let client = WhisperClient::new(format!("{url}/"), Duration::from_secs(5))?;
    let transcription = client.transcribe(&wav).await?;
    assert_eq!(transcription.as_json(), ENGINE_JSON);

    let fields = received.snapshot();
    let get = |name: &str| {
        fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
    };
    assert_eq!(get("file"), Some(format!("audio.wav|audio/wav|{wav_len}")));
    assert_eq!(get("temperature").as_deref(), Some("0.0"));
    assert_eq!(get("temperature_inc").as_deref(), Some("0.2"));
    assert_eq!(get("response_format").as_deref(), Some("json"));
    Ok(())
}

#[tokio::test]
async fn error_status_carries_engine_body() -> anyhow::Result<()> {
    let app = Router::new().route(
        "/inference",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "failed to load model") }),
    );
    let url = spawn_engine(app).await?;

    let dir = tempfile::tempdir()?;
    let wav = write_wav(dir.path(), 160)?;
    let client = WhisperClient::new(url, Duration::from_secs(5))?;

    match client.transcribe(&wav).await {
        Err(EngineError::Status { status, body }) => {
            assert_eq!(status, 500);
            assert_eq!(body, "failed to load model");
        }
        other => panic!("expected status error, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn non_json_success_body_is_rejected() -> anyhow::Result<()> {
    let app = Router::new().route("/inference", post(|| async { "<html>oops</html>" }));
    let url = spawn_engine(app).await?;

    let dir = tempfile::tempdir()?;
    let wav = write_wav(dir.path(), 160)?;
    let client = WhisperClient::new(url, Duration::from_secs(5))?;

    let err = client.transcribe(&wav).await.expect_err("expected invalid body");
    assert!(matches!(err, EngineError::InvalidBody(_)), "{err:?}");
    Ok(())
}

#[tokio::test]
async fn slow_engine_times_out() -> anyhow::Result<()> {
    let app = Router::new().route(
        "/inference",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            ENGINE_JSON
        }),
    );
    let url = spawn_engine(app).await?;

    let dir = tempfile::tempdir()?;
    let wav = write_wav(dir.path(), 160)?;
    let client = WhisperClient::new(url, Duration::from_millis(200))?;

    let err = client.transcribe(&wav).await.expect_err("expected timeout");
    match &err {
        EngineError::Timeout { seconds } => assert!((*seconds - 0.2).abs() < 1e-9, "{seconds}"),
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(err.to_string(), "Whisper server timeout after 0.2 seconds");
    Ok(())
}

#[tokio::test]
async fn refused_connection_is_unreachable() -> anyhow::Result<()> {
    let url = closed_url().await?;
    let dir = tempfile::tempdir()?;
    let wav = write_wav(dir.path(), 160)?;
    let client = WhisperClient::new(url.clone(), Duration::from_secs(2))?;

    match client.transcribe(&wav).await {
        Err(EngineError::Unreachable { url: reported }) => assert_eq!(reported, url),
        other => panic!("expected unreachable, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn health_check_follows_engine_status() -> anyhow::Result<()> {
    let healthy = Router::new().route("/health", get(|| async { r#"{"status":"ok"}"# }));
    let client = WhisperClient::new(spawn_engine(healthy).await?, Duration::from_secs(5))?
        .with_health_timeout(Duration::from_millis(500));
    assert!(client.health_check().await);

    let loading = Router::new().route(
        "/health",
        get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "loading model") }),
    );
    let client = WhisperClient::new(spawn_engine(loading).await?, Duration::from_secs(5))?
        .with_health_timeout(Duration::from_millis(500));
    assert!(!client.health_check().await);

    let stalled = Router::new().route(
        "/health",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            "late"
        }),
    );
    let client = WhisperClient::new(spawn_engine(stalled).await?, Duration::from_secs(5))?
        .with_health_timeout(Duration::from_millis(200));
    assert!(!client.health_check().await);

    let client = WhisperClient::new(closed_url().await?, Duration::from_secs(5))?
        .with_health_timeout(Duration::from_millis(500));
    assert!(!client.health_check().await);
    Ok(())
}
