//! HTTP client for the transcription engine (whisper.cpp's `whisper-server`).
//!
//! The engine is an opaque collaborator: we upload a WAV file to `POST /inference` and relay
//! whatever JSON comes back without interpreting it.

use std::io;
use std::path::Path;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use serde_json::value::RawValue;
use tracing::{debug, warn};

use crate::error::EngineError;

/// Timeout for the `GET /health` check.
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// The engine's JSON body, validated as JSON but otherwise untouched.
#[derive(Debug)]
pub struct Transcription(Box<RawValue>);

impl Transcription {
    /// Wrap a JSON document. Fails if `json` is not valid JSON.
    pub fn from_json(json: String) -> Result<Self, serde_json::Error> {
        RawValue::from_string(json).map(Self)
    }

    /// The JSON text exactly as the engine sent it.
    pub fn as_json(&self) -> &str {
        self.0.get()
    }

    /// Parse into a generic JSON value (for callers that want to inspect fields).
    pub fn to_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_str(self.0.get())
    }
}

impl From<Transcription> for String {
    fn from(t: Transcription) -> Self {
        Box::<str>::from(t.0).into_string()
    }
}

/// A speech-to-text service the pipeline forwards normalized WAV files to.
pub trait TranscriptionEngine: Send + Sync {
    /// Transcribe the WAV file at `wav`.
    fn transcribe(
        &self,
        wav: &Path,
    ) -> impl Future<Output = Result<Transcription, EngineError>> + Send;

    /// `true` iff the engine reports ready. Never fails.
    fn health_check(&self) -> impl Future<Output = bool> + Send;

    /// Base URL, reported by `/health`.
    fn base_url(&self) -> &str;
}

/// [`TranscriptionEngine`] speaking whisper.cpp's server protocol.
#[derive(Debug, Clone)]
pub struct WhisperClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
    health_timeout: Duration,
}

impl WhisperClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("whisper-wrap/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            timeout,
            health_timeout: HEALTH_TIMEOUT,
        })
    }

    /// Override the health check timeout (defaults to [`HEALTH_TIMEOUT`]).
    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn send_error(&self, err: reqwest::Error) -> EngineError {
        if err.is_timeout() {
            EngineError::Timeout {
                seconds: self.timeout.as_secs_f64(),
            }
        } else if err.is_connect() {
            EngineError::Unreachable {
                url: self.base_url.clone(),
            }
        } else {
            EngineError::Request(err.to_string())
        }
    }
}

impl TranscriptionEngine for WhisperClient {
    async fn transcribe(&self, wav: &Path) -> Result<Transcription, EngineError> {
        let bytes = match tokio::fs::read(wav).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(EngineError::InputMissing {
                    path: wav.display().to_string(),
                });
            }
            Err(err) => return Err(EngineError::Request(err.to_string())),
        };

        let file = Part::bytes(bytes)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|err| EngineError::Request(err.to_string()))?;

        // Deterministic decoding with whisper.cpp's incremental temperature fallback.
        let form = Form::new()
            .part("file", file)
            .text("temperature", "0.0")
            .text("temperature_inc", "0.2")
            .text("response_format", "json");

        let url = format!("{}/inference", self.base_url);
        debug!(%url, "sending audio to transcription engine");

        let response = self
            .http
            .post(&url)
            .timeout(self.timeout)
            .multipart(form)
            .send()
            .await
            .map_err(|err| self.send_error(err))?;

        let status = response.status();
        let body = response.text().await.map_err(|err| self.send_error(err))?;

        if !status.is_success() {
            warn!(status = status.as_u16(), %body, "transcription engine returned an error");
            return Err(EngineError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Transcription::from_json(body).map_err(|err| EngineError::InvalidBody(err.to_string()))
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self
            .http
            .get(&url)
            .timeout(self.health_timeout)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                debug!(%url, error = %err, "engine health check failed");
                false
            }
        }
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}
