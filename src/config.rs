//! Runtime settings, read from flags or the environment.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;

use crate::files::BYTES_PER_MB;

#[derive(Parser, Debug, Clone)]
#[command(name = "whisper-wrap")]
#[command(about = "HTTP wrapper for whisper.cpp with universal audio format support")]
#[command(version)]
pub struct Settings {
    /// Host interface to bind to.
    #[arg(long, env = "API_HOST", default_value = "0.0.0.0")]
    pub api_host: String,

    /// TCP port to listen on.
    #[arg(long, env = "API_PORT", default_value_t = 8000, value_parser = clap::value_parser!(u16).range(1..))]
    pub api_port: u16,

    /// Full base URL of whisper-server. Overrides host and port when set.
    #[arg(long, env = "WHISPER_SERVER_URL")]
    pub whisper_server_url: Option<String>,

    #[arg(long, env = "WHISPER_SERVER_HOST", default_value = "localhost")]
    pub whisper_server_host: String,

    #[arg(long, env = "WHISPER_SERVER_PORT", default_value_t = 9000, value_parser = clap::value_parser!(u16).range(1..))]
    pub whisper_server_port: u16,

    /// Largest accepted upload, in MiB.
    #[arg(long, env = "MAX_FILE_SIZE_MB", default_value_t = 100)]
    pub max_file_size_mb: u64,

    /// Scratch directory for staged uploads and converted WAV files.
    #[arg(long, env = "TEMP_DIR", default_value = "/tmp/whisper-wrap")]
    pub temp_dir: PathBuf,

    /// Timeout applied to both ffmpeg and the whisper-server request.
    #[arg(long, env = "UPLOAD_TIMEOUT_SECONDS", default_value_t = 30)]
    pub upload_timeout_seconds: u64,

    /// Default log level; `WHISPER_WRAP_LOG` takes precedence.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// ffmpeg executable to invoke.
    #[arg(long = "ffmpeg", env = "FFMPEG_PATH", default_value = "ffmpeg")]
    pub ffmpeg_path: PathBuf,
}

impl Settings {
    /// Base URL of the transcription engine, without a trailing slash.
    pub fn engine_url(&self) -> String {
        match self.whisper_server_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => url.trim_end_matches('/').to_owned(),
            _ => format!(
                "http://{}:{}",
                self.whisper_server_host, self.whisper_server_port
            ),
        }
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(BYTES_PER_MB)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_seconds)
    }

    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.upload_timeout_seconds == 0 {
            bail!("UPLOAD_TIMEOUT_SECONDS must be greater than zero");
        }
        if self.max_file_size_mb == 0 {
            bail!("MAX_FILE_SIZE_MB must be greater than zero");
        }

        let engine_url = self.engine_url();
        let url = reqwest::Url::parse(&engine_url)
            .with_context(|| format!("invalid whisper server URL: {engine_url}"))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("whisper server URL must use http or https: {engine_url}");
        }

        let engine_host = url.host_str().unwrap_or_default();
        let engine_port = url.port_or_known_default().unwrap_or_default();
        if engine_port == self.api_port && same_host(&self.api_host, engine_host) {
            bail!(
                "API_PORT and WHISPER_SERVER_PORT cannot be the same when running on the same host."
            );
        }

        Ok(())
    }
}

fn same_host(api_host: &str, engine_host: &str) -> bool {
    let api = normalize_host(api_host);
    let engine = normalize_host(engine_host);

    if api == engine {
        return true;
    }

    // A wildcard listener also answers on loopback.
    let wildcard = matches!(api.as_str(), "0.0.0.0" | "::");
    (wildcard || is_loopback(&api)) && is_loopback(&engine)
}

fn normalize_host(host: &str) -> String {
    host.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_ascii_lowercase()
}

fn is_loopback(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1")
}
