use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use whisper_wrap::config::Settings;
use whisper_wrap::{FfmpegTranscoder, Pipeline, TempStore, TranscriptionEngine, WhisperClient};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let settings = Settings::parse();
    whisper_wrap::init_logging(&settings.log_level);

    if let Err(err) = run(settings).await {
        error!(error = ?err, "whisper-wrap failed");
        std::process::exit(1);
    }
}

async fn run(settings: Settings) -> Result<()> {
    settings.validate().context("invalid configuration")?;

    let store = TempStore::new(&settings.temp_dir, settings.max_file_size_bytes());
    store.ensure_dir().with_context(|| {
        format!(
            "failed to create temp directory {}",
            settings.temp_dir.display()
        )
    })?;

    let transcoder = FfmpegTranscoder::new(store.clone(), settings.upload_timeout())
        .with_program(&settings.ffmpeg_path);
    let engine = WhisperClient::new(settings.engine_url(), settings.upload_timeout())
        .context("failed to build whisper server client")?;

    info!(
        host = %settings.api_host,
        port = settings.api_port,
        engine_url = %engine.base_url(),
        temp_dir = %settings.temp_dir.display(),
        max_file_size_mb = settings.max_file_size_mb,
        "Starting whisper-wrap API server"
    );

    if engine.health_check().await {
        info!(engine_url = %engine.base_url(), "connected to whisper server");
    } else {
        warn!(
            engine_url = %engine.base_url(),
            "whisper server is not reachable; requests will fail until it is up"
        );
    }

    let pipeline = Arc::new(Pipeline::new(store, transcoder, engine));
    let app = whisper_wrap::server::router(pipeline);

    let listener = TcpListener::bind((settings.api_host.as_str(), settings.api_port))
        .await
        .context("bind failed")?;
    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Shutting down whisper-wrap API server");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = ?err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = ?err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
