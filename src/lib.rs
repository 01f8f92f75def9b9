//! `whisper-wrap`: an HTTP relay that lets whisper.cpp transcribe any audio or video upload.
//!
//! This crate provides:
//! - Upload staging with guaranteed scratch-file cleanup
//! - Content sniffing against a fixed audio/video allowlist
//! - ffmpeg normalization to 16 kHz mono WAV
//! - A `whisper-server` client that relays its JSON verbatim
//! - An axum router exposing `/transcribe` and `/transcribe-raw`
//!
//! Requests are independent: each one owns its scratch files, and the pipeline holds no
//! mutable shared state.

// Request pipeline (most consumers should start here).
pub mod pipeline;
pub mod server;

// External collaborators.
pub mod engine;
pub mod transcoder;

// Upload handling.
pub mod files;
pub mod media_type;

// Runtime configuration and error taxonomy.
pub mod config;
pub mod error;

// Logging configuration and control.
#[cfg(feature = "logging")]
pub mod logging;

pub use engine::{Transcription, TranscriptionEngine, WhisperClient};
pub use error::{ConversionError, EngineError, Error, Result};
pub use files::{StagedFile, TempStore};
pub use pipeline::{Origin, Pipeline};
pub use transcoder::{FfmpegTranscoder, Transcoder};

#[cfg(feature = "logging")]
pub use logging::init as init_logging;
