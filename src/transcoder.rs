//! Normalization of arbitrary media into whisper.cpp's input format.
//!
//! The transcoder is an external process (ffmpeg) invoked with fixed arguments. We never decode
//! audio ourselves; we only bound the process with a timeout and turn its outcome into a typed
//! result.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::ConversionError;
use crate::files::TempStore;

/// Sample rate expected by whisper.cpp.
pub const WHISPER_SAMPLE_RATE: u32 = 16_000;

/// Converts a staged input file into 16 kHz mono PCM WAV.
///
/// Implementations must be shareable across concurrent requests.
pub trait Transcoder: Send + Sync {
    /// Convert `input` into a WAV file.
    ///
    /// When `output` is `None` the implementation allocates a fresh path itself. On success the
    /// returned file exists, is non-empty, and belongs to the caller.
    fn convert_to_wav(
        &self,
        input: &Path,
        output: Option<&Path>,
    ) -> impl Future<Output = Result<PathBuf, ConversionError>> + Send;
}

/// [`Transcoder`] backed by the `ffmpeg` executable.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    program: PathBuf,
    timeout: Duration,
    scratch: TempStore,
}

impl FfmpegTranscoder {
    /// Use `ffmpeg` from `PATH`, allocating unnamed outputs in `scratch`.
    pub fn new(scratch: TempStore, timeout: Duration) -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            timeout,
            scratch,
        }
    }

    /// Use a specific executable instead of `ffmpeg` from `PATH`.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn run(&self, input: &Path, output: &Path) -> Result<(), ConversionError> {
        let program = self.program.display().to_string();
        debug!(%program, input = %input.display(), output = %output.display(), "running transcoder");

        let child = Command::new(&self.program)
            .args(ffmpeg_args(input, output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| match err.kind() {
                io::ErrorKind::NotFound => ConversionError::ToolUnavailable {
                    program: program.clone(),
                },
                _ => ConversionError::Failed {
                    stderr: format!("failed to start {program}: {err}"),
                },
            })?;

        let started = Instant::now();

        // Dropping the wait future on timeout drops the child, which kills it.
        let finished = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(res) => res.map_err(|err| ConversionError::Failed {
                stderr: format!("failed waiting for {program}: {err}"),
            })?,
            Err(_) => {
                warn!(%program, timeout_secs = self.timeout.as_secs_f64(), "transcoder timed out");
                return Err(ConversionError::Timeout {
                    seconds: self.timeout.as_secs_f64(),
                });
            }
        };

        if !finished.status.success() {
            let stderr = String::from_utf8_lossy(&finished.stderr).trim().to_owned();
            warn!(%program, status = %finished.status, %stderr, "transcoder failed");
            return Err(ConversionError::Failed { stderr });
        }

        match tokio::fs::metadata(output).await {
            Ok(meta) if meta.len() > 0 => {
                debug!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    bytes = meta.len(),
                    "transcoder finished"
                );
                Ok(())
            }
            _ => Err(ConversionError::Failed {
                stderr: "output file not created".to_owned(),
            }),
        }
    }
}

impl Transcoder for FfmpegTranscoder {
    async fn convert_to_wav(
        &self,
        input: &Path,
        output: Option<&Path>,
    ) -> Result<PathBuf, ConversionError> {
        if let Some(output) = output {
            self.run(input, output).await?;
            return Ok(output.to_path_buf());
        }

        // An output we allocate ourselves is only handed over once the conversion succeeded.
        let staged = self
            .scratch
            .stage(".wav")
            .await
            .map_err(|err| ConversionError::Failed {
                stderr: format!("failed to allocate output path: {err}"),
            })?;
        self.run(input, staged.path()).await?;
        Ok(staged.keep())
    }
}

/// Fixed argument list: resample to 16 kHz, downmix to mono, force WAV, overwrite.
pub fn ffmpeg_args(input: &Path, output: &Path) -> Vec<OsString> {
    let sample_rate = WHISPER_SAMPLE_RATE.to_string();
    vec![
        "-i".into(),
        input.as_os_str().to_owned(),
        "-ar".into(),
        sample_rate.into(),
        "-ac".into(),
        "1".into(),
        "-f".into(),
        "wav".into(),
        "-y".into(),
        output.as_os_str().to_owned(),
    ]
}
