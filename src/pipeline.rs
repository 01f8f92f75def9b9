//! The per-request transcription pipeline.
//!
//! One call to [`Pipeline::run`] is one invocation:
//!
//! ingest → stage input → size check → type check → transcode → transcribe → respond
//!
//! Each stage may end the invocation with a typed [`Error`]. Staged files are held by
//! [`StagedFile`] guards, so whichever stage exits, both the input and the converted file are
//! removed exactly once when `run` returns (or when its future is dropped).

use std::ffi::OsStr;
use std::path::Path;
use std::pin::{Pin, pin};

use axum::body::Bytes;
use futures_util::StreamExt;
use futures_util::stream::Stream;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::Result;
use crate::engine::{Transcription, TranscriptionEngine, WhisperClient};
use crate::error::Error;
use crate::files::{BYTES_PER_MB, StagedFile, TempStore};
use crate::media_type;
use crate::transcoder::{FfmpegTranscoder, Transcoder};

/// Declared content type assumed for raw uploads without a `Content-Type` header.
pub const UNKNOWN_CONTENT_TYPE: &str = "audio/unknown";

/// Filename assumed for multipart uploads without a usable filename.
pub const UNKNOWN_FILENAME: &str = "audio.unknown";

/// Where an upload came from, and what the client claimed about it.
///
/// Claims only pick the staging extension; admission is decided by content sniffing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Multipart { filename: Option<String> },
    Raw { content_type: Option<String> },
}

impl Origin {
    /// Extension (with leading dot, possibly empty) for the staged input file.
    pub fn staging_suffix(&self) -> String {
        match self {
            Origin::Multipart { filename } => filename_suffix(filename.as_deref()),
            Origin::Raw { .. } => {
                media_type::extension_for_content_type(self.declared_type().unwrap_or_default())
                    .to_owned()
            }
        }
    }

    /// The client-declared content type, reported back on rejection.
    pub fn declared_type(&self) -> Option<&str> {
        match self {
            Origin::Multipart { .. } => None,
            Origin::Raw { content_type } => {
                Some(content_type.as_deref().unwrap_or(UNKNOWN_CONTENT_TYPE))
            }
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Origin::Multipart { .. } => "multipart",
            Origin::Raw { .. } => "raw",
        }
    }
}

fn filename_suffix(filename: Option<&str>) -> String {
    let name = filename
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(UNKNOWN_FILENAME);

    // Only a short alphanumeric extension makes it into the staged file name.
    Path::new(name)
        .extension()
        .and_then(OsStr::to_str)
        .filter(|ext| ext.len() <= 10 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default()
}

/// Orchestrates staging, classification, transcoding, and the engine call.
///
/// Collaborators are injected so tests can substitute fakes; the defaults are the production
/// ffmpeg transcoder and whisper.cpp client.
pub struct Pipeline<T: Transcoder = FfmpegTranscoder, E: TranscriptionEngine = WhisperClient> {
    store: TempStore,
    transcoder: T,
    engine: E,
}

impl<T: Transcoder, E: TranscriptionEngine> Pipeline<T, E> {
    pub fn new(store: TempStore, transcoder: T, engine: E) -> Self {
        Self {
            store,
            transcoder,
            engine,
        }
    }

    pub fn store(&self) -> &TempStore {
        &self.store
    }

    pub fn transcoder(&self) -> &T {
        &self.transcoder
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Run one invocation over an uploaded byte stream.
    pub async fn run<S>(&self, origin: Origin, body: S) -> Result<Transcription>
    where
        S: Stream<Item = Result<Bytes>> + Send,
    {
        let mut body = pin!(body);

        // Ingest. Nothing has touched the disk yet, so there is nothing to clean up.
        let Some(first) = first_chunk(&mut body).await? else {
            debug!(origin = origin.label(), "upload carried no data");
            return Err(Error::NoData);
        };

        // Stage input.
        let suffix = origin.staging_suffix();
        let input = self.store.stage(&suffix).await?;
        let written = self.write_staged(&input, first, &mut body).await?;

        // Size check.
        if !self.store.validate_size(input.path()).await? {
            warn!(
                origin = origin.label(),
                bytes = written,
                max_bytes = self.store.max_file_size_bytes(),
                "upload exceeds size limit"
            );
            return Err(Error::TooLarge {
                max_mb: self.store.max_file_size_bytes() / BYTES_PER_MB,
            });
        }

        // Type check.
        let classification = media_type::classify(input.path()).await?;
        info!(
            origin = origin.label(),
            declared = origin.declared_type(),
            extension = %suffix,
            detected = classification.mime,
            bytes = written,
            "classified upload"
        );
        if !classification.supported {
            warn!(
                origin = origin.label(),
                detected = classification.mime,
                "unsupported format"
            );
            return Err(Error::UnsupportedFormat {
                detected: classification.mime.to_owned(),
                declared: origin.declared_type().map(str::to_owned),
            });
        }

        // Transcode. The transcoder may put its output somewhere other than the path we
        // offered; whatever it returns is ours to transcribe and remove.
        let converted = self.store.stage(".wav").await?;
        let produced = self
            .transcoder
            .convert_to_wav(input.path(), Some(converted.path()))
            .await?;
        let relocated = (produced != converted.path()).then(|| {
            debug!(path = %produced.display(), "transcoder wrote to its own path");
            self.store.adopt(produced)
        });
        let wav = relocated.as_ref().unwrap_or(&converted);

        // Transcribe.
        let transcription = self.engine.transcribe(wav.path()).await?;
        debug!(origin = origin.label(), "transcription complete");

        // Respond. Every staged guard drops here (and on every early return above).
        Ok(transcription)
    }

    /// Write the upload into `staged`, returning how many bytes were written.
    ///
    /// Once more than the size limit has been written we stop pulling from the stream: the size
    /// check rejects the file anyway.
    async fn write_staged<S>(
        &self,
        staged: &StagedFile,
        first: Bytes,
        body: &mut Pin<&mut S>,
    ) -> Result<u64>
    where
        S: Stream<Item = Result<Bytes>>,
    {
        let limit = self.store.max_file_size_bytes();
        let mut file = tokio::fs::File::create(staged.path()).await?;
        let mut written = 0u64;

        let mut next = Some(first);
        while let Some(chunk) = next.take() {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            if written > limit {
                break;
            }
            next = body.next().await.transpose()?;
        }

        file.flush().await?;
        Ok(written)
    }
}

/// Pull chunks until the first non-empty one. `None` means the body was empty.
async fn first_chunk<S>(body: &mut Pin<&mut S>) -> Result<Option<Bytes>>
where
    S: Stream<Item = Result<Bytes>>,
{
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        if !chunk.is_empty() {
            return Ok(Some(chunk));
        }
    }
    Ok(None)
}
