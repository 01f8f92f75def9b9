use axum::http::StatusCode;
use thiserror::Error;

/// whisper-wrap's crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Every way a request can fail, each mapped to one client-visible status.
#[derive(Debug, Error)]
pub enum Error {
    #[error("No audio data provided")]
    NoData,

    #[error("Missing multipart field 'file'")]
    MissingFile,

    #[error("Invalid upload: {0}")]
    InvalidUpload(String),

    #[error("File too large. Maximum size: {max_mb}MB")]
    TooLarge { max_mb: u64 },

    #[error("{}", unsupported_message(.detected, .declared.as_deref()))]
    UnsupportedFormat {
        detected: String,
        declared: Option<String>,
    },

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Failures of the external transcoder.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("Audio conversion timed out after {seconds} seconds")]
    Timeout { seconds: f64 },

    #[error("ffmpeg conversion failed: {stderr}")]
    Failed { stderr: String },

    #[error("{program} not found - please install ffmpeg")]
    ToolUnavailable { program: String },
}

/// Failures talking to the transcription engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("WAV file not found: {path}")]
    InputMissing { path: String },

    #[error("Whisper server timeout after {seconds} seconds")]
    Timeout { seconds: f64 },

    #[error("Cannot connect to whisper server at {url}")]
    Unreachable { url: String },

    #[error("Whisper server error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Whisper server returned a non-JSON body: {0}")]
    InvalidBody(String),

    #[error("Whisper server request failed: {0}")]
    Request(String),
}

impl Error {
    /// HTTP status reported to the caller for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::NoData | Error::InvalidUpload(_) => StatusCode::BAD_REQUEST,
            Error::MissingFile => StatusCode::UNPROCESSABLE_ENTITY,
            Error::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::UnsupportedFormat { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Error::Conversion(_) | Error::Engine(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Short, stable label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NoData => "no_data",
            Error::MissingFile => "missing_file",
            Error::InvalidUpload(_) => "invalid_upload",
            Error::TooLarge { .. } => "too_large",
            Error::UnsupportedFormat { .. } => "unsupported_format",
            Error::Conversion(ConversionError::Timeout { .. }) => "conversion_timeout",
            Error::Conversion(ConversionError::Failed { .. }) => "conversion_failed",
            Error::Conversion(ConversionError::ToolUnavailable { .. }) => {
                "conversion_tool_unavailable"
            }
            Error::Engine(EngineError::InputMissing { .. }) => "input_missing",
            Error::Engine(EngineError::Timeout { .. }) => "engine_timeout",
            Error::Engine(EngineError::Unreachable { .. }) => "engine_unreachable",
            Error::Engine(EngineError::Status { .. }) => "engine_error",
            Error::Engine(EngineError::InvalidBody(_)) => "engine_invalid_body",
            Error::Engine(EngineError::Request(_)) => "engine_request_failed",
            Error::Internal(_) => "internal",
        }
    }
}

fn unsupported_message(detected: &str, declared: Option<&str>) -> String {
    match declared {
        Some(header) => format!(
            "Unsupported file format. Header: {header}, Detected: {detected}. Please provide an audio or video file."
        ),
        None => format!(
            "Unsupported file format. Detected: {detected}. Please provide an audio or video file."
        ),
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}
