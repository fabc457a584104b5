use std::path::PathBuf;
use thiserror::Error;

/// Failure to bring up a synthesis engine for a voice.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("model file not found: {0}")]
    ModelNotFound(PathBuf),
    #[error("failed to read model config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid model config {path}: {source}")]
    ConfigInvalid {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("engine unavailable: {0}")]
    Unavailable(String),
}

/// Failure during a single synthesize call. Always recoverable at the connection level.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("engine failed: {0}")]
    Engine(String),
    #[error("engine io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("wav decode error: {0}")]
    Wav(#[from] hound::Error),
    #[error("audio format changed mid-response: {0}")]
    FormatMismatch(String),
    #[error("synthesis cancelled")]
    Cancelled,
    #[error("engine task panicked")]
    Panicked,
}

impl SynthesisError {
    /// Error-kind tag sent to clients alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            SynthesisError::Engine(_) => "TTSEngineError",
            SynthesisError::Io(_) => "TTSIoError",
            SynthesisError::Wav(_) => "TTSDecodeError",
            SynthesisError::FormatMismatch(_) => "TTSFormatMismatch",
            SynthesisError::Cancelled => "TTSCancelled",
            SynthesisError::Panicked => "TTSEnginePanic",
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to construct session for voice '{voice}': {source}")]
    Construction {
        voice: String,
        #[source]
        source: EngineError,
    },
    #[error("session construction task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        "SessionConstructionError"
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed event: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{what} too large: {len} bytes")]
    TooLarge { what: &'static str, len: usize },
    #[error("connection closed mid-event")]
    Truncated,
    #[error("event '{kind}' is missing field '{field}'")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },
    #[error("event '{0}' requires a payload")]
    MissingPayload(&'static str),
}

/// Errors that end a connection.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("protocol sequence error: {0}")]
    Sequence(&'static str),
}

#[derive(Debug, Error)]
#[error("unsupported uri '{0}' (expected stdio://, tcp://host:port or unix://path)")]
pub struct UriError(pub String);
