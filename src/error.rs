use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AvgQError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to start engine '{executable}': {source}")]
    SpawnFailed {
        executable: String,
        #[source]
        source: io::Error,
    },

    #[error("Script: no epoch source given")]
    NoEpochSource,

    #[error("Epoch source: cannot specify both trigger points and a trigger file")]
    ConflictingTriggerSource,

    #[error("Not supported: {0}")]
    Unsupported(String),

    #[error("Invalid time specification: {0}")]
    InvalidTimeSpec(String),

    #[error("Cannot guess format of {0}")]
    UnknownFormat(String),

    #[error("Malformed engine response: {0}")]
    MalformedResponse(String),

    #[error("No response for query variable '{0}'")]
    MissingQueryResult(String),

    #[error("Engine exited while a response was pending ({0})")]
    EngineExited(String),

    #[error("Frame size mismatch: expected {expected} values, got {actual}")]
    FrameSize { expected: usize, actual: usize },

    #[error("Binary frame truncated: expected {expected} bytes, got {actual}")]
    UnexpectedEof { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, AvgQError>;
