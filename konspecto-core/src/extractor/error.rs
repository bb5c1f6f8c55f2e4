use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("frame rate of {path} could not be determined")]
    FrameRateUnavailable { path: PathBuf },
    #[error("no frames could be extracted from {path}")]
    NoFrames { path: PathBuf },
    #[error("video stream metadata not available for {path}")]
    MissingVideoStream { path: PathBuf },
    #[error("decoder failed: {0}")]
    Decoder(String),
    #[error("invalid probe payload: {0}")]
    Probe(String),
    #[error("failed to write frame {path}: {source}")]
    Encode {
        source: image::ImageError,
        path: PathBuf,
    },
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

impl From<serde_json::Error> for ExtractError {
    fn from(error: serde_json::Error) -> Self {
        ExtractError::Probe(error.to_string())
    }
}

impl From<tokio::task::JoinError> for ExtractError {
    fn from(error: tokio::task::JoinError) -> Self {
        ExtractError::Decoder(format!("blocking task failed: {error}"))
    }
}

pub type ExtractResult<T> = Result<T, ExtractError>;
