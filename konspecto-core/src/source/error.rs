use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("malformed video locator: {0}")]
    Malformed(String),
    #[error("access to the video was denied: {0}")]
    AccessDenied(String),
    #[error("no downloadable stream found for {0}")]
    NoStream(String),
    #[error("resolver tool failed: {0}")]
    Tool(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid resolver payload: {0}")]
    Payload(String),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

impl From<reqwest::Error> for ResolveError {
    fn from(error: reqwest::Error) -> Self {
        match error.status() {
            Some(status) if status.as_u16() == 401 || status.as_u16() == 403 => {
                ResolveError::AccessDenied(format!("HTTP {status}"))
            }
            _ => ResolveError::Network(error.to_string()),
        }
    }
}

impl From<serde_json::Error> for ResolveError {
    fn from(error: serde_json::Error) -> Self {
        ResolveError::Payload(error.to_string())
    }
}

pub type ResolveResult<T> = Result<T, ResolveError>;
