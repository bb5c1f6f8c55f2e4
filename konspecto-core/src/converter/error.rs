use thiserror::Error;

use crate::source::ResolveError;
use crate::store::StoreError;

use super::types::ConversionStage;

/// Failure of a single conversion run.
///
/// Bad input is never worth retrying. Everything that went wrong after the
/// locator was accepted is reported with the stage it happened in, and a
/// caller may retry the whole run.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("invalid source reference: {reason}")]
    InvalidSourceReference { reason: String },
    #[error("conversion failed while {stage}: {message}")]
    ProcessingFailure {
        stage: ConversionStage,
        message: String,
    },
}

impl ConversionError {
    pub(crate) fn processing(stage: ConversionStage, message: impl ToString) -> Self {
        ConversionError::ProcessingFailure {
            stage,
            message: message.to_string(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ConversionError::ProcessingFailure { .. })
    }

    /// Stage the run was in when it failed.
    pub fn stage(&self) -> ConversionStage {
        match self {
            ConversionError::InvalidSourceReference { .. } => ConversionStage::Init,
            ConversionError::ProcessingFailure { stage, .. } => *stage,
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no artifact stored under {key}")]
    NotFound { key: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("failed to prepare video resolver: {0}")]
    Resolver(#[from] ResolveError),
    #[error("failed to prepare artifact store: {0}")]
    Store(#[from] StoreError),
}

pub type ConversionResult<T> = Result<T, ConversionError>;
