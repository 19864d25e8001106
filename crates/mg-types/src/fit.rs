//! Per-model training outcomes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A captured trainer failure for one model.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("training failed for model {model}: {message}")]
pub struct FitError {
    pub model: String,
    pub message: String,
}

impl FitError {
    pub fn new(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            message: message.into(),
        }
    }
}

/// Outcome of training a single model: the fitted artifact or the captured
/// failure. Stored uniformly, whether or not sibling models failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FitResult<A> {
    Success(A),
    Failure(FitError),
}

impl<A> FitResult<A> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// The fitted artifact, if training succeeded.
    pub fn artifact(&self) -> Option<&A> {
        match self {
            Self::Success(artifact) => Some(artifact),
            Self::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&FitError> {
        match self {
            Self::Success(_) => None,
            Self::Failure(err) => Some(err),
        }
    }

    /// Unwrap into a plain `Result` for downstream consumers.
    pub fn into_result(self) -> Result<A, FitError> {
        match self {
            Self::Success(artifact) => Ok(artifact),
            Self::Failure(err) => Err(err),
        }
    }

    pub fn into_artifact(self) -> Option<A> {
        self.into_result().ok()
    }
}

impl<A> From<Result<A, FitError>> for FitResult<A> {
    fn from(result: Result<A, FitError>) -> Self {
        match result {
            Ok(artifact) => Self::Success(artifact),
            Err(err) => Self::Failure(err),
        }
    }
}
