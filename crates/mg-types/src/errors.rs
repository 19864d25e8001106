use thiserror::Error;

/// Main error type for model grid operations.
///
/// Every variant is structural: the operation that returns it leaves the
/// grid untouched. Trainer failures are never surfaced through this type,
/// they are captured per model as [`crate::FitError`].
#[derive(Error, Debug)]
pub enum GridError {
    #[error("model grid contains no model specifications")]
    EmptyGrid,

    #[error("all models are already trained; set train_all to retrain them")]
    AlreadyTrained,

    #[error("model name already in use: {name}")]
    DuplicateName { name: String },

    #[error("model not found: {name}")]
    NotFound { name: String },

    #[error("invalid training control for model {model}: {source}")]
    InvalidControl {
        model: String,
        #[source]
        source: MergeError,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised while folding `custom_control` into `trControl`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MergeError {
    #[error("custom_control must be a map, found {found}")]
    ControlNotMap { found: &'static str },

    #[error("trControl must be a map to accept custom_control overrides, found {found}")]
    TrainControlNotMap { found: &'static str },
}

/// Result type alias for grid operations
pub type GridResult<T> = Result<T, GridError>;
