use thiserror::Error;

/// Errors raised by the smoke pipeline core.
///
/// The taxonomy matters for containment: configuration errors are always
/// fatal to the operation that raised them, validation and merge errors are
/// fire-scoped and may be contained by `skip_failed_fires` / stage-level
/// `skip_failures`, and `PipelineFailure` is the distinguished signal that
/// one or more modules failed but the run still produced output.
#[derive(Debug, Error)]
pub enum SmokeError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("merge error: {0}")]
    Merge(String),

    #[error("filter error: {0}")]
    Filter(String),

    #[error("invalid module '{0}'")]
    InvalidModule(String),

    /// One or more modules failed during `FiresManager::run`. Details are
    /// recorded in the run metadata (`error` key) and on individual fire
    /// records; the fire collection is still dumpable.
    #[error("one or more pipeline modules failed; see run metadata")]
    PipelineFailure,
}

pub type Result<T> = std::result::Result<T, SmokeError>;

impl SmokeError {
    /// Short type tag recorded in fire/run error annotations.
    pub fn kind(&self) -> &'static str {
        match self {
            SmokeError::Config(_) => "ConfigError",
            SmokeError::Validation(_) => "ValidationError",
            SmokeError::Merge(_) => "MergeError",
            SmokeError::Filter(_) => "FilterError",
            SmokeError::InvalidModule(_) => "InvalidModuleError",
            SmokeError::PipelineFailure => "PipelineFailure",
        }
    }
}
