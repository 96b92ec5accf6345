//! Error types.
//!
//! Two layers:
//!
//! - [`ModelError`]: everything the modelling engine can report. Library code
//!   returns these and propagates them with `?`.
//! - [`AppError`]: what the `cmom` binary prints, carrying a process exit code.

use thiserror::Error;

/// Result alias for the modelling engine.
pub type Result<T> = std::result::Result<T, ModelError>;

/// Failures of the recoder, fitter, scorer, selector and predictor.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    /// Invalid input for a transform or a non-finite predictor value.
    #[error("domain error: {0}")]
    Domain(String),

    /// The design matrix is not of full column rank.
    #[error("design matrix is rank deficient: {0}")]
    RankDeficiency(String),

    /// A prediction row carries a categorical level that the fit never saw.
    #[error("unseen {factor} level `{level}`: not present in the rows the model was fitted on")]
    UnseenLevel { factor: &'static str, level: String },

    /// A predictor value sits exactly on a recoding threshold.
    #[error("{predictor}={value} lies exactly on a recoding threshold and has no category")]
    UnclassifiedBoundary { predictor: &'static str, value: f64 },

    /// Sequential ANOVA was handed a pair of models that are not nested.
    #[error("models #{earlier} and #{later} are not nested: {reason}")]
    NonNestedModels {
        earlier: usize,
        later: usize,
        reason: String,
    },

    /// Malformed design specification or configuration.
    #[error("invalid specification: {0}")]
    InvalidSpecification(String),

    /// A cross-validation fold failed; the whole run is aborted.
    #[error("cross-validation fold {fold} failed: {source}")]
    CrossValidation {
        fold: usize,
        #[source]
        source: Box<ModelError>,
    },
}

/// Error surfaced by the binary, with the exit code it should terminate with.
#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

impl From<ModelError> for AppError {
    fn from(err: ModelError) -> Self {
        // 2: bad input or configuration; 4: numerical failure.
        let exit_code = match &err {
            ModelError::Domain(_)
            | ModelError::UnseenLevel { .. }
            | ModelError::UnclassifiedBoundary { .. }
            | ModelError::InvalidSpecification(_) => 2,
            ModelError::RankDeficiency(_)
            | ModelError::NonNestedModels { .. }
            | ModelError::CrossValidation { .. } => 4,
        };
        AppError::new(exit_code, err.to_string())
    }
}
