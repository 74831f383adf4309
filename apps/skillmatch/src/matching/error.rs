use std::path::PathBuf;

use thiserror::Error;

pub type MatchResult<T> = std::result::Result<T, MatchError>;

/// Failures the matching core can surface.
///
/// Empty input and zero-norm vectors are not errors: they degrade to
/// `None` / empty results at the call site.
#[derive(Debug, Error)]
pub enum MatchError {
    /// Invalid clustering configuration (k out of range, bad parameters).
    #[error("configuration error: {0}")]
    Config(String),

    /// Training vectors disagree in length.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The pretrained embedding model could not be loaded.
    #[error("embedding model unavailable at {}: {reason}", path.display())]
    ModelUnavailable { path: PathBuf, reason: String },
}

impl MatchError {
    pub fn config(msg: impl Into<String>) -> Self {
        MatchError::Config(msg.into())
    }

    pub fn model_unavailable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        MatchError::ModelUnavailable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Stable machine-readable code used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            MatchError::Config(_) | MatchError::DimensionMismatch { .. } => "CONFIG_ERROR",
            MatchError::ModelUnavailable { .. } => "MODEL_UNAVAILABLE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(MatchError::config("k must be > 0").code(), "CONFIG_ERROR");
        assert_eq!(
            MatchError::DimensionMismatch { expected: 3, actual: 2 }.code(),
            "CONFIG_ERROR"
        );
        assert_eq!(
            MatchError::model_unavailable("/nope.bin", "missing").code(),
            "MODEL_UNAVAILABLE"
        );
    }

    #[test]
    fn test_model_unavailable_message_names_path() {
        let err = MatchError::model_unavailable("/models/cc.en.300.bin", "No such file");
        let msg = err.to_string();
        assert!(msg.contains("/models/cc.en.300.bin"));
        assert!(msg.contains("No such file"));
    }
}
