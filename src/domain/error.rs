use thiserror::Error;

use super::options::{MAX_SCALE, MIN_SCALE};

#[derive(Debug, Clone, Error)]
pub enum DomainError {
    #[error("invalid CSS length `{input}`: {reason}")]
    InvalidLength { input: String, reason: &'static str },
    #[error("margins leave no printable area on the page")]
    NoPrintableArea,
    #[error("scale must be between {} and {}, got {scale}", MIN_SCALE, MAX_SCALE)]
    ScaleOutOfRange { scale: f64 },
    #[error("validation failed: {message}")]
    Validation { message: String },
}

impl DomainError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_length(input: &str, reason: &'static str) -> Self {
        Self::InvalidLength {
            input: input.to_string(),
            reason,
        }
    }
}
