use thiserror::Error;

use crate::collaborators::Channel;

pub type OutreachResult<T> = Result<T, OutreachError>;

#[derive(Error, Debug)]
pub enum OutreachError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("{0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl OutreachError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        OutreachError::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        OutreachError::Conflict(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        OutreachError::InvalidState(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        OutreachError::Validation(msg.into())
    }

    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            OutreachError::NotFound(_) => "not_found",
            OutreachError::Conflict(_) => "conflict",
            OutreachError::InvalidState(_) => "invalid_state",
            OutreachError::Validation(_) => "validation_error",
            OutreachError::Config(_) => "config_error",
            OutreachError::Serialization(_) => "serialization_error",
            OutreachError::Internal(_) => "internal_error",
        }
    }
}

/// Failure reported by a notification channel. Never aborts a scan; it is
/// recorded on the step execution instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Contact has no {0} address")]
    MissingAddress(Channel),

    #[error("Rejected by provider: {0}")]
    Rejected(String),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_errors_display_bare_message() {
        let err = OutreachError::conflict("Already enrolled");
        assert_eq!(err.to_string(), "Already enrolled");
        assert_eq!(err.code(), "conflict");
    }

    #[test]
    fn test_dispatch_error_display() {
        let err = DispatchError::MissingAddress(Channel::Sms);
        assert_eq!(err.to_string(), "Contact has no sms address");
    }
}
