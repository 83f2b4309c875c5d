//! Error types for pool and orchestrator operations

use crate::classify::FailureKind;

/// Errors surfaced to callers of the pool and the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("at least one API key is required")]
    EmptyPool,

    /// No key is currently usable. Carries a JSON summary of pool counts.
    #[error("no API key available: {0}")]
    NoKeyAvailable(String),

    /// A fatal failure, or a retryable one whose bound was exceeded.
    #[error("failed to synthesize speech: {message} (status: {})", status_label(.status))]
    SynthesisFailed {
        cause: FailureKind,
        status: Option<u16>,
        code: Option<String>,
        message: String,
    },

    #[error("synthesis attempt aborted: {0}")]
    Internal(String),
}

impl Error {
    /// Build a `SynthesisFailed` from the last observed upstream failure.
    pub fn synthesis_failed(cause: FailureKind, failure: synthesis::SynthesisFailure) -> Self {
        Error::SynthesisFailed {
            cause,
            status: failure.status,
            code: failure.code,
            message: failure.message,
        }
    }

    /// Cause label for structured error responses.
    pub fn cause(&self) -> &'static str {
        match self {
            Error::EmptyPool => "empty_pool",
            Error::NoKeyAvailable(_) => "no_key_available",
            Error::SynthesisFailed { cause, .. } => cause.label(),
            Error::Internal(_) => "internal",
        }
    }
}

fn status_label(status: &Option<u16>) -> String {
    match status {
        Some(s) => s.to_string(),
        None => "unknown".to_string(),
    }
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use synthesis::SynthesisFailure;

    #[test]
    fn synthesis_failed_display_includes_message_and_status() {
        let err = Error::synthesis_failed(
            FailureKind::Fatal,
            SynthesisFailure::http(400, "text must not be empty"),
        );
        assert_eq!(
            err.to_string(),
            "failed to synthesize speech: text must not be empty (status: 400)"
        );
        assert_eq!(err.cause(), "fatal");
    }

    #[test]
    fn synthesis_failed_without_status_says_unknown() {
        let err = Error::synthesis_failed(
            FailureKind::Fatal,
            SynthesisFailure::transport("CONNECTION", "connection refused"),
        );
        assert_eq!(
            err.to_string(),
            "failed to synthesize speech: connection refused (status: unknown)"
        );
    }

    #[test]
    fn cause_labels() {
        assert_eq!(Error::EmptyPool.cause(), "empty_pool");
        assert_eq!(
            Error::NoKeyAvailable("{}".into()).cause(),
            "no_key_available"
        );
        assert_eq!(Error::Internal("panic".into()).cause(), "internal");
    }
}
