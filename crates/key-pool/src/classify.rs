//! Failure classification for upstream synthesis errors
//!
//! Separates failures that belong to the key (rate limits, quota exhaustion)
//! from failures that belong to the call (gateway timeouts). Key-scoped
//! failures rotate to another key; call-scoped failures back off and retry on
//! the same key; everything else is fatal.

use serde::Serialize;
use synthesis::SynthesisFailure;

/// HTTP status for "too many requests".
const STATUS_RATE_LIMITED: u16 = 429;

/// Cloudflare "a timeout occurred" status returned when the upstream origin
/// does not answer in time.
const STATUS_GATEWAY_TIMEOUT: u16 = 524;

/// Upstream error code for an explicit rate limit.
const RATE_LIMIT_CODE: &str = "RATE_LIMIT_EXCEEDED";

/// Message fragments that indicate a key-scoped limit. Matched case-sensitively.
const RATE_LIMIT_PATTERNS: &[&str] = &["rate limit", "quota exceeded"];

/// Outcome kind for a failed synthesis call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Key hit a rate limit or quota; rotate to another key
    RateLimited,
    /// Gateway timeout; retry the same key after a delay
    TransientRetryable,
    /// Bad request, auth failure, or anything unrecognized
    Fatal,
}

impl FailureKind {
    /// Label for logs, metrics, and error responses.
    pub fn label(&self) -> &'static str {
        match self {
            FailureKind::RateLimited => "rate_limited",
            FailureKind::TransientRetryable => "transient_retryable",
            FailureKind::Fatal => "fatal",
        }
    }
}

/// Classify a failure by status code, error code, and message text.
///
/// Rate-limit signals win over the status: a 524 whose message says "rate
/// limit" is still rotated rather than retried.
pub fn classify(failure: &SynthesisFailure) -> FailureKind {
    if is_rate_limited(failure) {
        return FailureKind::RateLimited;
    }
    match failure.status {
        Some(STATUS_GATEWAY_TIMEOUT) => FailureKind::TransientRetryable,
        _ => FailureKind::Fatal,
    }
}

fn is_rate_limited(failure: &SynthesisFailure) -> bool {
    failure.status == Some(STATUS_RATE_LIMITED)
        || failure.code.as_deref() == Some(RATE_LIMIT_CODE)
        || RATE_LIMIT_PATTERNS
            .iter()
            .any(|pattern| failure.message.contains(pattern))
}
