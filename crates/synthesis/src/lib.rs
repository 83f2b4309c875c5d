//! Downstream speech synthesis interface
//!
//! Defines the `Synthesizer` trait that decouples the key pool and retry
//! policy from the remote text-to-speech API. A synthesizer consumes exactly
//! one API key per call and returns either audio bytes or a `SynthesisFailure`
//! describing what the upstream said (status code, error code, message).
//! `HttpSynthesizer` is the production implementation; tests substitute
//! scripted fakes.

pub mod http;

pub use http::HttpSynthesizer;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// A text-to-speech request as forwarded to the upstream API.
///
/// Optional fields are omitted from the upstream payload when unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SynthesisRequest {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_iso_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaking_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Base64-encoded voice sample to clone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker_audio: Option<String>,
    /// Target duration in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
}

impl SynthesisRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// Failure descriptor returned by a synthesizer call.
///
/// `status` is absent when the call never produced an HTTP response
/// (connection refused, client-side timeout).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisFailure {
    pub status: Option<u16>,
    pub code: Option<String>,
    pub message: String,
}

impl SynthesisFailure {
    /// Failure carrying an upstream HTTP status.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            code: None,
            message: message.into(),
        }
    }

    /// Failure with no HTTP status, tagged with a local error code.
    pub fn transport(code: &str, message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: Some(code.to_string()),
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Status code as text, or "unknown" when the call had no HTTP status.
    pub fn status_label(&self) -> String {
        match self.status {
            Some(status) => status.to_string(),
            None => "unknown".to_string(),
        }
    }
}

impl fmt::Display for SynthesisFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (status: {})", self.message, self.status_label())
    }
}

impl std::error::Error for SynthesisFailure {}

/// Result of a single synthesizer call.
pub type SynthesisResult = std::result::Result<Bytes, SynthesisFailure>;

/// Abstraction over the remote synthesis operation.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn Synthesizer>`).
pub trait Synthesizer: Send + Sync {
    /// Identifier for logging (e.g. "zyphra-http")
    fn id(&self) -> &str;

    /// Perform one synthesis call authorized by `api_key`.
    fn synthesize<'a>(
        &'a self,
        api_key: &'a str,
        request: &'a SynthesisRequest,
    ) -> Pin<Box<dyn Future<Output = SynthesisResult> + Send + 'a>>;
}
