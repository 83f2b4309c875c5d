//! HTTP synthesizer for the Zyphra text-to-speech endpoint.
//!
//! Posts the request JSON with the key in `X-API-Key` and returns the raw
//! audio body. Non-2xx responses are turned into a `SynthesisFailure` using
//! whatever error code and message the upstream put in its JSON body.

use crate::{SynthesisFailure, SynthesisRequest, SynthesisResult, Synthesizer};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, warn};

/// Default upstream endpoint.
pub const DEFAULT_UPSTREAM_URL: &str = "https://api.zyphra.com/v1/audio/text-to-speech";

/// Header carrying the API key on upstream requests.
const API_KEY_HEADER: &str = "X-API-Key";

/// reqwest-backed synthesizer.
pub struct HttpSynthesizer {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpSynthesizer {
    pub fn new(client: reqwest::Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            url: url.into(),
            timeout,
        }
    }
}

impl Synthesizer for HttpSynthesizer {
    fn id(&self) -> &str {
        "zyphra-http"
    }

    fn synthesize<'a>(
        &'a self,
        api_key: &'a str,
        request: &'a SynthesisRequest,
    ) -> Pin<Box<dyn Future<Output = SynthesisResult> + Send + 'a>> {
        Box::pin(async move {
            let response = self
                .client
                .post(&self.url)
                .header(API_KEY_HEADER, api_key)
                .timeout(self.timeout)
                .json(request)
                .send()
                .await
                .map_err(transport_failure)?;

            let status = response.status();
            if status.is_success() {
                let audio = response.bytes().await.map_err(|e| {
                    SynthesisFailure::http(status.as_u16(), format!("failed to read audio: {e}"))
                })?;
                debug!(bytes = audio.len(), "upstream returned audio");
                return Ok(audio);
            }

            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    warn!(error = %e, "failed to read upstream error body");
                    String::new()
                }
            };
            Err(failure_from_response(status.as_u16(), &body))
        })
    }
}

/// Map a reqwest error that produced no response into a failure descriptor.
fn transport_failure(e: reqwest::Error) -> SynthesisFailure {
    if e.is_timeout() {
        SynthesisFailure::transport("TIMEOUT", format!("upstream request timed out: {e}"))
    } else {
        SynthesisFailure::transport("CONNECTION", format!("upstream request failed: {e}"))
    }
}

/// Build a failure from a non-2xx status and its body.
///
/// Recognizes `{"error":{"code":..,"message":..}}` and flat
/// `{"code":..,"message":..}` / `{"detail":..}` shapes. Anything else uses the
/// raw body text, or the canonical reason phrase when the body is empty.
pub fn failure_from_response(status: u16, body: &str) -> SynthesisFailure {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let error_obj = parsed
        .as_ref()
        .map(|v| v.get("error").filter(|e| e.is_object()).unwrap_or(v));

    let code = error_obj
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_str())
        .map(str::to_string);

    let message = error_obj
        .and_then(|e| {
            e.get("message")
                .or_else(|| e.get("detail"))
                .and_then(|m| m.as_str())
        })
        .or_else(|| {
            parsed
                .as_ref()
                .and_then(|v| v.get("error"))
                .and_then(|e| e.as_str())
        })
        .map(str::to_string)
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                reqwest::StatusCode::from_u16(status)
                    .ok()
                    .and_then(|s| s.canonical_reason())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("upstream returned status {status}"))
            } else {
                trimmed.to_string()
            }
        });

    SynthesisFailure {
        status: Some(status),
        code,
        message,
    }
}
