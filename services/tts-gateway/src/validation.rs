//! Inbound request validation
//!
//! Checks a `TtsRequest` against the configured limits and turns it into the
//! `SynthesisRequest` forwarded upstream, filling in default language,
//! speaking rate, and mime type.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use synthesis::SynthesisRequest;

use crate::config::LimitsConfig;

/// Largest accepted seed.
const MAX_SEED: i64 = 2_147_483_647;

/// Smallest accepted seed (-1 asks the upstream for a random seed).
const MIN_SEED: i64 = -1;

/// Request body for `POST /api/tts/synthesize`.
#[derive(Debug, Default, Deserialize)]
pub struct TtsRequest {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub language_iso_code: Option<String>,
    #[serde(default)]
    pub speaking_rate: Option<f64>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub speaker_audio: Option<String>,
    #[serde(default)]
    pub seconds: Option<f64>,
    #[serde(default)]
    pub seed: Option<i64>,
}

/// Validate `request` and build the upstream request.
///
/// Returns a human-readable message describing the first violated rule.
pub fn validate(request: TtsRequest, limits: &LimitsConfig) -> Result<SynthesisRequest, String> {
    let text = match request.text {
        Some(text) if !text.is_empty() => text,
        _ => return Err("Text is required".to_string()),
    };

    if text.chars().count() > limits.max_text_length {
        return Err(format!(
            "Text length exceeds maximum of {} characters",
            limits.max_text_length
        ));
    }

    if request
        .speaking_rate
        .is_some_and(|rate| rate < limits.min_speaking_rate || rate > limits.max_speaking_rate)
    {
        return Err(format!(
            "Speaking rate must be between {} and {}",
            limits.min_speaking_rate, limits.max_speaking_rate
        ));
    }

    if let Some(ref sample) = request.speaker_audio {
        validate_voice_sample(sample, limits)?;
    }

    if request
        .mime_type
        .as_ref()
        .is_some_and(|mime| !limits.supported_mime_types.contains(mime))
    {
        return Err(format!(
            "Unsupported audio format. Supported formats are: {}",
            limits.supported_mime_types.join(", ")
        ));
    }

    if request
        .seconds
        .is_some_and(|seconds| seconds < limits.min_seconds || seconds > limits.max_seconds)
    {
        return Err(format!(
            "Duration must be between {} and {} seconds",
            limits.min_seconds, limits.max_seconds
        ));
    }

    if request
        .seed
        .is_some_and(|seed| !(MIN_SEED..=MAX_SEED).contains(&seed))
    {
        return Err(format!("Seed must be between {MIN_SEED} and {MAX_SEED}"));
    }

    Ok(SynthesisRequest {
        text,
        language_iso_code: Some(
            request
                .language_iso_code
                .unwrap_or_else(|| limits.default_language.clone()),
        ),
        speaking_rate: Some(request.speaking_rate.unwrap_or(limits.default_speaking_rate)),
        mime_type: Some(
            request
                .mime_type
                .unwrap_or_else(|| limits.default_mime_type.clone()),
        ),
        speaker_audio: request.speaker_audio,
        seconds: request.seconds,
        seed: request.seed,
    })
}

/// Voice samples must be standard base64 and decode within the size limit.
fn validate_voice_sample(sample: &str, limits: &LimitsConfig) -> Result<(), String> {
    // Reject on the encoded length first so oversized samples are not decoded
    let estimated = sample.len() / 4 * 3;
    if estimated > limits.max_voice_sample_bytes {
        return Err(voice_sample_too_large(limits));
    }

    let decoded = STANDARD
        .decode(sample)
        .map_err(|_| "Invalid base64 format for voice sample".to_string())?;
    if decoded.len() > limits.max_voice_sample_bytes {
        return Err(voice_sample_too_large(limits));
    }
    Ok(())
}

fn voice_sample_too_large(limits: &LimitsConfig) -> String {
    format!(
        "Voice sample exceeds maximum size of {}MB",
        limits.max_voice_sample_bytes / (1024 * 1024)
    )
}
