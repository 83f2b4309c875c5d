//! Failure-aware retry and key rotation around synthesis calls
//!
//! Two retry tiers:
//! - Rate-limited failures belong to the key: count an error against it and
//!   rotate to another key. At most one attempt per key (one lap of the pool).
//! - Gateway timeouts belong to the call: wait `base_delay * attempt` and
//!   retry on the same key, up to `max_attempts` calls per key.
//!
//! Fatal failures surface immediately. Each downstream attempt runs in its
//! own task, which also does the usage/error bookkeeping. Dropping the
//! `execute` future stops further retries but never aborts a call that was
//! already issued, so usage the upstream billed is still recorded.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use common::Secret;
use serde::Deserialize;
use synthesis::{SynthesisFailure, SynthesisRequest, Synthesizer};
use tracing::{debug, info, instrument, warn};

use crate::classify::{FailureKind, classify};
use crate::error::{Error, Result};
use crate::pool::{KeyPool, SelectedKey};

/// Bounds for transient-failure retries.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total calls on one key for transient failures
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based): linear backoff.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.delay_ms_for(attempt))
    }

    /// `delay_for` in milliseconds, saturating at `u64::MAX`.
    pub fn delay_ms_for(&self, attempt: u32) -> u64 {
        self.base_delay_ms.saturating_mul(u64::from(attempt))
    }
}

/// Outcome of one attempt: audio, or the classified failure.
type AttemptOutcome = std::result::Result<Bytes, (FailureKind, SynthesisFailure)>;

/// Runs synthesis requests against the key pool with rotation and backoff.
///
/// This is the only entry point request handlers should call.
pub struct Orchestrator {
    pool: Arc<KeyPool>,
    synthesizer: Arc<dyn Synthesizer>,
    policy: RetryPolicy,
}

impl Orchestrator {
    pub fn new(pool: Arc<KeyPool>, synthesizer: Arc<dyn Synthesizer>, policy: RetryPolicy) -> Self {
        Self {
            pool,
            synthesizer,
            policy,
        }
    }

    pub fn pool(&self) -> &Arc<KeyPool> {
        &self.pool
    }

    /// Synthesize `request`, rotating keys on rate limits and backing off on
    /// gateway timeouts.
    ///
    /// Returns `NoKeyAvailable` as soon as the pool has nothing usable, and
    /// `SynthesisFailed` carrying the last upstream failure when a failure is
    /// fatal or a retry bound is exceeded.
    #[instrument(skip_all, fields(synthesizer = self.synthesizer.id(), text_len = request.text.len()))]
    pub async fn execute(&self, request: SynthesisRequest) -> Result<Bytes> {
        let request = Arc::new(request);
        // Keys this request has been rate limited on; never selected again
        let mut tried: Vec<Secret<String>> = Vec::new();
        let mut attempt = 1u32;
        let mut selected = self.pool.select().await?;

        loop {
            debug!(key = %selected.preview, attempt, "calling synthesizer");
            let failure = match self.run_attempt(&selected, &request).await? {
                Ok(audio) => return Ok(audio),
                Err(failure) => failure,
            };

            match failure {
                (FailureKind::RateLimited, failure) => {
                    tried.push(selected.key.clone());
                    let Some(next) = self.pool.select_excluding(&tried).await? else {
                        warn!(
                            rotations = tried.len(),
                            error = %failure,
                            "rate limited on every usable key"
                        );
                        return Err(Error::synthesis_failed(FailureKind::RateLimited, failure));
                    };
                    info!(
                        key = %selected.preview,
                        next = %next.preview,
                        error = %failure,
                        "key rate limited, rotating"
                    );
                    selected = next;
                    attempt = 1;
                }
                (FailureKind::TransientRetryable, failure) if attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        key = %selected.preview,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = self.policy.delay_ms_for(attempt),
                        error = %failure,
                        "transient upstream failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                (kind, failure) => {
                    warn!(
                        key = %selected.preview,
                        attempt,
                        cause = kind.label(),
                        error = %failure,
                        "synthesis failed"
                    );
                    return Err(Error::synthesis_failed(kind, failure));
                }
            }
        }
    }

    /// Issue one call on a detached task and wait for it.
    ///
    /// The task records usage on success and an error on rate limiting, so
    /// the bookkeeping happens even if this future is dropped mid-call.
    async fn run_attempt(
        &self,
        selected: &SelectedKey,
        request: &Arc<SynthesisRequest>,
    ) -> Result<AttemptOutcome> {
        let pool = Arc::clone(&self.pool);
        let synthesizer = Arc::clone(&self.synthesizer);
        let key = selected.key.clone();
        let request = Arc::clone(request);

        let task = tokio::spawn(async move {
            match synthesizer.synthesize(key.expose(), &request).await {
                Ok(audio) => {
                    pool.record_success(key.expose()).await;
                    metrics::counter!("synthesis_attempts_total", "outcome" => "success")
                        .increment(1);
                    Ok(audio)
                }
                Err(failure) => {
                    let kind = classify(&failure);
                    if kind == FailureKind::RateLimited {
                        pool.record_error(key.expose()).await;
                    }
                    metrics::counter!("synthesis_attempts_total", "outcome" => kind.label())
                        .increment(1);
                    Err((kind, failure))
                }
            }
        });

        task.await
            .map_err(|e| Error::Internal(format!("synthesis task failed: {e}")))
    }
}
