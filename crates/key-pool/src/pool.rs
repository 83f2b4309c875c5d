//! Key pool with round-robin selection and quota tracking
//!
//! All per-key state lives in one `PoolState` behind a single tokio `Mutex`.
//! Selection, usage and error reporting, calendar resets, and timed
//! recoveries all take that lock, so concurrent scans and counter updates
//! are serialized. Callers only ever see clones of the key and snapshots of
//! its state.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::Secret;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::record::{KeyRecord, KeyStatus};
use crate::recovery::spawn_recovery;

/// Pool limits and recovery timing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Errors before a key is disabled
    pub error_threshold: u32,
    /// Delay before a disabled key is re-enabled
    pub cooldown_secs: u64,
    pub daily_limit: u64,
    pub monthly_limit: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            error_threshold: 3,
            cooldown_secs: 300,
            daily_limit: 1000,
            monthly_limit: 25_000,
        }
    }
}

impl PoolConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// A key chosen for one downstream call.
#[derive(Debug, Clone)]
pub struct SelectedKey {
    pub key: Secret<String>,
    pub preview: String,
}

/// Pool-wide counts for the health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolHealth {
    pub status: &'static str,
    pub keys_total: usize,
    pub keys_usable: usize,
    pub keys_disabled: usize,
    pub keys_over_quota: usize,
}

/// Shared state guarded by the pool lock. Recovery timers hold a `Weak`
/// reference to it plus a record index.
pub(crate) struct PoolState {
    pub(crate) records: Vec<KeyRecord>,
    /// Index where the next scan starts (one past the last selection)
    next_index: usize,
    recoveries: Vec<JoinHandle<()>>,
}

/// Pool of interchangeable API keys.
pub struct KeyPool {
    state: Arc<Mutex<PoolState>>,
    config: PoolConfig,
}

impl KeyPool {
    /// Create a pool from raw key strings, in the given order.
    ///
    /// Fails with `EmptyPool` if `keys` is empty. Duplicate keys are dropped
    /// so that each identity appears once.
    pub fn new(keys: Vec<String>, config: PoolConfig) -> Result<Self> {
        Self::new_at(keys, config, Utc::now())
    }

    /// Like `new`, with an explicit construction time for the counter timestamps.
    pub fn new_at(keys: Vec<String>, config: PoolConfig, now: DateTime<Utc>) -> Result<Self> {
        let mut records: Vec<KeyRecord> = Vec::with_capacity(keys.len());
        for key in keys {
            if key.is_empty() {
                warn!("ignoring empty API key");
                continue;
            }
            if records.iter().any(|r| r.matches(&key)) {
                warn!(key = %common::key_preview(&key), "ignoring duplicate API key");
                continue;
            }
            records.push(KeyRecord::new(key, now));
        }
        if records.is_empty() {
            return Err(Error::EmptyPool);
        }

        info!(
            keys = records.len(),
            error_threshold = config.error_threshold,
            cooldown_secs = config.cooldown_secs,
            daily_limit = config.daily_limit,
            monthly_limit = config.monthly_limit,
            "key pool initialized"
        );
        Ok(Self {
            state: Arc::new(Mutex::new(PoolState {
                records,
                next_index: 0,
                recoveries: Vec::new(),
            })),
            config,
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    #[cfg(test)]
    pub(crate) fn state_handle(&self) -> Arc<Mutex<PoolState>> {
        Arc::clone(&self.state)
    }

    /// Number of keys in the pool.
    pub async fn len(&self) -> usize {
        self.state.lock().await.records.len()
    }

    /// Select the next usable key round-robin.
    ///
    /// Applies pending calendar resets first, then scans at most one full lap
    /// starting one past the previous selection. Returns `NoKeyAvailable`
    /// with pool counts if nothing is usable.
    pub async fn select(&self) -> Result<SelectedKey> {
        self.select_at(Utc::now()).await
    }

    /// `select` with an explicit clock.
    pub async fn select_at(&self, now: DateTime<Utc>) -> Result<SelectedKey> {
        let mut state = self.state.lock().await;
        match self.pick(&mut state, now, &[]) {
            Some(selected) => Ok(selected),
            None => Err(self.exhausted(&state)),
        }
    }

    /// Select the next usable key round-robin, skipping every key in
    /// `exclude`.
    ///
    /// Returns `Ok(None)` when usable keys exist but all of them are
    /// excluded, and `NoKeyAvailable` when nothing is usable at all.
    pub async fn select_excluding(
        &self,
        exclude: &[Secret<String>],
    ) -> Result<Option<SelectedKey>> {
        self.select_excluding_at(exclude, Utc::now()).await
    }

    /// `select_excluding` with an explicit clock.
    pub async fn select_excluding_at(
        &self,
        exclude: &[Secret<String>],
        now: DateTime<Utc>,
    ) -> Result<Option<SelectedKey>> {
        let mut state = self.state.lock().await;
        if let Some(selected) = self.pick(&mut state, now, exclude) {
            return Ok(Some(selected));
        }
        if state.records.iter().any(|r| r.is_usable(&self.config)) {
            debug!(excluded = exclude.len(), "every usable key already tried");
            return Ok(None);
        }
        Err(self.exhausted(&state))
    }

    /// Apply calendar resets, then scan one lap from the cursor for a usable
    /// key outside `exclude`. Advances the cursor past the pick.
    fn pick(
        &self,
        state: &mut PoolState,
        now: DateTime<Utc>,
        exclude: &[Secret<String>],
    ) -> Option<SelectedKey> {
        reset_counters(&mut state.records, now);

        let n = state.records.len();
        let start = state.next_index % n;

        for offset in 0..n {
            let idx = (start + offset) % n;
            let record = &state.records[idx];
            if !record.is_usable(&self.config)
                || exclude.iter().any(|k| record.matches(k.expose()))
            {
                continue;
            }
            let selected = SelectedKey {
                key: record.key().clone(),
                preview: record.preview().to_string(),
            };
            state.next_index = (idx + 1) % n;
            debug!(key = %selected.preview, "key selected");
            metrics::counter!("key_pool_selections_total").increment(1);
            return Some(selected);
        }
        None
    }

    /// Log and build the error for a pool with nothing usable.
    fn exhausted(&self, state: &PoolState) -> Error {
        let health = health_of(&state.records, &self.config);
        warn!(
            keys_total = health.keys_total,
            keys_disabled = health.keys_disabled,
            keys_over_quota = health.keys_over_quota,
            "no usable API key"
        );
        Error::NoKeyAvailable(exhausted_message(&health))
    }

    /// Count a successful call against a key's quotas.
    ///
    /// Unknown keys are ignored.
    pub async fn record_success(&self, key: &str) {
        self.record_success_at(key, Utc::now()).await
    }

    /// `record_success` with an explicit clock.
    pub async fn record_success_at(&self, key: &str, now: DateTime<Utc>) {
        let mut state = self.state.lock().await;
        let Some(record) = state.records.iter_mut().find(|r| r.matches(key)) else {
            debug!(key = %common::key_preview(key), "usage reported for unknown key");
            return;
        };
        record.record_use(now);
        let (daily, monthly) = record.usage();
        info!(key = %record.preview(), daily, monthly, "usage incremented");
    }

    /// Count an error against a key.
    ///
    /// Once the error count reaches the threshold the key is disabled and a
    /// one-shot recovery is scheduled `cooldown` from now. Every disabling
    /// error schedules its own recovery. Unknown keys are ignored.
    pub async fn record_error(&self, key: &str) {
        let mut state = self.state.lock().await;
        let Some(index) = state.records.iter().position(|r| r.matches(key)) else {
            debug!(key = %common::key_preview(key), "error reported for unknown key");
            return;
        };

        let threshold = self.config.error_threshold;
        let record = &mut state.records[index];
        let disabled = record.record_error(threshold);
        info!(
            key = %record.preview(),
            error_count = record.error_count(),
            "error count increased"
        );
        metrics::counter!("key_pool_key_errors_total").increment(1);

        if !disabled {
            return;
        }

        warn!(
            key = %record.preview(),
            cooldown_secs = self.config.cooldown_secs,
            "key disabled after repeated errors"
        );
        metrics::counter!("key_pool_keys_disabled_total").increment(1);

        let handle = spawn_recovery(
            Arc::downgrade(&self.state),
            index,
            self.config.cooldown(),
            threshold,
        );
        state.recoveries.retain(|h| !h.is_finished());
        state.recoveries.push(handle);
    }

    /// Snapshot of every key with the raw value redacted to its preview.
    pub async fn status(&self) -> Vec<KeyStatus> {
        let state = self.state.lock().await;
        state
            .records
            .iter()
            .map(|r| r.snapshot(&self.config))
            .collect()
    }

    /// Pool-wide counts. Status mapping: all keys usable → healthy, some →
    /// degraded, none → unhealthy.
    pub async fn health(&self) -> PoolHealth {
        let state = self.state.lock().await;
        health_of(&state.records, &self.config)
    }

    /// Abort outstanding recovery timers. Called at shutdown.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        let pending = state.recoveries.len();
        for handle in state.recoveries.drain(..) {
            handle.abort();
        }
        debug!(pending, "recovery timers abandoned");
    }
}

impl Drop for KeyPool {
    fn drop(&mut self) {
        // Timers also hold only a Weak handle, so any that slip past this
        // find the state gone and do nothing.
        if let Ok(mut state) = self.state.try_lock() {
            for handle in state.recoveries.drain(..) {
                handle.abort();
            }
        }
    }
}

/// Apply calendar resets to every record, logging each one.
fn reset_counters(records: &mut [KeyRecord], now: DateTime<Utc>) {
    for record in records.iter_mut() {
        let outcome = record.reset_if_needed(now);
        if let Some(old) = outcome.daily {
            info!(key = %record.preview(), old_usage = old, "daily usage reset");
        }
        if let Some(old) = outcome.monthly {
            info!(key = %record.preview(), old_usage = old, "monthly usage reset");
        }
    }
}

fn health_of(records: &[KeyRecord], config: &PoolConfig) -> PoolHealth {
    let keys_total = records.len();
    let mut keys_usable = 0usize;
    let mut keys_disabled = 0usize;
    let mut keys_over_quota = 0usize;

    for record in records {
        if record.is_usable(config) {
            keys_usable += 1;
        } else if !record.available() || record.error_count() >= config.error_threshold {
            keys_disabled += 1;
        } else if record.over_quota(config) {
            keys_over_quota += 1;
        }
    }

    let status = if keys_usable == keys_total && keys_total > 0 {
        "healthy"
    } else if keys_usable > 0 {
        "degraded"
    } else {
        "unhealthy"
    };

    PoolHealth {
        status,
        keys_total,
        keys_usable,
        keys_disabled,
        keys_over_quota,
    }
}

/// Build the exhausted error message JSON.
fn exhausted_message(health: &PoolHealth) -> String {
    serde_json::json!({
        "error": {
            "type": "no_key_available",
            "message": "All API keys are disabled or over quota",
            "pool": {
                "keys_total": health.keys_total,
                "keys_disabled": health.keys_disabled,
                "keys_over_quota": health.keys_over_quota,
            }
        }
    })
    .to_string()
}
