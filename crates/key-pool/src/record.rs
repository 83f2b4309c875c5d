//! Per-key usage and error state

use chrono::{DateTime, Datelike, Utc};
use common::Secret;
use serde::Serialize;

use crate::pool::PoolConfig;

/// State for a single API key. Only the pool mutates it.
pub(crate) struct KeyRecord {
    key: Secret<String>,
    preview: String,
    available: bool,
    error_count: u32,
    daily_usage: u64,
    monthly_usage: u64,
    last_used: DateTime<Utc>,
    last_daily_reset: DateTime<Utc>,
    last_monthly_reset: DateTime<Utc>,
}

/// Counters cleared by a calendar reset, for logging.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ResetOutcome {
    pub daily: Option<u64>,
    pub monthly: Option<u64>,
}

/// Read-only snapshot of a key for status reporting. Never carries the key.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyStatus {
    pub key_preview: String,
    pub available: bool,
    pub error_count: u32,
    pub daily_usage: u64,
    pub monthly_usage: u64,
    pub daily_limit: u64,
    pub monthly_limit: u64,
    pub last_used: DateTime<Utc>,
    pub last_daily_reset: DateTime<Utc>,
    pub last_monthly_reset: DateTime<Utc>,
}

impl KeyRecord {
    pub fn new(key: String, now: DateTime<Utc>) -> Self {
        let key = Secret::new(key);
        let preview = key.preview();
        Self {
            key,
            preview,
            available: true,
            error_count: 0,
            daily_usage: 0,
            monthly_usage: 0,
            last_used: now,
            last_daily_reset: now,
            last_monthly_reset: now,
        }
    }

    pub fn key(&self) -> &Secret<String> {
        &self.key
    }

    pub fn matches(&self, key: &str) -> bool {
        self.key.expose() == key
    }

    pub fn preview(&self) -> &str {
        &self.preview
    }

    pub fn available(&self) -> bool {
        self.available
    }

    /// Available, under the error threshold, and under both quotas.
    pub fn is_usable(&self, config: &PoolConfig) -> bool {
        self.available
            && self.error_count < config.error_threshold
            && self.daily_usage < config.daily_limit
            && self.monthly_usage < config.monthly_limit
    }

    /// True when a quota, not an error, keeps the key out of rotation.
    pub fn over_quota(&self, config: &PoolConfig) -> bool {
        self.daily_usage >= config.daily_limit || self.monthly_usage >= config.monthly_limit
    }

    /// Clear counters whose UTC day or month differs from `now`.
    pub fn reset_if_needed(&mut self, now: DateTime<Utc>) -> ResetOutcome {
        let mut outcome = ResetOutcome::default();
        if self.last_daily_reset.date_naive() != now.date_naive() {
            outcome.daily = Some(self.daily_usage);
            self.daily_usage = 0;
            self.last_daily_reset = now;
        }
        if (self.last_monthly_reset.year(), self.last_monthly_reset.month())
            != (now.year(), now.month())
        {
            outcome.monthly = Some(self.monthly_usage);
            self.monthly_usage = 0;
            self.last_monthly_reset = now;
        }
        outcome
    }

    pub fn record_use(&mut self, now: DateTime<Utc>) {
        self.last_used = now;
        self.daily_usage += 1;
        self.monthly_usage += 1;
    }

    /// Increment the error count. Returns true if this error disables the key.
    pub fn record_error(&mut self, threshold: u32) -> bool {
        self.error_count += 1;
        if self.error_count >= threshold {
            self.available = false;
            return true;
        }
        false
    }

    /// Re-enable the key if it is still at or over the error threshold.
    pub fn recover(&mut self, threshold: u32) -> bool {
        if self.error_count >= threshold {
            self.error_count = 0;
            self.available = true;
            return true;
        }
        false
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn usage(&self) -> (u64, u64) {
        (self.daily_usage, self.monthly_usage)
    }

    pub fn snapshot(&self, config: &PoolConfig) -> KeyStatus {
        KeyStatus {
            key_preview: self.preview.clone(),
            available: self.available,
            error_count: self.error_count,
            daily_usage: self.daily_usage,
            monthly_usage: self.monthly_usage,
            daily_limit: config.daily_limit,
            monthly_limit: config.monthly_limit,
            last_used: self.last_used,
            last_daily_reset: self.last_daily_reset,
            last_monthly_reset: self.last_monthly_reset,
        }
    }
}
