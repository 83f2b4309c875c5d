//! API key pool for the rate-limited, quota-limited TTS upstream
//!
//! Manages a fixed set of interchangeable API keys shared by concurrent
//! requests, with round-robin selection, per-key daily/monthly quotas that
//! reset on UTC calendar boundaries, error-count disablement with a timed
//! recovery, and a retry policy that rotates keys on rate limiting and backs
//! off on gateway timeouts.
//!
//! Key lifecycle:
//! 1. Keys load from config at startup → all available, counters at zero
//! 2. `KeyPool::select` picks the next usable key round-robin
//! 3. Successful call → daily and monthly usage incremented
//! 4. Rate-limited call → error count incremented, request rotates to another key
//! 5. Error count reaches the threshold → key disabled, recovery timer scheduled
//! 6. Cooldown elapses → error count cleared, key available again
//! 7. First selection on a new UTC day/month → usage counters reset

pub mod classify;
pub mod error;
pub mod orchestrator;
pub mod pool;
mod record;
mod recovery;

pub use classify::{FailureKind, classify};
pub use error::{Error, Result};
pub use orchestrator::{Orchestrator, RetryPolicy};
pub use pool::{KeyPool, PoolConfig, PoolHealth, SelectedKey};
pub use record::KeyStatus;
