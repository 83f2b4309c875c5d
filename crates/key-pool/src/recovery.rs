//! Timed recovery for disabled keys
//!
//! Each time a key is disabled the pool spawns one of these one-shot timers.
//! The timer holds a `Weak` handle to the pool state and the record's index
//! (records are never removed, so the index is stable). If the pool is gone
//! when the timer fires, it does nothing.

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::pool::PoolState;

/// Spawn a task that re-enables the record at `index` after `cooldown`, if
/// its error count is still at or above `threshold` by then.
pub(crate) fn spawn_recovery(
    state: Weak<Mutex<PoolState>>,
    index: usize,
    cooldown: Duration,
    threshold: u32,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(cooldown).await;
        recover(&state, index, threshold).await;
    })
}

/// Run one recovery check. Returns true if the key was re-enabled.
async fn recover(state: &Weak<Mutex<PoolState>>, index: usize, threshold: u32) -> bool {
    let Some(state) = state.upgrade() else {
        debug!(index, "pool dropped before recovery, skipping");
        return false;
    };
    let mut state = state.lock().await;
    let Some(record) = state.records.get_mut(index) else {
        return false;
    };

    if record.recover(threshold) {
        info!(key = %record.preview(), "key recovered and marked available");
        metrics::counter!("key_pool_keys_recovered_total").increment(1);
        true
    } else {
        debug!(key = %record.preview(), "key already recovered");
        false
    }
}
