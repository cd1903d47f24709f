//! Shared id types and generators.
//!
//! Task ids are sortable time-prefixed strings (epoch milliseconds followed
//! by a zero-padded per-process counter), so a lexicographic sort is a
//! chronological sort. Nonces follow the upstream snowflake layout: the
//! milliseconds since the platform epoch shifted left 22 bits, OR-ed with a
//! random low word. The upstream echoes the nonce back on the acknowledging
//! message, making it the primary correlation key.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use rand::Rng;

/// Task identifier. Time-prefixed, unique within a process.
pub type TaskId = String;

/// Upstream channel identifier (also the account identifier).
pub type ChannelId = String;

/// UTC timestamp used across all entities.
pub type Timestamp = chrono::DateTime<Utc>;

/// Milliseconds offset of the chat platform's snowflake epoch from Unix.
const PLATFORM_EPOCH_MS: i64 = 1_420_070_400_000;

/// Width of the per-process counter suffix on task ids.
const TASK_ID_SUFFIX: u64 = 10_000;

static TASK_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate the next task id: `<epoch millis><4-digit counter>`.
///
/// Two ids generated in the same millisecond differ in the counter suffix;
/// ids remain sortable by submission time.
pub fn next_task_id() -> TaskId {
    let millis = Utc::now().timestamp_millis();
    let seq = TASK_COUNTER.fetch_add(1, Ordering::Relaxed) % TASK_ID_SUFFIX;
    format!("{millis}{seq:04}")
}

/// Generate a snowflake-shaped nonce for an upstream command.
pub fn next_nonce() -> String {
    let millis = Utc::now().timestamp_millis() - PLATFORM_EPOCH_MS;
    let low: u64 = rand::rng().random_range(0..(1 << 22));
    (((millis as u64) << 22) | low).to_string()
}
