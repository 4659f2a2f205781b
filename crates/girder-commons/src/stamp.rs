//! Stamps for history entries.
//!
//! A stamp is a `(timestamp, sequence)` pair ordered lexicographically. The
//! sequence component breaks ties for appends that land within the same
//! millisecond, so a single key's entries always form a strict append order
//! without depending on wall-clock precision.

use crate::ids::StreamKey;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Position of a history entry within its stream.
///
/// Ordered by `(ts_ms, seq)`. `seq` restarts at zero whenever the clock
/// advances to a new millisecond.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct Stamp {
    /// Milliseconds since the Unix epoch, assigned at append time.
    pub ts_ms: u64,
    /// Tie-breaker for appends within the same millisecond.
    pub seq: u32,
}

impl Stamp {
    /// The "replay everything" lower bound.
    pub const ZERO: Stamp = Stamp { ts_ms: 0, seq: 0 };

    pub const fn new(ts_ms: u64, seq: u32) -> Self {
        Self { ts_ms, seq }
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.ts_ms, self.seq)
    }
}

/// Per-key monotonic stamp allocation.
///
/// Each key has an independent counter behind its own mutex, so stamping for
/// different keys never contends. For a single key, successive stamps are
/// strictly increasing: a repeat of the same millisecond bumps the sequence,
/// and a wall clock that moves backwards is clamped to the last stamp's
/// millisecond rather than refused, so publishing stays live even when the
/// clock misbehaves.
#[derive(Debug, Default)]
pub struct StampGenerator {
    last: DashMap<StreamKey, Arc<Mutex<Stamp>>>,
}

impl StampGenerator {
    pub fn new() -> Self {
        Self { last: DashMap::new() }
    }

    /// Allocate the next stamp for `key`.
    pub fn next(&self, key: &StreamKey) -> Stamp {
        let now = Self::now_ms();
        // The DashMap shard lock is held only for the lookup/insert, not
        // while the stamp is computed.
        let slot = self
            .last
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Stamp::ZERO)))
            .clone();
        let mut last = slot.lock();

        let stamp = if now > last.ts_ms {
            Stamp::new(now, 0)
        } else if last.seq < u32::MAX {
            // Same millisecond, or the clock went backwards: stay on the
            // previous stamp's millisecond and bump the sequence.
            Stamp::new(last.ts_ms, last.seq + 1)
        } else {
            Stamp::new(last.ts_ms + 1, 0)
        };

        *last = stamp;
        stamp
    }

    /// Seed a key's counter (used when restoring from a persisted log).
    pub fn seed(&self, key: &StreamKey, stamp: Stamp) {
        self.last.insert(key.clone(), Arc::new(Mutex::new(stamp)));
    }

    /// Drop a key's counter.
    pub fn forget(&self, key: &StreamKey) {
        self.last.remove(key);
    }

    fn now_ms() -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }
}
