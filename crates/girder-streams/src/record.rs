use girder_commons::{Envelope, Stamp};
use serde::{Deserialize, Serialize};

/// A single replayable history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Position within the stream, assigned at append time.
    pub stamp: Stamp,
    /// The stored envelope, identical to what was delivered live.
    pub envelope: Envelope,
}

impl HistoryEntry {
    pub fn new(stamp: Stamp, envelope: Envelope) -> Self {
        Self { stamp, envelope }
    }
}

/// On-disk log record. Pruning writes a tombstone instead of rewriting the
/// log; readers drop appends at or below the newest tombstone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryRecord {
    Append { stamp: Stamp, envelope: Envelope },
    Prune { through: Stamp },
}
