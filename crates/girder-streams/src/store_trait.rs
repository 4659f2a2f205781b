use crate::error::Result;
use crate::record::HistoryEntry;
use girder_commons::{Envelope, Stamp, StreamKey};

/// History storage trait.
///
/// Appends are linearizable per key: one key's entries form a strict append
/// order, matched by strictly increasing stamps. Different keys may be
/// written fully in parallel.
pub trait HistoryStore: Send + Sync {
    /// Append `envelope` to the log for `key`, assigning its stamp at append
    /// time. Returns the assigned stamp.
    fn save_history(&self, key: &StreamKey, envelope: &Envelope) -> Result<Stamp>;

    /// Read all entries for `key` with stamp strictly greater than `since`,
    /// in ascending stamp order. `Stamp::ZERO` reads the full retained log.
    fn read_history(&self, key: &StreamKey, since: Stamp) -> Result<Vec<HistoryEntry>>;

    /// Prune entries with stamp at or below `through`, once they have been
    /// replayed. Best-effort cleanup; returns the number of entries removed
    /// from the retained log.
    fn delete_history(&self, key: &StreamKey, through: Stamp) -> Result<usize>;

    /// Remove a stream's log entirely.
    fn drop_stream(&self, key: &StreamKey) -> Result<()>;
}
