use crate::error::Result;
use crate::record::HistoryEntry;
use crate::store_trait::HistoryStore;
use dashmap::DashMap;
use girder_commons::{Envelope, Stamp, StampGenerator, StreamKey};
use parking_lot::RwLock;
use std::sync::Arc;

/// In-memory history store for embedding and tests.
///
/// Each stream is a vector behind its own lock; the stamp is assigned while
/// the write lock is held, so append order and stamp order always agree.
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    streams: DashMap<StreamKey, Arc<RwLock<Vec<HistoryEntry>>>>,
    stamps: StampGenerator,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self { streams: DashMap::new(), stamps: StampGenerator::new() }
    }

    /// Number of retained entries for `key`.
    pub fn len(&self, key: &StreamKey) -> usize {
        self.streams.get(key).map(|s| s.read().len()).unwrap_or(0)
    }

    pub fn is_empty(&self, key: &StreamKey) -> bool {
        self.len(key) == 0
    }

    fn stream(&self, key: &StreamKey) -> Arc<RwLock<Vec<HistoryEntry>>> {
        self.streams
            .entry(key.clone())
            .or_insert_with(|| Arc::new(RwLock::new(Vec::new())))
            .clone()
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn save_history(&self, key: &StreamKey, envelope: &Envelope) -> Result<Stamp> {
        let stream = self.stream(key);
        let mut entries = stream.write();
        let stamp = self.stamps.next(key);
        entries.push(HistoryEntry::new(stamp, envelope.clone()));
        Ok(stamp)
    }

    fn read_history(&self, key: &StreamKey, since: Stamp) -> Result<Vec<HistoryEntry>> {
        match self.streams.get(key) {
            Some(stream) => {
                let entries = stream.read();
                Ok(entries.iter().filter(|e| e.stamp > since).cloned().collect())
            },
            None => Ok(Vec::new()),
        }
    }

    fn delete_history(&self, key: &StreamKey, through: Stamp) -> Result<usize> {
        match self.streams.get(key) {
            Some(stream) => {
                let mut entries = stream.write();
                let before = entries.len();
                entries.retain(|e| e.stamp > through);
                Ok(before - entries.len())
            },
            None => Ok(0),
        }
    }

    fn drop_stream(&self, key: &StreamKey) -> Result<()> {
        self.streams.remove(key);
        self.stamps.forget(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> StreamKey {
        StreamKey::new(name).unwrap()
    }

    fn envelope(text: &str) -> Envelope {
        Envelope::new("id", text)
    }

    #[test]
    fn test_round_trip() {
        let store = MemoryHistoryStore::new();
        let k = key("room_1");

        let stamp = store.save_history(&k, &envelope("hello")).unwrap();
        let entries = store.read_history(&k, Stamp::ZERO).unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].stamp, stamp);
        assert_eq!(entries[0].envelope.message, "hello");
    }

    #[test]
    fn test_read_is_exclusive_of_since() {
        let store = MemoryHistoryStore::new();
        let k = key("room_1");

        let s1 = store.save_history(&k, &envelope("one")).unwrap();
        let s2 = store.save_history(&k, &envelope("two")).unwrap();
        let s3 = store.save_history(&k, &envelope("three")).unwrap();
        assert!(s1 < s2 && s2 < s3);

        let entries = store.read_history(&k, s1).unwrap();
        let messages: Vec<&str> =
            entries.iter().map(|e| e.envelope.message.as_str()).collect();
        assert_eq!(messages, vec!["two", "three"]);
    }

    #[test]
    fn test_delete_history_prunes_through() {
        let store = MemoryHistoryStore::new();
        let k = key("room_1");

        store.save_history(&k, &envelope("one")).unwrap();
        let s2 = store.save_history(&k, &envelope("two")).unwrap();
        store.save_history(&k, &envelope("three")).unwrap();

        let removed = store.delete_history(&k, s2).unwrap();
        assert_eq!(removed, 2);

        let entries = store.read_history(&k, Stamp::ZERO).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].envelope.message, "three");
    }

    #[test]
    fn test_independent_streams() {
        let store = MemoryHistoryStore::new();
        store.save_history(&key("a"), &envelope("in a")).unwrap();

        assert!(store.read_history(&key("b"), Stamp::ZERO).unwrap().is_empty());
        assert_eq!(store.len(&key("a")), 1);
    }

    #[test]
    fn test_drop_stream() {
        let store = MemoryHistoryStore::new();
        let k = key("room_1");
        store.save_history(&k, &envelope("one")).unwrap();
        store.drop_stream(&k).unwrap();
        assert!(store.read_history(&k, Stamp::ZERO).unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_appends_stay_ordered() {
        let store = Arc::new(MemoryHistoryStore::new());
        let k = key("room_1");
        let mut handles = vec![];

        for t in 0..4 {
            let store = Arc::clone(&store);
            let k = k.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..50 {
                    store.save_history(&k, &envelope(&format!("{}-{}", t, i))).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let entries = store.read_history(&k, Stamp::ZERO).unwrap();
        assert_eq!(entries.len(), 200);
        for pair in entries.windows(2) {
            assert!(pair[0].stamp < pair[1].stamp, "entries must be in ascending stamp order");
        }
    }
}
