use crate::config::HistoryConfig;
use crate::error::{HistoryError, Result};
use crate::record::{HistoryEntry, HistoryRecord};
use crate::store_trait::HistoryStore;
use crate::time_bucket::TimeBucket;
use crate::utils::{cleanup_empty_dir, parse_log_window, read_dirs, read_files};
use chrono::{Datelike, TimeZone, Timelike, Utc};
use dashmap::DashMap;
use girder_commons::{Envelope, Stamp, StampGenerator, StreamKey};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File-backed history store.
///
/// Layout: `base_dir/<bucket-folder>/<stream-key>/<window_start>.log`, with
/// length-prefixed bincode records inside each window file. Pruning appends
/// a tombstone record; whole window files are removed once they age past the
/// retention horizon.
#[derive(Debug)]
pub struct FileHistoryStore {
    config: HistoryConfig,
    stamps: StampGenerator,
    /// Per-key append/read locks. Appends for one key are serialized so the
    /// on-disk order always matches stamp order; different keys proceed in
    /// parallel.
    locks: DashMap<StreamKey, Arc<Mutex<()>>>,
    /// Keys whose stamp counter has been seeded from disk this process.
    seeded: DashMap<StreamKey, ()>,
}

impl FileHistoryStore {
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            config,
            stamps: StampGenerator::new(),
            locks: DashMap::new(),
            seeded: DashMap::new(),
        }
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// Remove window files whose bucket has passed the configured retention
    /// horizon. Returns the number of files removed. A no-op when no
    /// retention is configured.
    pub fn prune_expired(&self, now_ms: u64) -> Result<usize> {
        match self.config.retention_ms {
            Some(retention) => self.delete_old_logs_with_count(now_ms.saturating_sub(retention)),
            None => Ok(0),
        }
    }

    /// Remove window files that ended before `before_ms`, cleaning up empty
    /// directories behind them.
    pub fn delete_old_logs_with_count(&self, before_ms: u64) -> Result<usize> {
        let mut deleted = 0usize;
        let base_dir = &self.config.base_dir;
        if !base_dir.exists() {
            return Ok(0);
        }

        let bucket_dirs = read_dirs(base_dir)?;
        for bucket_dir in bucket_dirs {
            let key_dirs = read_dirs(&bucket_dir)?;
            for key_dir in key_dirs {
                let log_files = read_files(&key_dir)?;
                for log_file in log_files {
                    if let Some(window_start) = parse_log_window(&log_file) {
                        let window_end =
                            window_start.saturating_add(self.config.bucket.duration_ms());
                        if window_end < before_ms && fs::remove_file(&log_file).is_ok() {
                            deleted += 1;
                        }
                    }
                }
                cleanup_empty_dir(&key_dir);
            }
            cleanup_empty_dir(&bucket_dir);
        }

        if deleted > 0 {
            log::debug!("removed {} expired history window file(s)", deleted);
        }

        Ok(deleted)
    }

    fn key_lock(&self, key: &StreamKey) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Seed the stamp counter from the newest entry on disk, so stamps keep
    /// increasing across process restarts. Caller holds the key lock.
    fn ensure_seeded(&self, key: &StreamKey) -> Result<()> {
        if self.seeded.contains_key(key) {
            return Ok(());
        }
        if let Some(last) = self.last_stamp_on_disk(key)? {
            self.stamps.seed(key, last);
        }
        self.seeded.insert(key.clone(), ());
        Ok(())
    }

    fn last_stamp_on_disk(&self, key: &StreamKey) -> Result<Option<Stamp>> {
        let mut entries = self.list_log_files_for_key(key)?;
        entries.sort_by(|a, b| b.0.cmp(&a.0));

        for (_window_start, path) in entries {
            let records = Self::read_records(&path)?;
            let last = records
                .iter()
                .filter_map(|r| match r {
                    HistoryRecord::Append { stamp, .. } => Some(*stamp),
                    HistoryRecord::Prune { .. } => None,
                })
                .max();
            if last.is_some() {
                return Ok(last);
            }
        }
        Ok(None)
    }

    fn window_start_ms(&self, ts_ms: u64) -> u64 {
        let dt = match Utc.timestamp_millis_opt(ts_ms as i64).single() {
            Some(val) => val,
            None => return ts_ms,
        };

        match self.config.bucket {
            TimeBucket::Hour => {
                let truncated = dt
                    .with_minute(0)
                    .and_then(|v| v.with_second(0))
                    .and_then(|v| v.with_nanosecond(0));
                truncated.map(|v| v.timestamp_millis() as u64).unwrap_or(ts_ms)
            },
            TimeBucket::Day => {
                let truncated =
                    dt.date_naive().and_hms_opt(0, 0, 0).map(|naive| Utc.from_utc_datetime(&naive));
                truncated.map(|v| v.timestamp_millis() as u64).unwrap_or(ts_ms)
            },
            TimeBucket::Week => {
                let weekday = dt.weekday().num_days_from_monday() as i64;
                let date = dt.date_naive() - chrono::Duration::days(weekday);
                let naive = date.and_hms_opt(0, 0, 0);
                naive
                    .map(|v| Utc.from_utc_datetime(&v).timestamp_millis() as u64)
                    .unwrap_or(ts_ms)
            },
            TimeBucket::Month => {
                let naive = chrono::NaiveDate::from_ymd_opt(dt.year(), dt.month(), 1)
                    .and_then(|d| d.and_hms_opt(0, 0, 0));
                naive
                    .map(|v| Utc.from_utc_datetime(&v).timestamp_millis() as u64)
                    .unwrap_or(ts_ms)
            },
        }
    }

    fn bucket_folder(&self, window_start_ms: u64) -> String {
        let dt = Utc
            .timestamp_millis_opt(window_start_ms as i64)
            .single()
            .unwrap_or_else(|| Utc.timestamp_millis_opt(0).single().unwrap());
        match self.config.bucket {
            TimeBucket::Hour => dt.format("%Y%m%d%H").to_string(),
            TimeBucket::Day => dt.format("%Y%m%d").to_string(),
            TimeBucket::Week => dt.format("%G%V").to_string(),
            TimeBucket::Month => dt.format("%Y%m").to_string(),
        }
    }

    fn log_path(&self, key: &StreamKey, window_start_ms: u64) -> PathBuf {
        let bucket_folder = self.bucket_folder(window_start_ms);
        self.config
            .base_dir
            .join(bucket_folder)
            .join(key.as_str())
            .join(format!("{}.log", window_start_ms))
    }

    fn append_record(&self, path: &Path, record: &HistoryRecord) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| HistoryError::Io(e.to_string()))?;
        }

        let mut file = BufWriter::new(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| HistoryError::Io(e.to_string()))?,
        );

        let payload = bincode::serde::encode_to_vec(record, bincode::config::standard())
            .map_err(|e| HistoryError::Serialization(e.to_string()))?;
        let len = payload.len() as u32;
        file.write_all(&len.to_le_bytes()).map_err(|e| HistoryError::Io(e.to_string()))?;
        file.write_all(&payload).map_err(|e| HistoryError::Io(e.to_string()))?;
        file.flush().map_err(|e| HistoryError::Io(e.to_string()))?;
        Ok(())
    }

    fn read_records(path: &Path) -> Result<Vec<HistoryRecord>> {
        let file = File::open(path).map_err(|e| HistoryError::Io(e.to_string()))?;
        let mut reader = BufReader::new(file);
        let mut records = Vec::new();
        loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(_) => {},
                Err(err) => {
                    if err.kind() == std::io::ErrorKind::UnexpectedEof {
                        break;
                    }
                    return Err(HistoryError::Io(err.to_string()));
                },
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            let mut payload = vec![0u8; len];
            reader.read_exact(&mut payload).map_err(|e| HistoryError::Io(e.to_string()))?;
            let (record, _) = bincode::serde::decode_from_slice::<HistoryRecord, _>(
                &payload,
                bincode::config::standard(),
            )
            .map_err(|e| HistoryError::Serialization(e.to_string()))?;
            records.push(record);
        }
        Ok(records)
    }

    fn list_log_files_for_key(&self, key: &StreamKey) -> Result<Vec<(u64, PathBuf)>> {
        let mut entries = Vec::new();
        let base_dir = &self.config.base_dir;
        if !base_dir.exists() {
            return Ok(entries);
        }

        let bucket_dirs = read_dirs(base_dir)?;
        for bucket_dir in bucket_dirs {
            let key_dir = bucket_dir.join(key.as_str());
            if !key_dir.exists() {
                continue;
            }
            let log_files = read_files(&key_dir)?;
            for log_file in log_files {
                if let Some(window_start) = parse_log_window(&log_file) {
                    entries.push((window_start, log_file));
                }
            }
        }

        Ok(entries)
    }

    /// Read all live entries for `key` (tombstones applied). Caller holds
    /// the key lock.
    fn read_live_entries(&self, key: &StreamKey) -> Result<Vec<HistoryEntry>> {
        let mut files = self.list_log_files_for_key(key)?;
        if files.is_empty() {
            return Ok(Vec::new());
        }
        files.sort_by_key(|(window_start, _)| *window_start);

        let mut appends: Vec<HistoryEntry> = Vec::new();
        let mut pruned_through: Option<Stamp> = None;

        for (_window_start, path) in files {
            for record in Self::read_records(&path)? {
                match record {
                    HistoryRecord::Append { stamp, envelope } => {
                        appends.push(HistoryEntry::new(stamp, envelope));
                    },
                    HistoryRecord::Prune { through } => {
                        pruned_through = Some(match pruned_through {
                            Some(existing) => existing.max(through),
                            None => through,
                        });
                    },
                }
            }
        }

        if let Some(through) = pruned_through {
            appends.retain(|e| e.stamp > through);
        }
        appends.sort_by_key(|e| e.stamp);
        Ok(appends)
    }
}

impl HistoryStore for FileHistoryStore {
    fn save_history(&self, key: &StreamKey, envelope: &Envelope) -> Result<Stamp> {
        let lock = self.key_lock(key);
        let _guard = lock.lock();

        self.ensure_seeded(key)?;
        let stamp = self.stamps.next(key);
        let window_start = self.window_start_ms(stamp.ts_ms);
        let path = self.log_path(key, window_start);
        self.append_record(&path, &HistoryRecord::Append { stamp, envelope: envelope.clone() })?;
        Ok(stamp)
    }

    fn read_history(&self, key: &StreamKey, since: Stamp) -> Result<Vec<HistoryEntry>> {
        let lock = self.key_lock(key);
        let _guard = lock.lock();

        let mut entries = self.read_live_entries(key)?;
        entries.retain(|e| e.stamp > since);
        Ok(entries)
    }

    fn delete_history(&self, key: &StreamKey, through: Stamp) -> Result<usize> {
        let lock = self.key_lock(key);
        let _guard = lock.lock();

        let entries = self.read_live_entries(key)?;
        let removed = entries.iter().filter(|e| e.stamp <= through).count();
        if removed == 0 {
            return Ok(0);
        }

        // Tombstone in the newest window; the records it shadows live in
        // older windows and age out first.
        let now_ms = Utc::now().timestamp_millis().max(0) as u64;
        let window_start = self.window_start_ms(now_ms);
        let path = self.log_path(key, window_start);
        self.append_record(&path, &HistoryRecord::Prune { through })?;
        Ok(removed)
    }

    fn drop_stream(&self, key: &StreamKey) -> Result<()> {
        let lock = self.key_lock(key);
        let _guard = lock.lock();

        let base_dir = &self.config.base_dir;
        for bucket_dir in read_dirs(base_dir)? {
            let key_dir = bucket_dir.join(key.as_str());
            if key_dir.exists() {
                fs::remove_dir_all(&key_dir).map_err(|e| HistoryError::Io(e.to_string()))?;
            }
            cleanup_empty_dir(&bucket_dir);
        }

        self.stamps.forget(key);
        self.seeded.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_bucket::TimeBucket;
    use tempfile::TempDir;

    fn key(name: &str) -> StreamKey {
        StreamKey::new(name).unwrap()
    }

    fn envelope(text: &str) -> Envelope {
        Envelope::new("id", text)
    }

    fn store_in(dir: &TempDir) -> FileHistoryStore {
        FileHistoryStore::new(HistoryConfig::new(dir.path()).with_bucket(TimeBucket::Hour))
    }

    #[test]
    fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let k = key("room_1");

        let stamp = store.save_history(&k, &envelope("hello")).unwrap();
        let entries = store.read_history(&k, Stamp::ZERO).unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].stamp, stamp);
        assert_eq!(entries[0].envelope.message, "hello");
    }

    #[test]
    fn test_read_is_exclusive_and_ordered() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let k = key("room_1");

        let s1 = store.save_history(&k, &envelope("one")).unwrap();
        store.save_history(&k, &envelope("two")).unwrap();
        store.save_history(&k, &envelope("three")).unwrap();

        let entries = store.read_history(&k, s1).unwrap();
        let messages: Vec<&str> = entries.iter().map(|e| e.envelope.message.as_str()).collect();
        assert_eq!(messages, vec!["two", "three"]);
        for pair in entries.windows(2) {
            assert!(pair[0].stamp < pair[1].stamp);
        }
    }

    #[test]
    fn test_delete_history_shadows_entries() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let k = key("room_1");

        store.save_history(&k, &envelope("one")).unwrap();
        let s2 = store.save_history(&k, &envelope("two")).unwrap();
        store.save_history(&k, &envelope("three")).unwrap();

        let removed = store.delete_history(&k, s2).unwrap();
        assert_eq!(removed, 2);

        let entries = store.read_history(&k, Stamp::ZERO).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].envelope.message, "three");

        // Pruning below the horizon again is a no-op.
        assert_eq!(store.delete_history(&k, s2).unwrap(), 0);
    }

    #[test]
    fn test_stamps_survive_restart() {
        let dir = TempDir::new().unwrap();
        let k = key("room_1");

        let first = {
            let store = store_in(&dir);
            store.save_history(&k, &envelope("before restart")).unwrap()
        };

        let store = store_in(&dir);
        let second = store.save_history(&k, &envelope("after restart")).unwrap();
        assert!(second > first, "stamps must keep increasing across restarts");

        let entries = store.read_history(&k, Stamp::ZERO).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].envelope.message, "before restart");
        assert_eq!(entries[1].envelope.message, "after restart");
    }

    #[test]
    fn test_drop_stream_removes_files() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let k = key("room_1");

        store.save_history(&k, &envelope("one")).unwrap();
        assert!(!store.read_history(&k, Stamp::ZERO).unwrap().is_empty());

        store.drop_stream(&k).unwrap();
        assert!(store.read_history(&k, Stamp::ZERO).unwrap().is_empty());
        assert!(store.list_log_files_for_key(&k).unwrap().is_empty());
    }

    #[test]
    fn test_retention_removes_expired_windows() {
        let dir = TempDir::new().unwrap();
        let store = FileHistoryStore::new(
            HistoryConfig::new(dir.path())
                .with_bucket(TimeBucket::Hour)
                .with_retention_ms(60 * 60 * 1000),
        );
        let k = key("room_1");

        let now_ms = Utc::now().timestamp_millis() as u64;
        let old_ts = now_ms - 3 * 60 * 60 * 1000;

        // Plant a record in an already-expired window directly.
        let old_window = store.window_start_ms(old_ts);
        let old_path = store.log_path(&k, old_window);
        store
            .append_record(
                &old_path,
                &HistoryRecord::Append {
                    stamp: Stamp::new(old_ts, 0),
                    envelope: envelope("stale"),
                },
            )
            .unwrap();

        let fresh = store.save_history(&k, &envelope("fresh")).unwrap();

        assert!(old_path.exists());
        let deleted = store.prune_expired(now_ms).unwrap();
        assert!(deleted >= 1, "expected the expired window file to be removed");
        assert!(!old_path.exists());

        let entries = store.read_history(&k, Stamp::ZERO).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].stamp, fresh);
    }

    #[test]
    fn test_independent_keys_have_independent_logs() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        store.save_history(&key("a"), &envelope("in a")).unwrap();
        assert!(store.read_history(&key("b"), Stamp::ZERO).unwrap().is_empty());
    }
}
