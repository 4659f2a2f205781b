use crate::time_bucket::TimeBucket;
use std::path::PathBuf;

/// File-backed history store configuration.
#[derive(Debug, Clone)]
pub struct HistoryConfig {
    /// Root directory for the windowed log files.
    pub base_dir: PathBuf,
    /// Window granularity for log files.
    pub bucket: TimeBucket,
    /// Age-based retention horizon. Window files whose bucket has passed
    /// this horizon are removed wholesale by `prune_expired`, bounding
    /// growth for streams with no active subscribers. `None` disables
    /// age-based expiry (replay-driven pruning still applies).
    pub retention_ms: Option<u64>,
}

impl HistoryConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            bucket: TimeBucket::Day,
            retention_ms: None,
        }
    }

    pub fn with_bucket(mut self, bucket: TimeBucket) -> Self {
        self.bucket = bucket;
        self
    }

    pub fn with_retention_ms(mut self, retention_ms: u64) -> Self {
        self.retention_ms = Some(retention_ms);
        self
    }
}
