//! Per-connection subscription state.

use girder_commons::{BroadcastingName, ConnectionId, StreamKey};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One streamed broadcasting within a subscription: whether history replay
/// is enabled for it, and which key names its log. The key usually equals
/// the broadcasting name but may alias another stream's log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    pub broadcasting: BroadcastingName,
    pub replay: bool,
    pub key: StreamKey,
}

/// A channel instance bound to one connection.
///
/// Tracks which broadcastings it streams, the replay configuration for
/// each, and a counter of messages delivered to the client.
#[derive(Debug, Clone)]
pub struct Subscription {
    /// Opaque subscription identifier (JSON encoded by the client).
    identifier: String,
    connection_id: ConnectionId,
    streams: Vec<StreamConfig>,
    delivered: Arc<AtomicU64>,
}

impl Subscription {
    pub fn new(identifier: impl Into<String>, connection_id: ConnectionId) -> Self {
        Self {
            identifier: identifier.into(),
            connection_id,
            streams: Vec::new(),
            delivered: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Stream a broadcasting live-only (no history replay).
    pub fn stream_from(&mut self, broadcasting: BroadcastingName) {
        let key = StreamKey::from(&broadcasting);
        self.push_stream(StreamConfig { broadcasting, replay: false, key });
    }

    /// Stream a broadcasting with history replay, logging under the
    /// broadcasting's own name.
    pub fn stream_with_history(&mut self, broadcasting: BroadcastingName) {
        let key = StreamKey::from(&broadcasting);
        self.push_stream(StreamConfig { broadcasting, replay: true, key });
    }

    /// Stream a broadcasting with history replay under an explicit key,
    /// allowing several broadcastings to share one log.
    pub fn stream_with_history_key(&mut self, broadcasting: BroadcastingName, key: StreamKey) {
        self.push_stream(StreamConfig { broadcasting, replay: true, key });
    }

    pub fn streams(&self) -> &[StreamConfig] {
        &self.streams
    }

    /// Number of messages delivered to this subscription's client.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Shared counter handle, wired into the hub at subscribe time so live
    /// deliveries count here too.
    pub(crate) fn delivered_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.delivered)
    }

    fn push_stream(&mut self, config: StreamConfig) {
        // Re-streaming the same broadcasting replaces its configuration.
        self.streams.retain(|s| s.broadcasting != config.broadcasting);
        self.streams.push(config);
    }
}
