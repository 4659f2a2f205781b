//! The broadcast registry.
//!
//! Maps broadcasting names to their live subscriber sets. State is held in
//! a sharded concurrent map so operations on unrelated broadcastings never
//! serialize against each other. The hub is a plain injected object: it is
//! constructed by the embedding application and passed by reference to
//! every collaborator; there is no process-wide instance.

use crate::config::HubConfig;
use crate::error::PublishError;
use crate::pipeline::{DeliveryContext, MessagePipeline};
use crate::subscription::Subscription;
use crate::transport::Transport;
use dashmap::DashMap;
use futures_util::future::join_all;
use girder_commons::{BroadcastingName, ConnectionId, Envelope, Stamp, StreamKey};
use girder_streams::HistoryStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::timeout;

/// A live frame parked while its subscriber is mid-replay.
pub(crate) struct ParkedFrame {
    /// History stamp of the broadcast, when history captured it. Used to
    /// skip frames the replay already delivered.
    pub stamp: Option<Stamp>,
    pub message: String,
}

struct ParkState {
    replaying: bool,
    frames: Vec<ParkedFrame>,
}

/// Shared per-subscriber state: replay parking and cancellation.
pub(crate) struct SubscriberState {
    cancelled: AtomicBool,
    park: Mutex<ParkState>,
}

impl SubscriberState {
    fn new(replaying: bool) -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            park: Mutex::new(ParkState { replaying, frames: Vec::new() }),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Park a live frame if this subscriber is still replaying. The check
    /// and the push happen under one lock so a frame can never race past
    /// the replay's final flush.
    pub fn try_park(&self, stamp: Option<Stamp>, message: &str) -> bool {
        let mut park = self.park.lock();
        if park.replaying {
            park.frames.push(ParkedFrame { stamp, message: message.to_string() });
            true
        } else {
            false
        }
    }

    /// End replay mode and drain the parked frames that the replay did not
    /// already cover (stamp greater than `last`, or no stamp at all).
    pub fn finish_replay(&self, last: Option<Stamp>) -> Vec<ParkedFrame> {
        let mut park = self.park.lock();
        park.replaying = false;
        let frames = std::mem::take(&mut park.frames);
        match last {
            Some(last) => frames
                .into_iter()
                .filter(|f| f.stamp.map(|s| s > last).unwrap_or(true))
                .collect(),
            None => frames,
        }
    }
}

/// Everything needed to deliver to one subscriber.
#[derive(Clone)]
pub(crate) struct SubscriberHandle {
    pub identifier: String,
    pub transport: Arc<dyn Transport>,
    pub pipeline: Arc<MessagePipeline>,
    pub delivered: Arc<AtomicU64>,
    pub state: Arc<SubscriberState>,
}

struct Broadcasting {
    history_key: Option<StreamKey>,
    subscribers: HashMap<ConnectionId, SubscriberHandle>,
}

impl Broadcasting {
    fn empty() -> Self {
        Self { history_key: None, subscribers: HashMap::new() }
    }

    fn is_idle(&self) -> bool {
        self.subscribers.is_empty() && self.history_key.is_none()
    }
}

/// Result of one broadcast call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// History stamp assigned to the message, when history is enabled.
    pub stamp: Option<Stamp>,
    /// Subscribers that received the frame.
    pub delivered: usize,
    /// Subscribers skipped due to transport failure or timeout.
    pub abandoned: usize,
    /// Subscribers mid-replay whose frame was parked for later flush.
    pub parked: usize,
}

/// Registry counters for monitoring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubStats {
    pub broadcastings: usize,
    pub subscribers: usize,
}

enum SendOutcome {
    Delivered,
    Parked,
    /// Abandoned; carries the connection to drop when the failure was fatal.
    Abandoned(Option<ConnectionId>),
}

/// Broadcast hub: subscriber registry plus history-backed publishing.
pub struct BroadcastHub {
    broadcastings: DashMap<BroadcastingName, Broadcasting>,
    history: Arc<dyn HistoryStore>,
    config: HubConfig,
    next_connection: AtomicU64,
}

impl BroadcastHub {
    pub fn new(history: Arc<dyn HistoryStore>, config: HubConfig) -> Self {
        Self {
            broadcastings: DashMap::new(),
            history,
            config,
            next_connection: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub(crate) fn history(&self) -> &Arc<dyn HistoryStore> {
        &self.history
    }

    /// Allocate a connection id for a newly accepted connection.
    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId::new(self.next_connection.fetch_add(1, Ordering::SeqCst))
    }

    /// Enable history for a broadcasting under the given log key. The
    /// registry entry persists while history is configured, even with no
    /// subscribers.
    pub fn set_history(&self, broadcasting: &BroadcastingName, key: StreamKey) {
        let mut entry =
            self.broadcastings.entry(broadcasting.clone()).or_insert_with(Broadcasting::empty);
        entry.history_key = Some(key);
    }

    /// Disable history for a broadcasting.
    pub fn disable_history(&self, broadcasting: &BroadcastingName) {
        if let Some(mut entry) = self.broadcastings.get_mut(broadcasting) {
            entry.history_key = None;
        }
        self.evict_if_idle(broadcasting);
    }

    pub fn history_key(&self, broadcasting: &BroadcastingName) -> Option<StreamKey> {
        self.broadcastings.get(broadcasting).and_then(|b| b.history_key.clone())
    }

    /// Register a connection as a live subscriber. Idempotent: subscribing
    /// an already-subscribed connection is a no-op. Returns whether the
    /// subscriber was newly added.
    pub fn subscribe(
        &self,
        broadcasting: &BroadcastingName,
        subscription: &Subscription,
        transport: Arc<dyn Transport>,
        pipeline: Arc<MessagePipeline>,
    ) -> bool {
        self.insert_subscriber(broadcasting, subscription, transport, pipeline, false)
    }

    /// Register a subscriber in replay mode: live frames are parked until
    /// the replay coordinator finishes and flushes them.
    pub(crate) fn subscribe_replaying(
        &self,
        broadcasting: &BroadcastingName,
        subscription: &Subscription,
        transport: Arc<dyn Transport>,
        pipeline: Arc<MessagePipeline>,
    ) -> bool {
        self.insert_subscriber(broadcasting, subscription, transport, pipeline, true)
    }

    fn insert_subscriber(
        &self,
        broadcasting: &BroadcastingName,
        subscription: &Subscription,
        transport: Arc<dyn Transport>,
        pipeline: Arc<MessagePipeline>,
        replaying: bool,
    ) -> bool {
        let mut entry =
            self.broadcastings.entry(broadcasting.clone()).or_insert_with(Broadcasting::empty);
        if entry.subscribers.contains_key(&subscription.connection_id()) {
            return false;
        }
        entry.subscribers.insert(
            subscription.connection_id(),
            SubscriberHandle {
                identifier: subscription.identifier().to_string(),
                transport,
                pipeline,
                delivered: subscription.delivered_counter(),
                state: Arc::new(SubscriberState::new(replaying)),
            },
        );
        log::debug!("{} subscribed to {}", subscription.connection_id(), broadcasting);
        true
    }

    /// Remove a connection from a broadcasting. Idempotent: removing a
    /// connection that is not subscribed is a no-op. Cancels any in-flight
    /// replay to that connection.
    pub fn unsubscribe(&self, broadcasting: &BroadcastingName, connection_id: ConnectionId) -> bool {
        let removed = match self.broadcastings.get_mut(broadcasting) {
            Some(mut entry) => match entry.subscribers.remove(&connection_id) {
                Some(handle) => {
                    handle.state.cancel();
                    true
                },
                None => false,
            },
            None => false,
        };
        self.evict_if_idle(broadcasting);
        if removed {
            log::debug!("{} unsubscribed from {}", connection_id, broadcasting);
        }
        removed
    }

    /// Whether a connection is currently subscribed.
    pub fn is_subscribed(&self, broadcasting: &BroadcastingName, connection_id: ConnectionId) -> bool {
        self.broadcastings
            .get(broadcasting)
            .map(|b| b.subscribers.contains_key(&connection_id))
            .unwrap_or(false)
    }

    /// Number of live subscribers for a broadcasting.
    pub fn subscriber_count(&self, broadcasting: &BroadcastingName) -> usize {
        self.broadcastings.get(broadcasting).map(|b| b.subscribers.len()).unwrap_or(0)
    }

    pub fn stats(&self) -> HubStats {
        let mut subscribers = 0;
        for entry in self.broadcastings.iter() {
            subscribers += entry.subscribers.len();
        }
        HubStats { broadcastings: self.broadcastings.len(), subscribers }
    }

    pub(crate) fn subscriber(
        &self,
        broadcasting: &BroadcastingName,
        connection_id: ConnectionId,
    ) -> Option<SubscriberHandle> {
        self.broadcastings
            .get(broadcasting)
            .and_then(|b| b.subscribers.get(&connection_id).cloned())
    }

    /// Publish a message to a broadcasting.
    ///
    /// When history is enabled the append happens first; an `Ok` return
    /// means the log contains the message. Live delivery then goes to every
    /// subscriber present at this instant (late joiners see nothing), each
    /// send bounded by the configured timeout and isolated from the others.
    /// A subscriber whose transport fails fatally is dropped as if it had
    /// unsubscribed.
    ///
    /// A history append failure does not stop live delivery; it is returned
    /// afterwards as [`PublishError::History`] so persistence degradation
    /// alerts separately from delivery health.
    pub async fn broadcast(
        &self,
        broadcasting: &BroadcastingName,
        message: &str,
    ) -> Result<Delivery, PublishError> {
        let (history_key, targets) = match self.broadcastings.get(broadcasting) {
            Some(entry) => (
                entry.history_key.clone(),
                entry
                    .subscribers
                    .iter()
                    .map(|(id, handle)| (*id, handle.clone()))
                    .collect::<Vec<_>>(),
            ),
            None => (None, Vec::new()),
        };

        let mut stamp = None;
        let mut history_error = None;
        if let Some(key) = &history_key {
            match self.history.save_history(key, &Envelope::new(broadcasting.as_str(), message)) {
                Ok(assigned) => stamp = Some(assigned),
                Err(err) => {
                    log::warn!("history append for {} failed: {}", broadcasting, err);
                    history_error = Some(err);
                },
            }
        }

        let send_timeout = self.config.send_timeout;
        let sends = targets.into_iter().map(|(connection_id, handle)| {
            let broadcasting = broadcasting.clone();
            let message = message.to_string();
            async move {
                if handle.state.try_park(stamp, &message) {
                    return SendOutcome::Parked;
                }

                let ctx = DeliveryContext::new(
                    broadcasting.clone(),
                    Envelope::new(handle.identifier.clone(), message),
                );
                let frame = match handle.pipeline.apply(ctx) {
                    Ok(ctx) => ctx.envelope.encode(),
                    Err(err) => {
                        log::warn!(
                            "pipeline dropped frame for {} on {}: {}",
                            connection_id,
                            broadcasting,
                            err
                        );
                        return SendOutcome::Abandoned(None);
                    },
                };

                match timeout(send_timeout, handle.transport.send(&frame)).await {
                    Ok(Ok(())) => {
                        handle.delivered.fetch_add(1, Ordering::Relaxed);
                        SendOutcome::Delivered
                    },
                    Ok(Err(err)) if err.is_fatal() => {
                        log::warn!("dropping {} from {}: {}", connection_id, broadcasting, err);
                        SendOutcome::Abandoned(Some(connection_id))
                    },
                    Ok(Err(err)) => {
                        log::warn!("send to {} on {} failed: {}", connection_id, broadcasting, err);
                        SendOutcome::Abandoned(None)
                    },
                    Err(_) => {
                        log::warn!(
                            "send to {} on {} timed out after {:?}",
                            connection_id,
                            broadcasting,
                            send_timeout
                        );
                        SendOutcome::Abandoned(None)
                    },
                }
            }
        });

        let outcomes = join_all(sends).await;

        let mut delivery = Delivery { stamp, delivered: 0, abandoned: 0, parked: 0 };
        let mut dead: Vec<ConnectionId> = Vec::new();
        for outcome in outcomes {
            match outcome {
                SendOutcome::Delivered => delivery.delivered += 1,
                SendOutcome::Parked => delivery.parked += 1,
                SendOutcome::Abandoned(failed) => {
                    delivery.abandoned += 1;
                    if let Some(connection_id) = failed {
                        dead.push(connection_id);
                    }
                },
            }
        }

        if !dead.is_empty() {
            if let Some(mut entry) = self.broadcastings.get_mut(broadcasting) {
                for connection_id in dead {
                    if let Some(handle) = entry.subscribers.remove(&connection_id) {
                        handle.state.cancel();
                    }
                }
            }
            self.evict_if_idle(broadcasting);
        }

        match history_error {
            Some(err) => {
                log::warn!(
                    "broadcast to {} delivered {} live but history failed",
                    broadcasting,
                    delivery.delivered
                );
                Err(PublishError::History(err))
            },
            None => Ok(delivery),
        }
    }

    fn evict_if_idle(&self, broadcasting: &BroadcastingName) {
        self.broadcastings.remove_if(broadcasting, |_, entry| entry.is_idle());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use async_trait::async_trait;
    use girder_streams::MemoryHistoryStore;
    use std::time::Duration;

    enum Behavior {
        Deliver,
        Closed,
        Hang,
    }

    struct TestTransport {
        frames: Mutex<Vec<String>>,
        behavior: Behavior,
    }

    impl TestTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self { frames: Mutex::new(Vec::new()), behavior: Behavior::Deliver })
        }

        fn closed() -> Arc<Self> {
            Arc::new(Self { frames: Mutex::new(Vec::new()), behavior: Behavior::Closed })
        }

        fn hanging() -> Arc<Self> {
            Arc::new(Self { frames: Mutex::new(Vec::new()), behavior: Behavior::Hang })
        }

        fn frames(&self) -> Vec<String> {
            self.frames.lock().clone()
        }
    }

    #[async_trait]
    impl Transport for TestTransport {
        async fn send(&self, frame: &str) -> Result<(), TransportError> {
            match self.behavior {
                Behavior::Deliver => {
                    self.frames.lock().push(frame.to_string());
                    Ok(())
                },
                Behavior::Closed => Err(TransportError::Closed),
                Behavior::Hang => {
                    std::future::pending::<()>().await;
                    Ok(())
                },
            }
        }
    }

    fn hub() -> BroadcastHub {
        BroadcastHub::new(
            Arc::new(MemoryHistoryStore::new()),
            HubConfig::default().with_send_timeout(Duration::from_millis(100)),
        )
    }

    fn name(n: &str) -> BroadcastingName {
        BroadcastingName::new(n).unwrap()
    }

    fn pipeline() -> Arc<MessagePipeline> {
        Arc::new(MessagePipeline::new())
    }

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let hub = hub();
        let room = name("room_1");
        let transport = TestTransport::new();
        let sub = Subscription::new("{}", hub.next_connection_id());

        assert!(hub.subscribe(&room, &sub, transport.clone(), pipeline()));
        assert!(!hub.subscribe(&room, &sub, transport.clone(), pipeline()));
        assert_eq!(hub.subscriber_count(&room), 1);

        // Exactly one delivery despite the double subscribe.
        hub.broadcast(&room, "hello").await.unwrap();
        assert_eq!(transport.frames().len(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent_and_evicts() {
        let hub = hub();
        let room = name("room_1");
        let transport = TestTransport::new();
        let sub = Subscription::new("{}", hub.next_connection_id());

        hub.subscribe(&room, &sub, transport, pipeline());
        assert!(hub.unsubscribe(&room, sub.connection_id()));
        assert!(!hub.unsubscribe(&room, sub.connection_id()));

        // No subscribers and no history key: the entry must not linger.
        assert_eq!(hub.stats().broadcastings, 0);
    }

    #[tokio::test]
    async fn test_history_entry_outlives_subscribers() {
        let hub = hub();
        let room = name("room_1");
        hub.set_history(&room, StreamKey::new("room_1").unwrap());

        let transport = TestTransport::new();
        let sub = Subscription::new("{}", hub.next_connection_id());
        hub.subscribe(&room, &sub, transport, pipeline());
        hub.unsubscribe(&room, sub.connection_id());

        assert_eq!(hub.stats().broadcastings, 1);
        assert_eq!(hub.history_key(&room).unwrap().as_str(), "room_1");
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_subscribers() {
        let hub = hub();
        let room = name("room_1");

        let transports: Vec<_> = (0..3).map(|_| TestTransport::new()).collect();
        for transport in &transports {
            let sub = Subscription::new(r#"{"channel":"Chat"}"#, hub.next_connection_id());
            hub.subscribe(&room, &sub, transport.clone(), pipeline());
        }

        let delivery = hub.broadcast(&room, r#"{"text":"hi"}"#).await.unwrap();
        assert_eq!(delivery.delivered, 3);
        assert_eq!(delivery.abandoned, 0);

        for transport in &transports {
            let frames = transport.frames();
            assert_eq!(frames.len(), 1);
            let envelope = Envelope::decode(&frames[0]).unwrap();
            assert_eq!(envelope.identifier, r#"{"channel":"Chat"}"#);
            assert_eq!(envelope.message, r#"{"text":"hi"}"#);
        }
    }

    #[tokio::test]
    async fn test_broadcast_records_history_before_returning() {
        let history = Arc::new(MemoryHistoryStore::new());
        let hub = BroadcastHub::new(history.clone(), HubConfig::default());
        let room = name("room_1");
        let key = StreamKey::new("room_1").unwrap();
        hub.set_history(&room, key.clone());

        let delivery = hub.broadcast(&room, r#"{"text":"hi"}"#).await.unwrap();
        assert!(delivery.stamp.is_some());

        use girder_streams::HistoryStore;
        let entries = history.read_history(&key, Stamp::ZERO).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].envelope.message, r#"{"text":"hi"}"#);
    }

    #[tokio::test]
    async fn test_fatal_transport_error_drops_subscriber() {
        let hub = hub();
        let room = name("room_1");

        let healthy = TestTransport::new();
        let broken = TestTransport::closed();
        let sub_a = Subscription::new("{}", hub.next_connection_id());
        let sub_b = Subscription::new("{}", hub.next_connection_id());
        hub.subscribe(&room, &sub_a, healthy.clone(), pipeline());
        hub.subscribe(&room, &sub_b, broken, pipeline());

        let delivery = hub.broadcast(&room, "one").await.unwrap();
        assert_eq!(delivery.delivered, 1);
        assert_eq!(delivery.abandoned, 1);

        // The broken connection is gone; the healthy one still receives.
        assert_eq!(hub.subscriber_count(&room), 1);
        let delivery = hub.broadcast(&room, "two").await.unwrap();
        assert_eq!(delivery.delivered, 1);
        assert_eq!(delivery.abandoned, 0);
        assert_eq!(healthy.frames().len(), 2);
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_block_others() {
        let hub = hub();
        let room = name("room_1");

        let fast = TestTransport::new();
        let stuck = TestTransport::hanging();
        let sub_a = Subscription::new("{}", hub.next_connection_id());
        let sub_b = Subscription::new("{}", hub.next_connection_id());
        hub.subscribe(&room, &sub_a, fast.clone(), pipeline());
        hub.subscribe(&room, &sub_b, stuck, pipeline());

        let delivery = hub.broadcast(&room, "hello").await.unwrap();
        assert_eq!(delivery.delivered, 1);
        assert_eq!(delivery.abandoned, 1);
        assert_eq!(fast.frames().len(), 1);

        // Timeout is not fatal: the slow connection stays subscribed.
        assert_eq!(hub.subscriber_count(&room), 2);
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers_is_quiet() {
        let hub = hub();
        let delivery = hub.broadcast(&name("nowhere"), "msg").await.unwrap();
        assert_eq!(delivery, Delivery { stamp: None, delivered: 0, abandoned: 0, parked: 0 });
    }

    #[tokio::test]
    async fn test_delivered_counter_tracks_sends() {
        let hub = hub();
        let room = name("room_1");
        let transport = TestTransport::new();
        let sub = Subscription::new("{}", hub.next_connection_id());
        hub.subscribe(&room, &sub, transport, pipeline());

        hub.broadcast(&room, "one").await.unwrap();
        hub.broadcast(&room, "two").await.unwrap();
        assert_eq!(sub.delivered(), 2);
    }
}
