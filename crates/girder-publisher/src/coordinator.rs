//! Replay coordination for (re)connecting subscribers.
//!
//! On reconnect a client names, per stream, the last stamp it saw. The
//! coordinator replays everything newer from the history store through the
//! same transform pipeline live messages use, prunes what was successfully
//! replayed, and only then lets live delivery through, so a client never
//! sees a live message before the history that precedes it. The `since`
//! stamp is the client's only dedup mechanism and is advisory: delivery is
//! at-least-once, not exactly-once.

use crate::error::TransportError;
use crate::pipeline::{DeliveryContext, MessagePipeline};
use crate::registry::{BroadcastHub, SubscriberHandle};
use crate::subscription::Subscription;
use crate::transport::Transport;
use girder_commons::{BroadcastingName, Envelope, ServerMessage, Stamp};
use girder_streams::{HistoryError, HistoryStore};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::time::timeout;

/// Result of resuming one stream of a subscription.
#[derive(Debug)]
pub struct ResumeOutcome {
    pub broadcasting: BroadcastingName,
    /// Historical entries delivered.
    pub replayed: usize,
    /// Live frames that arrived mid-replay and were flushed afterwards.
    pub flushed: usize,
    /// Newest stamp the client has now seen for this stream.
    pub last_stamp: Option<Stamp>,
    /// Set when the history store failed; the stream still went live.
    pub history_error: Option<HistoryError>,
    /// False when replay was cut short (transport failure or unsubscribe);
    /// the unreplayed tail stays in history for the next reconnect.
    pub completed: bool,
}

enum DeliverFailure {
    Pipeline,
    Transport(TransportError),
    Timeout,
}

/// Drives history replay and the hand-off to live delivery.
pub struct ReplayCoordinator {
    hub: Arc<BroadcastHub>,
}

impl ReplayCoordinator {
    pub fn new(hub: Arc<BroadcastHub>) -> Self {
        Self { hub }
    }

    /// Resume a subscription on a (re)connected transport.
    ///
    /// Streams with replay disabled go live immediately. For each stream
    /// with replay enabled: read history newer than the client's `since`
    /// stamp, deliver it in order, prune through the last replayed stamp,
    /// flush frames parked during replay, then resume live delivery.
    pub async fn resume(
        &self,
        subscription: &Subscription,
        transport: Arc<dyn Transport>,
        pipeline: Arc<MessagePipeline>,
        since: &HashMap<BroadcastingName, Stamp>,
    ) -> Vec<ResumeOutcome> {
        let mut outcomes = Vec::with_capacity(subscription.streams().len());
        for stream in subscription.streams() {
            let outcome = if stream.replay {
                self.resume_stream(
                    subscription,
                    stream.broadcasting.clone(),
                    stream.key.clone(),
                    transport.clone(),
                    pipeline.clone(),
                    since.get(&stream.broadcasting).copied().unwrap_or(Stamp::ZERO),
                )
                .await
            } else {
                self.go_live(subscription, stream.broadcasting.clone(), transport.clone(), pipeline.clone())
                    .await
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn go_live(
        &self,
        subscription: &Subscription,
        broadcasting: BroadcastingName,
        transport: Arc<dyn Transport>,
        pipeline: Arc<MessagePipeline>,
    ) -> ResumeOutcome {
        self.hub.subscribe(&broadcasting, subscription, transport, pipeline);
        let completed = self.confirm(subscription, &broadcasting).await;
        ResumeOutcome {
            broadcasting,
            replayed: 0,
            flushed: 0,
            last_stamp: None,
            history_error: None,
            completed,
        }
    }

    async fn resume_stream(
        &self,
        subscription: &Subscription,
        broadcasting: BroadcastingName,
        key: girder_commons::StreamKey,
        transport: Arc<dyn Transport>,
        pipeline: Arc<MessagePipeline>,
        since: Stamp,
    ) -> ResumeOutcome {
        self.hub.subscribe_replaying(&broadcasting, subscription, transport, pipeline);
        if !self.confirm(subscription, &broadcasting).await {
            return ResumeOutcome {
                broadcasting,
                replayed: 0,
                flushed: 0,
                last_stamp: None,
                history_error: None,
                completed: false,
            };
        }

        let handle = match self.hub.subscriber(&broadcasting, subscription.connection_id()) {
            Some(handle) => handle,
            // Unsubscribed between registration and now.
            None => {
                return ResumeOutcome {
                    broadcasting,
                    replayed: 0,
                    flushed: 0,
                    last_stamp: None,
                    history_error: None,
                    completed: false,
                };
            },
        };

        let mut outcome = ResumeOutcome {
            broadcasting: broadcasting.clone(),
            replayed: 0,
            flushed: 0,
            last_stamp: None,
            history_error: None,
            completed: true,
        };

        let entries = match self.hub.history().read_history(&key, since) {
            Ok(entries) => entries,
            Err(err) => {
                // Graceful degradation: no replay, but the client still
                // receives live messages going forward.
                log::warn!("history read for {} failed, resuming live-only: {}", key, err);
                outcome.history_error = Some(err);
                let parked = handle.state.finish_replay(None);
                for frame in parked {
                    if self.deliver(&handle, &broadcasting, &frame.message).await.is_ok() {
                        outcome.flushed += 1;
                    }
                }
                return outcome;
            },
        };

        for entry in entries {
            if handle.state.is_cancelled() {
                log::debug!(
                    "replay of {} to {} cancelled after {} entries",
                    key,
                    subscription.connection_id(),
                    outcome.replayed
                );
                outcome.completed = false;
                return outcome;
            }

            match self.deliver(&handle, &broadcasting, &entry.envelope.message).await {
                Ok(()) => {
                    outcome.replayed += 1;
                    outcome.last_stamp = Some(entry.stamp);
                },
                Err(DeliverFailure::Pipeline) => {
                    // A transform rejected this entry; skip it but keep
                    // replaying the rest.
                    outcome.last_stamp = Some(entry.stamp);
                },
                Err(failure) => {
                    // Transport trouble mid-replay: leave the unreplayed
                    // tail in history and drop the subscriber; the next
                    // reconnect recovers from the same `since`.
                    match failure {
                        DeliverFailure::Transport(err) => {
                            log::warn!("replay send on {} failed: {}", broadcasting, err)
                        },
                        _ => log::warn!("replay send on {} timed out", broadcasting),
                    }
                    self.hub.unsubscribe(&broadcasting, subscription.connection_id());
                    outcome.completed = false;
                    return outcome;
                },
            }
        }

        if let Some(last) = outcome.last_stamp {
            if let Err(err) = self.hub.history().delete_history(&key, last) {
                // Best-effort cleanup; stale entries get pruned by age.
                log::warn!("post-replay prune of {} failed: {}", key, err);
                outcome.history_error = Some(err);
            }
        }

        let parked = handle.state.finish_replay(outcome.last_stamp);
        for frame in parked {
            match self.deliver(&handle, &broadcasting, &frame.message).await {
                Ok(()) => outcome.flushed += 1,
                Err(DeliverFailure::Pipeline) => {},
                Err(_) => {
                    self.hub.unsubscribe(&broadcasting, subscription.connection_id());
                    outcome.completed = false;
                    return outcome;
                },
            }
        }

        let complete_frame = ServerMessage::ReplayComplete {
            identifier: subscription.identifier().to_string(),
            last_stamp: outcome.last_stamp.unwrap_or(since),
        }
        .encode();
        let _ = timeout(self.hub.config().send_timeout, handle.transport.send(&complete_frame)).await;

        outcome
    }

    async fn confirm(&self, subscription: &Subscription, broadcasting: &BroadcastingName) -> bool {
        let handle = match self.hub.subscriber(broadcasting, subscription.connection_id()) {
            Some(handle) => handle,
            None => return false,
        };
        let frame =
            ServerMessage::Confirm { identifier: subscription.identifier().to_string() }.encode();
        match timeout(self.hub.config().send_timeout, handle.transport.send(&frame)).await {
            Ok(Ok(())) => true,
            _ => {
                self.hub.unsubscribe(broadcasting, subscription.connection_id());
                false
            },
        }
    }

    /// Deliver one message through the subscriber's pipeline, exactly as
    /// live broadcasts do.
    async fn deliver(
        &self,
        handle: &SubscriberHandle,
        broadcasting: &BroadcastingName,
        message: &str,
    ) -> Result<(), DeliverFailure> {
        let ctx = DeliveryContext::new(
            broadcasting.clone(),
            Envelope::new(handle.identifier.clone(), message),
        );
        let frame = match handle.pipeline.apply(ctx) {
            Ok(ctx) => ctx.envelope.encode(),
            Err(err) => {
                log::warn!("pipeline dropped replayed frame on {}: {}", broadcasting, err);
                return Err(DeliverFailure::Pipeline);
            },
        };
        match timeout(self.hub.config().send_timeout, handle.transport.send(&frame)).await {
            Ok(Ok(())) => {
                handle.delivered.fetch_add(1, Ordering::Relaxed);
                Ok(())
            },
            Ok(Err(err)) => Err(DeliverFailure::Transport(err)),
            Err(_) => Err(DeliverFailure::Timeout),
        }
    }
}
