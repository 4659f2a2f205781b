//! Wire protocol for broadcast delivery.
//!
//! The envelope is the one contractual wire format: live deliveries and
//! stored history entries carry the same shape, so a replayed message is
//! indistinguishable from a live one once it reaches the subscriber.
//!
//! ```json
//! {"identifier": "{\"channel\":\"ChatChannel\"}", "message": "{\"text\":\"hi\"}"}
//! ```
//!
//! `identifier` is an opaque subscription identifier (itself JSON);
//! `message` is the payload, already serialized to a string by the caller.
//!
//! The client/server frames around the envelope follow the same tagged-enum
//! convention as the rest of the protocol surface:
//!
//! ```json
//! {"type": "subscribe", "identifier": "...", "since": {"ts_ms": 0, "seq": 0}}
//! {"type": "confirm", "identifier": "..."}
//! {"type": "replay_complete", "identifier": "...", "last_stamp": {"ts_ms": 171, "seq": 3}}
//! ```

use crate::stamp::Stamp;
use serde::{Deserialize, Serialize};

/// The broadcast message envelope, used verbatim for live delivery and for
/// stored history entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Opaque subscription identifier (JSON encoded by the caller).
    pub identifier: String,
    /// Payload, already serialized to a string.
    pub message: String,
}

impl Envelope {
    pub fn new(identifier: impl Into<String>, message: impl Into<String>) -> Self {
        Self { identifier: identifier.into(), message: message.into() }
    }

    /// Encode the envelope to its wire form.
    pub fn encode(&self) -> String {
        // Envelope has no non-string fields, so serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Decode an envelope from its wire form.
    pub fn decode(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }
}

/// Frames sent from a client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Subscribe to the channel named by `identifier`. When `since` is set,
    /// history replay is requested from that stamp (exclusive).
    Subscribe {
        identifier: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        since: Option<Stamp>,
    },

    /// Unsubscribe from the channel named by `identifier`.
    Unsubscribe { identifier: String },
}

/// Frames sent from the server to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Subscription accepted; replay (if requested) begins immediately.
    Confirm { identifier: String },

    /// Subscription rejected.
    Reject { identifier: String, reason: String },

    /// Replay finished for this subscription; live delivery resumes.
    /// `last_stamp` is the newest stamp the client has now seen, suitable
    /// as the `since` value of a future reconnect.
    ReplayComplete { identifier: String, last_stamp: Stamp },
}

impl ServerMessage {
    /// Encode the frame to its wire form.
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
