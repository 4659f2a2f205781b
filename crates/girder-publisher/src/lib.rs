//! Broadcast pub/sub with history replay for Girder.
//!
//! The [`BroadcastHub`] maps broadcasting names to live subscriber sets and
//! publishes through an injected [`girder_streams::HistoryStore`], so a
//! message delivered live is also durably recorded before the publish call
//! returns. The [`ReplayCoordinator`] brings reconnecting clients back up
//! to date: history newer than their `since` stamp replays in order through
//! the same transform pipeline live messages use, then live delivery
//! resumes.
//!
//! Transports, pipelines, and the history store are all injected; the crate
//! holds no process-wide state.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod pipeline;
pub mod registry;
pub mod subscription;
pub mod transport;

pub use config::HubConfig;
pub use coordinator::{ReplayCoordinator, ResumeOutcome};
pub use error::{PipelineError, PublishError, TransportError};
pub use pipeline::{DeliveryContext, MessagePipeline, MessageTransform};
pub use registry::{BroadcastHub, Delivery, HubStats};
pub use subscription::{StreamConfig, Subscription};
pub use transport::Transport;
