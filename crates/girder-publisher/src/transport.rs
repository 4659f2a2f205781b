use crate::error::TransportError;
use async_trait::async_trait;

/// Outbound message transport for one connection.
///
/// The broadcast hub hands fully encoded frames to this trait and never
/// deals in WebSocket framing or any other wire detail itself. The server
/// layer embedding the hub implements it once per connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one encoded frame to the connection.
    async fn send(&self, frame: &str) -> Result<(), TransportError>;
}
