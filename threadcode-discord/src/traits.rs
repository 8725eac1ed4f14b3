//! Platform traits for chat adapters.

use crate::message::{InboundMessage, ThreadChannel};
use async_trait::async_trait;

/// Result type for platform operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Platform error type.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Message send failed: {0}")]
    SendFailed(String),

    #[error("Channel not ready")]
    NotReady,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Gateway adapter trait.
///
/// Owns the connection lifecycle of a chat platform.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Get the platform name.
    fn name(&self) -> &'static str;

    /// Initialize the connection (authenticate, learn our own identity).
    async fn init(&mut self) -> ChannelResult<()>;

    /// Listen for incoming messages until the connection closes.
    ///
    /// The callback is invoked once per message, in arrival order.
    async fn listen<F>(&self, callback: F) -> ChannelResult<()>
    where
        F: Fn(InboundMessage) + Send + Sync + 'static;

    /// Check if the platform is reachable with our credentials.
    async fn health_check(&self) -> ChannelResult<()>;

    /// Shutdown gracefully.
    async fn shutdown(&self) -> ChannelResult<()>;
}

/// Reply-side capabilities the relay needs from a platform.
#[async_trait]
pub trait ThreadReplies: Send + Sync {
    /// Resolve a channel ID to a thread.
    ///
    /// Returns `Ok(None)` when the channel exists but is not a thread.
    async fn resolve_thread(&self, channel_id: &str) -> ChannelResult<Option<ThreadChannel>>;

    /// Post `text` as a reply to `message`.
    async fn reply(&self, message: &InboundMessage, text: &str) -> ChannelResult<()>;

    /// Show the typing indicator in a channel.
    async fn send_typing(&self, channel_id: &str) -> ChannelResult<()>;
}
